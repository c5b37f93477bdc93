use std::time::Duration;

use image_description::models::label::Label;
use image_description::services::classifier::{Classifier, ClassifyError, VisionClient};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const IMAGE_URL: &str = "https://bucket.test/resized-images/req/a.jpg";

fn completion(content: &str, total_tokens: u64) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": total_tokens - 5,
            "completion_tokens": 5,
            "total_tokens": total_tokens
        }
    })
}

fn client(server: &MockServer) -> VisionClient {
    VisionClient::new(
        &format!("{}/v1", server.uri()),
        "sk-test",
        "gpt-4o-mini",
        Duration::from_millis(500),
    )
    .expect("client builds")
}

#[tokio::test]
async fn test_successful_classification() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": "prompt" },
                    { "type": "image_url", "image_url": { "url": IMAGE_URL } }
                ]
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("A dog on a beach.", 123)))
        .expect(1)
        .mount(&server)
        .await;

    let result = client(&server).classify(IMAGE_URL, "prompt").await.unwrap();

    assert_eq!(result.label, Some(Label::Animal));
    assert_eq!(result.total_tokens, 123);
}

#[tokio::test]
async fn test_unclassified_answer_has_no_label() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Unclassified", 40)))
        .mount(&server)
        .await;

    let result = client(&server).classify(IMAGE_URL, "prompt").await.unwrap();

    assert_eq!(result.label, None);
    assert_eq!(result.total_tokens, 40);
}

#[tokio::test]
async fn test_rate_limit_reads_remaining_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("x-ratelimit-remaining-requests", "12"),
        )
        .mount(&server)
        .await;

    let err = client(&server).classify(IMAGE_URL, "prompt").await.unwrap_err();

    assert!(matches!(err, ClassifyError::RateLimited { remaining: 12 }));
}

#[tokio::test]
async fn test_rate_limit_without_header_means_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = client(&server).classify(IMAGE_URL, "prompt").await.unwrap_err();

    assert!(matches!(err, ClassifyError::RateLimited { remaining: 0 }));
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = client(&server).classify(IMAGE_URL, "prompt").await.unwrap_err();

    assert!(matches!(err, ClassifyError::Server { status: 502 }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_bad_credentials_are_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let err = client(&server).classify(IMAGE_URL, "prompt").await.unwrap_err();

    match err {
        ClassifyError::Rejected { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "invalid api key");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_malformed_body_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = client(&server).classify(IMAGE_URL, "prompt").await.unwrap_err();

    assert!(matches!(err, ClassifyError::Malformed(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_empty_choices_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [],
            "usage": { "total_tokens": 0 }
        })))
        .mount(&server)
        .await;

    let err = client(&server).classify(IMAGE_URL, "prompt").await.unwrap_err();

    assert!(matches!(err, ClassifyError::Malformed(_)));
}

#[tokio::test]
async fn test_hung_call_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("Food", 10))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let err = client(&server).classify(IMAGE_URL, "prompt").await.unwrap_err();

    assert!(matches!(err, ClassifyError::Http(ref e) if e.is_timeout()));
    assert!(err.is_transient());
}
