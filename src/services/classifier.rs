use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::label::Label;
use crate::services::labels::match_label;

/// Name recorded on images classified by the vision model.
pub const VISION_SERVICE_NAME: &str = "GPTVision";

const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining-requests";

/// Result of a successful classification call.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// `None` when the model answered with nothing recognisable.
    pub label: Option<Label>,
    pub total_tokens: u64,
}

/// A vision backend able to label an image reachable by URL.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image_url: &str, prompt: &str) -> Result<Classification, ClassifyError>;

    fn service_name(&self) -> &str {
        VISION_SERVICE_NAME
    }
}

/// Client for an OpenAI-compatible chat completions API with image input.
pub struct VisionClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Usage,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u64,
}

impl VisionClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, ClassifyError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Classifier for VisionClient {
    /// Ask the model which known label fits the image at `image_url`.
    async fn classify(&self, image_url: &str, prompt: &str) -> Result<Classification, ClassifyError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: image_url },
                    },
                ],
            }],
            max_tokens: 50,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let remaining = response
                .headers()
                .get(RATE_LIMIT_REMAINING_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(0);
            return Err(ClassifyError::RateLimited { remaining });
        }
        if is_rejection(status) {
            let message = response.text().await.unwrap_or_default();
            return Err(ClassifyError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            return Err(ClassifyError::Server {
                status: status.as_u16(),
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifyError::Malformed(e.to_string()))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ClassifyError::Malformed("response has no message content".to_string()))?;

        tracing::debug!(raw = %content, tokens = chat.usage.total_tokens, "Vision model answered");

        Ok(Classification {
            label: match_label(&content),
            total_tokens: chat.usage.total_tokens,
        })
    }
}

/// Client errors that no amount of waiting will fix.
fn is_rejection(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_REQUEST
            | StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::NOT_FOUND
    )
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Rate limited by vision API ({remaining} requests remaining)")]
    RateLimited { remaining: u32 },

    #[error("Vision API rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Vision API returned status {status}")]
    Server { status: u16 },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed vision API response: {0}")]
    Malformed(String),
}

impl ClassifyError {
    /// Failures worth another attempt at the same item.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClassifyError::Server { .. } | ClassifyError::Http(_) | ClassifyError::Malformed(_)
        )
    }
}
