mod fixtures;

use image_description::{
    config::AppConfig,
    db::{self, image_queries::PgRecordStore, queries},
    models::{job::RequestStatus, label::Label},
    services::{
        queue::{QueuedRequest, RequestQueue},
        storage::{ObjectStorage, ReadUrlSigner},
        store::RecordStore,
    },
};
use uuid::Uuid;

/// Integration test: storage, record table and queue
///
/// This test verifies the complete integration:
/// 1. Database connection and schema
/// 2. Object storage (upload/presign/download/delete)
/// 3. Record store (insert/query/upsert)
/// 4. Request rows (create/read/finish)
/// 5. Request queue (enqueue/dequeue/complete/requeue)
/// 6. Atomic request creation
///
/// Note: This requires running PostgreSQL, Redis and S3-compatible storage
/// configured via environment variables.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_full_integration() {
    let config = AppConfig::from_env().expect("Failed to load config");

    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    let storage = ObjectStorage::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
        config.presign_expiry_secs,
    )
    .expect("Failed to initialize storage");

    let queue = RequestQueue::new(&config.redis_url).expect("Failed to initialize queue");
    let store = PgRecordStore::new(db_pool.clone());

    let request_id = Uuid::new_v4().to_string();
    let records = fixtures::unclassified(&request_id, &["a", "b", "c"]);

    // 1. Object storage round trip
    storage
        .upload(&records[0].source_ref, b"fake jpeg bytes", "image/jpeg")
        .await
        .expect("Upload failed");
    let url = storage
        .read_url(&records[0].source_ref)
        .await
        .expect("Presign failed");
    assert!(url.contains(&request_id));
    let downloaded = storage
        .download(&records[0].source_ref)
        .await
        .expect("Download failed");
    assert_eq!(downloaded, b"fake jpeg bytes");

    // 2. Record store
    let request = store
        .insert_request(&request_id, &records)
        .await
        .expect("Failed to insert request");
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.unclassified_count, 3);
    let pending = store
        .query_unclassified(&request_id)
        .await
        .expect("Failed to query records");
    assert_eq!(pending.len(), 3);
    assert_eq!(pending[0].image_id, "a");

    let mut classified = pending[1].clone();
    classified.classification = Some(Label::Building);
    classified.confidence = 95.0;
    store
        .upsert_batch(&[classified], &request_id)
        .await
        .expect("Failed to upsert");

    let pending = store
        .query_unclassified(&request_id)
        .await
        .expect("Failed to query records");
    let ids: Vec<&str> = pending.iter().map(|r| r.image_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);

    // 3. Request rows
    queries::finish_request(&db_pool, &request_id, RequestStatus::Completed, 0, 2, None)
        .await
        .expect("Failed to finish request");
    let finished = queries::get_request(&db_pool, &request_id)
        .await
        .expect("Failed to get request")
        .expect("Request not found");
    assert_eq!(finished.status, RequestStatus::Completed);
    assert_eq!(finished.retry_count, 2);

    // 4. Queue
    let queued = QueuedRequest {
        request_id: request_id.clone(),
        retry_count: 0,
    };
    queue.enqueue(&queued).await.expect("Failed to enqueue");
    let dequeued = queue
        .dequeue()
        .await
        .expect("Failed to dequeue")
        .expect("No request in queue");
    assert_eq!(dequeued, queued);
    queue.complete(&dequeued).await.expect("Failed to complete");

    // 5. Requeue hands a taken request back with its reached retry count
    queue.enqueue(&queued).await.expect("Failed to enqueue");
    let taken = queue
        .dequeue()
        .await
        .expect("Failed to dequeue")
        .expect("No request in queue");
    let resumed = QueuedRequest {
        request_id: request_id.clone(),
        retry_count: 4,
    };
    queue.requeue(&taken, &resumed).await.expect("Failed to requeue");
    let again = queue
        .dequeue()
        .await
        .expect("Failed to dequeue")
        .expect("Requeued request missing");
    assert_eq!(again, resumed);
    queue.complete(&again).await.expect("Failed to complete");

    // 6. A failing image insert leaves neither the request row nor any image row
    let broken_id = Uuid::new_v4().to_string();
    let duplicated = fixtures::unclassified(&broken_id, &["dup", "dup"]);
    assert!(store.insert_request(&broken_id, &duplicated).await.is_err());
    assert!(queries::get_request(&db_pool, &broken_id)
        .await
        .expect("Failed to get request")
        .is_none());
    assert!(store
        .list_for_request(&broken_id)
        .await
        .expect("Failed to list records")
        .is_empty());

    // Cleanup
    storage
        .delete(&records[0].source_ref)
        .await
        .expect("Failed to delete object");
}
