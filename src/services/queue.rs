use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::models::classification::OrchestratorOutcome;

const QUEUE_KEY: &str = "image_description:requests";
const PROCESSING_KEY: &str = "image_description:processing";

/// Request payload serialized into Redis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
    pub request_id: String,
    #[serde(default)]
    pub retry_count: u32,
}

impl QueuedRequest {
    /// Payload that continues `outcome`'s request from the retry count it reached.
    pub fn resume_from(outcome: &OrchestratorOutcome) -> Self {
        Self {
            request_id: outcome.request_id.clone(),
            retry_count: outcome.retry_count,
        }
    }
}

/// Redis-backed queue of requests awaiting classification.
pub struct RequestQueue {
    client: redis::Client,
}

impl RequestQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Enqueue a request for classification.
    pub async fn enqueue(&self, request: &QueuedRequest) -> Result<(), QueueError> {
        let payload = serde_json::to_string(request)?;
        self.connection()
            .await?
            .lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await?;
        Ok(())
    }

    /// Move the oldest pending request to the processing list and return it.
    pub async fn dequeue(&self) -> Result<Option<QueuedRequest>, QueueError> {
        let payload: Option<String> = self
            .connection()
            .await?
            .rpoplpush(QUEUE_KEY, PROCESSING_KEY)
            .await?;

        payload
            .map(|p| serde_json::from_str(&p).map_err(QueueError::from))
            .transpose()
    }

    /// Remove `request` from the processing list.
    pub async fn complete(&self, request: &QueuedRequest) -> Result<(), QueueError> {
        let payload = serde_json::to_string(request)?;
        self.connection()
            .await?
            .lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload)
            .await?;
        Ok(())
    }

    /// Atomically put `resumed` back on the queue and drop `taken` from the
    /// processing list, so an interrupted request is never lost or duplicated.
    pub async fn requeue(
        &self,
        taken: &QueuedRequest,
        resumed: &QueuedRequest,
    ) -> Result<(), QueueError> {
        let taken = serde_json::to_string(taken)?;
        let resumed = serde_json::to_string(resumed)?;
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .rpush(QUEUE_KEY, &resumed)
            .ignore()
            .lrem(PROCESSING_KEY, 1, &taken)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Number of requests waiting to be dequeued.
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        Ok(self.connection().await?.llen(QUEUE_KEY).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::classification::Terminal;

    #[test]
    fn test_payload_format() {
        let request = QueuedRequest {
            request_id: "req-1".to_string(),
            retry_count: 2,
        };
        let payload = serde_json::to_string(&request).unwrap();
        assert_eq!(payload, r#"{"requestId":"req-1","retryCount":2}"#);
    }

    #[test]
    fn test_resume_keeps_reached_retry_count() {
        let outcome = OrchestratorOutcome {
            request_id: "req-1".to_string(),
            terminal: Terminal::Aborted,
            unclassified_count: 3,
            rate_limited: true,
            wait_seconds: 600,
            retry_count: 4,
            passes: 2,
            error: None,
            transitions: Vec::new(),
        };
        assert_eq!(
            QueuedRequest::resume_from(&outcome),
            QueuedRequest {
                request_id: "req-1".to_string(),
                retry_count: 4,
            }
        );
    }

    #[test]
    fn test_retry_count_defaults_to_zero() {
        let request: QueuedRequest = serde_json::from_str(r#"{"requestId":"req-1"}"#).unwrap();
        assert_eq!(request.retry_count, 0);
    }
}
