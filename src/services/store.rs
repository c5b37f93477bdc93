use async_trait::async_trait;

use crate::models::image::ImageRecord;

/// Largest number of records written by a single `write_chunk` call.
pub const MAX_BATCH_SIZE: usize = 25;

/// Persistent table of image records, addressed by request id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every record of `request_id` whose classification is still the
    /// unclassified sentinel, in insertion order.
    async fn query_unclassified(&self, request_id: &str) -> Result<Vec<ImageRecord>, StoreError>;

    /// Insert or replace up to [`MAX_BATCH_SIZE`] records atomically.
    async fn write_chunk(&self, request_id: &str, chunk: &[ImageRecord]) -> Result<(), StoreError>;

    /// Upsert `items` in chunks of [`MAX_BATCH_SIZE`].
    ///
    /// Stops at the first failing chunk and reports how many records were
    /// committed before it.
    async fn upsert_batch(&self, items: &[ImageRecord], request_id: &str) -> Result<(), StoreError> {
        let mut written = 0;
        for chunk in items.chunks(MAX_BATCH_SIZE) {
            if let Err(e) = self.write_chunk(request_id, chunk).await {
                tracing::error!(
                    request_id = %request_id,
                    written,
                    total = items.len(),
                    error = %e,
                    "Batch upsert failed part way"
                );
                return Err(StoreError::PartialWrite {
                    written,
                    total: items.len(),
                    source: Box::new(e),
                });
            }
            written += chunk.len();
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Wrote {written} of {total} records before failing: {source}")]
    PartialWrite {
        written: usize,
        total: usize,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Record store unavailable: {0}")]
    Unavailable(String),
}
