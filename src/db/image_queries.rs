use async_trait::async_trait;
use sqlx::postgres::{PgExecutor, PgRow};
use sqlx::{PgPool, Row};

use crate::db::queries;
use crate::models::image::ImageRecord;
use crate::models::job::ClassificationRequest;
use crate::models::label::{parse_stored, to_stored, NONE_CLASSIFICATION};
use crate::services::store::{RecordStore, StoreError};

const IMAGE_COLUMNS: &str = "request_id, image_id, image_type, source_ref, classification, \
     confidence, cost, processing_time_ms, service_name, created_at, updated_at";

/// Postgres-backed [`RecordStore`].
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the request row and all of its unclassified images in one
    /// transaction.
    pub async fn insert_request(
        &self,
        request_id: &str,
        records: &[ImageRecord],
    ) -> Result<ClassificationRequest, StoreError> {
        let mut tx = self.pool.begin().await?;
        let request = queries::create_request(&mut *tx, request_id, records.len() as i32).await?;
        for record in records {
            insert_image(&mut *tx, record).await?;
        }
        tx.commit().await?;
        Ok(request)
    }

    /// All images of a request, classified or not.
    pub async fn list_for_request(&self, request_id: &str) -> Result<Vec<ImageRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM image_records WHERE request_id = $1 ORDER BY seq ASC",
            IMAGE_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(request_id).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn query_unclassified(&self, request_id: &str) -> Result<Vec<ImageRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM image_records WHERE request_id = $1 AND classification = $2 ORDER BY seq ASC",
            IMAGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(request_id)
            .bind(NONE_CLASSIFICATION)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn write_chunk(&self, request_id: &str, chunk: &[ImageRecord]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for record in chunk {
            sqlx::query(
                r#"
                INSERT INTO image_records
                    (request_id, image_id, image_type, source_ref, classification,
                     confidence, cost, processing_time_ms, service_name, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
                ON CONFLICT (request_id, image_id) DO UPDATE SET
                    classification = EXCLUDED.classification,
                    confidence = EXCLUDED.confidence,
                    cost = EXCLUDED.cost,
                    processing_time_ms = EXCLUDED.processing_time_ms,
                    service_name = EXCLUDED.service_name,
                    updated_at = NOW()
                "#,
            )
            .bind(request_id)
            .bind(&record.image_id)
            .bind(&record.image_type)
            .bind(&record.source_ref)
            .bind(to_stored(record.classification))
            .bind(record.confidence)
            .bind(record.cost)
            .bind(record.processing_time_ms)
            .bind(&record.service_name)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

async fn insert_image(executor: impl PgExecutor<'_>, record: &ImageRecord) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO image_records (request_id, image_id, image_type, source_ref, classification)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(&record.request_id)
    .bind(&record.image_id)
    .bind(&record.image_type)
    .bind(&record.source_ref)
    .bind(NONE_CLASSIFICATION)
    .execute(executor)
    .await?;
    Ok(())
}

fn record_from_row(row: &PgRow) -> Result<ImageRecord, StoreError> {
    let classification: String = row.try_get("classification")?;
    Ok(ImageRecord {
        request_id: row.try_get("request_id")?,
        image_id: row.try_get("image_id")?,
        image_type: row.try_get("image_type")?,
        source_ref: row.try_get("source_ref")?,
        classification: parse_stored(&classification),
        confidence: row.try_get("confidence")?,
        cost: row.try_get("cost")?,
        processing_time_ms: row.try_get("processing_time_ms")?,
        service_name: row.try_get("service_name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
