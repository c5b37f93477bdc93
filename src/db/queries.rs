use sqlx::postgres::{PgExecutor, PgRow};
use sqlx::{PgPool, Row};
use std::str::FromStr;

use crate::models::job::{ClassificationRequest, RequestStatus};

const REQUEST_COLUMNS: &str =
    "id, status, image_count, unclassified_count, retry_count, error, created_at, updated_at";

/// Insert a new classification request
pub async fn create_request(
    executor: impl PgExecutor<'_>,
    request_id: &str,
    image_count: i32,
) -> Result<ClassificationRequest, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO classification_requests (id, status, image_count, unclassified_count)
        VALUES ($1, 'pending', $2, $2)
        RETURNING {}
        "#,
        REQUEST_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(request_id)
        .bind(image_count)
        .fetch_one(executor)
        .await?;

    request_from_row(&row)
}

/// Get a request by ID
pub async fn get_request(
    pool: &PgPool,
    request_id: &str,
) -> Result<Option<ClassificationRequest>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM classification_requests WHERE id = $1",
        REQUEST_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(request_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(request_from_row).transpose()
}

/// Update request status
pub async fn update_request_status(
    pool: &PgPool,
    request_id: &str,
    status: RequestStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE classification_requests
        SET status = $1, updated_at = NOW()
        WHERE id = $2
        "#,
    )
    .bind(status.as_ref())
    .bind(request_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record the terminal state of a request
pub async fn finish_request(
    pool: &PgPool,
    request_id: &str,
    status: RequestStatus,
    unclassified_count: i32,
    retry_count: i32,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE classification_requests
        SET status = $1,
            unclassified_count = $2,
            retry_count = $3,
            error = $4,
            updated_at = NOW()
        WHERE id = $5
        "#,
    )
    .bind(status.as_ref())
    .bind(unclassified_count)
    .bind(retry_count)
    .bind(error)
    .bind(request_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark a request failed without touching its counters
pub async fn fail_request(pool: &PgPool, request_id: &str, error: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE classification_requests
        SET status = $1, error = $2, updated_at = NOW()
        WHERE id = $3
        "#,
    )
    .bind(RequestStatus::Failed.as_ref())
    .bind(error)
    .bind(request_id)
    .execute(pool)
    .await?;

    Ok(())
}

fn request_from_row(row: &PgRow) -> Result<ClassificationRequest, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status = RequestStatus::from_str(&status_str).unwrap_or(RequestStatus::Pending);

    Ok(ClassificationRequest {
        id: row.try_get("id")?,
        status,
        image_count: row.try_get("image_count")?,
        unclassified_count: row.try_get("unclassified_count")?,
        retry_count: row.try_get("retry_count")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
