use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::api::{ImageSummary, RequestStatusResponse, UploadResponse};
use crate::models::classification::ClassifyInvocation;
use crate::models::image::ImageRecord;
use crate::services::queue::QueuedRequest;
use crate::services::resize::resize_for_classification;
use crate::services::storage::resized_image_key;

/// POST /api/v1/images — Upload one or more images for classification.
pub async fn upload_images(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, StatusCode> {
    let request_id = Uuid::new_v4().to_string();
    let mut records = Vec::new();

    let staged = match store_uploads(&state, &request_id, multipart, &mut records).await {
        Ok(()) if records.is_empty() => Err(StatusCode::BAD_REQUEST),
        Ok(()) => state
            .records
            .insert_request(&request_id, &records)
            .await
            .map(|_| ())
            .map_err(|e| {
                tracing::error!(request_id = %request_id, error = %e, "Failed to create request");
                StatusCode::INTERNAL_SERVER_ERROR
            }),
        Err(status) => Err(status),
    };
    if let Err(status) = staged {
        discard_uploads(&state, &records).await;
        return Err(status);
    }

    let queued = QueuedRequest {
        request_id: request_id.clone(),
        retry_count: 0,
    };
    if let Err(e) = state.queue.enqueue(&queued).await {
        tracing::error!(request_id = %request_id, error = %e, "Failed to enqueue request");
        if let Err(e) = queries::fail_request(&state.db, &request_id, "Failed to enqueue request").await {
            tracing::error!(request_id = %request_id, error = %e, "Failed to mark request as failed");
        }
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    metrics::counter!("image_uploads_total").increment(records.len() as u64);
    tracing::info!(request_id = %request_id, images = records.len(), "Request accepted");

    Ok(Json(UploadResponse {
        request_id,
        image_count: records.len(),
        status: "pending".to_string(),
    }))
}

/// Resize and store every `image` field, pushing an unclassified record per
/// stored object onto `records`.
async fn store_uploads(
    state: &AppState,
    request_id: &str,
    mut multipart: Multipart,
    records: &mut Vec<ImageRecord>,
) -> Result<(), StatusCode> {
    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        if field.name() != Some("image") {
            continue;
        }
        let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;

        let resized = resize_for_classification(&data).map_err(|e| {
            tracing::warn!(request_id = %request_id, error = %e, "Rejected upload");
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        })?;

        let image_id = Uuid::new_v4().to_string();
        let key = resized_image_key(request_id, &image_id);
        state
            .storage
            .upload(&key, &resized.bytes, "image/jpeg")
            .await
            .map_err(|e| {
                tracing::error!(request_id = %request_id, error = %e, "Failed to store resized image");
                StatusCode::BAD_GATEWAY
            })?;

        tracing::debug!(
            request_id = %request_id,
            image_id = %image_id,
            width = resized.width,
            height = resized.height,
            "Stored resized image"
        );
        records.push(ImageRecord::unclassified(
            request_id,
            image_id,
            resized.source_type,
            key,
        ));
    }
    Ok(())
}

/// Best-effort removal of objects stored for a request that was never created.
async fn discard_uploads(state: &AppState, records: &[ImageRecord]) {
    for record in records {
        if let Err(e) = state.storage.delete(&record.source_ref).await {
            tracing::warn!(key = %record.source_ref, error = %e, "Failed to delete orphaned upload");
        }
    }
}

/// GET /api/v1/requests/{request_id} — Classification status of a request.
pub async fn get_request_status(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<RequestStatusResponse>, StatusCode> {
    let invocation = ClassifyInvocation {
        request_id,
        retry_count: 0,
    };
    invocation.validate().map_err(|_| StatusCode::BAD_REQUEST)?;
    let request_id = invocation.request_id;

    let request = queries::get_request(&state.db, &request_id)
        .await
        .map_err(|e| {
            tracing::error!(request_id = %request_id, error = %e, "Failed to load request");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let images = state
        .records
        .list_for_request(&request_id)
        .await
        .map_err(|e| {
            tracing::error!(request_id = %request_id, error = %e, "Failed to load image records");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(RequestStatusResponse {
        request_id,
        status: request.status.as_ref().to_string(),
        unclassified_count: request.unclassified_count,
        retry_count: request.retry_count,
        error: request.error,
        images: images.into_iter().map(ImageSummary::from).collect(),
    }))
}
