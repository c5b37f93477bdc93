use serde::Serialize;

use crate::models::image::ImageRecord;
use crate::models::label::Label;

/// Response after uploading images for classification.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub request_id: String,
    pub image_count: usize,
    pub status: String,
}

/// Response for querying request status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatusResponse {
    pub request_id: String,
    pub status: String,
    pub unclassified_count: i32,
    pub retry_count: i32,
    pub error: Option<String>,
    pub images: Vec<ImageSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSummary {
    pub image_id: String,
    pub classification: Option<Label>,
    pub confidence: f64,
    pub cost: f64,
    pub processing_time_ms: i64,
    pub service_name: Option<String>,
}

impl From<ImageRecord> for ImageSummary {
    fn from(record: ImageRecord) -> Self {
        Self {
            image_id: record.image_id,
            classification: record.classification,
            confidence: record.confidence,
            cost: record.cost,
            processing_time_ms: record.processing_time_ms,
            service_name: record.service_name,
        }
    }
}
