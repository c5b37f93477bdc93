use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::label::Label;

/// One image of a classification request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub request_id: String,
    pub image_id: String,
    /// Format tag of the stored image, e.g. "jpeg".
    pub image_type: String,
    /// Object key of the resized image.
    pub source_ref: String,
    /// `None` until the vision model produced a known label.
    pub classification: Option<Label>,
    /// 0-100
    pub confidence: f64,
    pub cost: f64,
    pub processing_time_ms: i64,
    pub service_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageRecord {
    /// A freshly uploaded image awaiting classification.
    pub fn unclassified(
        request_id: impl Into<String>,
        image_id: impl Into<String>,
        image_type: impl Into<String>,
        source_ref: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id: request_id.into(),
            image_id: image_id.into(),
            image_type: image_type.into(),
            source_ref: source_ref.into(),
            classification: None,
            confidence: 0.0,
            cost: 0.0,
            processing_time_ms: 0,
            service_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_classified(&self) -> bool {
        self.classification.is_some()
    }
}
