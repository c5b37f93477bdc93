//! Sample image records

#![allow(dead_code)]

use image_description::models::image::ImageRecord;
use image_description::services::storage::resized_image_key;

pub const REQUEST_ID: &str = "3f9c2a1e-5b7d-4c8e-a1f0-6d2b9e4c7a15";

/// Unclassified records of `request_id`, one per id, in the given order.
pub fn unclassified(request_id: &str, image_ids: &[&str]) -> Vec<ImageRecord> {
    image_ids
        .iter()
        .map(|id| {
            ImageRecord::unclassified(request_id, *id, "jpeg", resized_image_key(request_id, id))
        })
        .collect()
}

/// `n` unclassified records named `img-000`, `img-001`, ...
pub fn numbered(request_id: &str, n: usize) -> Vec<ImageRecord> {
    let names: Vec<String> = (0..n).map(|i| format!("img-{:03}", i)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    unclassified(request_id, &refs)
}
