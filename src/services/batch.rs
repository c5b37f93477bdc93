use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;

use crate::config::{CostModel, RetryPolicy};
use crate::models::classification::BatchResult;
use crate::models::image::ImageRecord;
use crate::models::label::Label;
use crate::services::classifier::{Classifier, ClassifyError};
use crate::services::labels::classification_prompt;
use crate::services::storage::ReadUrlSigner;
use crate::services::store::{RecordStore, StoreError};

/// Confidence recorded on vision-model labels, matching the threshold of
/// the label detector they replace.
pub const VISION_CONFIDENCE: f64 = 95.0;

/// Runs one sequential classification pass over a request's unclassified images.
pub struct BatchClassifier {
    store: Arc<dyn RecordStore>,
    signer: Arc<dyn ReadUrlSigner>,
    classifier: Arc<dyn Classifier>,
    policy: RetryPolicy,
    cost: CostModel,
    prompt: String,
}

/// Outcome of classifying a single image, including inline transient retries.
#[derive(Debug)]
enum Attempt {
    Classified(ImageRecord),
    /// The model answered but no known label matched.
    Unrecognised(ImageRecord),
    RateLimited { item: ImageRecord, remaining: u32 },
    Transient(ImageRecord),
    Rejected(ImageRecord),
}

impl Attempt {
    fn stops_pass(&self) -> bool {
        !matches!(self, Attempt::Classified(_) | Attempt::Unrecognised(_))
    }

    fn outcome(&self) -> &'static str {
        match self {
            Attempt::Classified(_) => "classified",
            Attempt::Unrecognised(_) => "unrecognised",
            Attempt::RateLimited { .. } => "rate_limited",
            Attempt::Transient(_) => "transient",
            Attempt::Rejected(_) => "rejected",
        }
    }
}

/// Why a single classification call failed.
enum ItemFailure {
    RateLimited { remaining: u32 },
    Rejected(String),
    Transient(String),
}

impl From<ClassifyError> for ItemFailure {
    fn from(e: ClassifyError) -> Self {
        match e {
            ClassifyError::RateLimited { remaining } => ItemFailure::RateLimited { remaining },
            e if e.is_transient() => ItemFailure::Transient(e.to_string()),
            e => ItemFailure::Rejected(e.to_string()),
        }
    }
}

impl BatchClassifier {
    pub fn new(
        store: Arc<dyn RecordStore>,
        signer: Arc<dyn ReadUrlSigner>,
        classifier: Arc<dyn Classifier>,
        policy: RetryPolicy,
        cost: CostModel,
    ) -> Self {
        Self {
            store,
            signer,
            classifier,
            policy,
            cost,
            prompt: classification_prompt(),
        }
    }

    /// Classify the still-unclassified images of `request_id` one at a time.
    ///
    /// Stops at the first rate limit, escalated transient error or rejected
    /// call; everything not classified is returned as retryable. Classified
    /// images are written back before returning.
    pub async fn run(&self, request_id: &str, retry_count: u32) -> Result<BatchResult, BatchError> {
        let pending = self
            .store
            .query_unclassified(request_id)
            .await
            .map_err(BatchError::Query)?;

        tracing::info!(
            request_id = %request_id,
            retry_count,
            pending = pending.len(),
            "Starting classification pass"
        );

        let mut attempts = Vec::with_capacity(pending.len());
        let mut queue = pending.into_iter();
        for item in queue.by_ref() {
            let attempt = self.attempt(item).await;
            metrics::counter!("classification_items_total", "outcome" => attempt.outcome())
                .increment(1);
            let stop = attempt.stops_pass();
            attempts.push(attempt);
            if stop {
                break;
            }
        }
        let unexamined: Vec<ImageRecord> = queue.collect();

        let result = fold_attempts(request_id, retry_count, &self.policy, attempts, unexamined);

        self.store
            .upsert_batch(&result.succeeded_items, request_id)
            .await
            .map_err(BatchError::StorageWrite)?;

        metrics::counter!("classification_passes_total").increment(1);
        if result.rate_limited {
            metrics::counter!("classification_rate_limited_total").increment(1);
        }

        tracing::info!(
            request_id = %request_id,
            succeeded = result.succeeded_items.len(),
            retryable = result.retryable_items.len(),
            rate_limited = result.rate_limited,
            wait_seconds = result.wait_seconds,
            fatal = result.fatal,
            "Classification pass finished"
        );

        Ok(result)
    }

    async fn attempt(&self, item: ImageRecord) -> Attempt {
        let start = Instant::now();
        let mut transient_failures = 0;

        loop {
            match self.classify_once(&item).await {
                Ok((Some(label), total_tokens)) => {
                    let elapsed = start.elapsed();
                    metrics::histogram!("classification_item_seconds").record(elapsed.as_secs_f64());
                    return Attempt::Classified(self.classified(
                        item,
                        label,
                        total_tokens,
                        elapsed.as_millis() as i64,
                    ));
                }
                Ok((None, _)) => {
                    tracing::info!(image_id = %item.image_id, "No known label in model answer");
                    return Attempt::Unrecognised(item);
                }
                Err(ItemFailure::RateLimited { remaining }) => {
                    tracing::warn!(image_id = %item.image_id, remaining, "Vision API rate limit hit");
                    return Attempt::RateLimited { item, remaining };
                }
                Err(ItemFailure::Rejected(reason)) => {
                    tracing::error!(image_id = %item.image_id, reason = %reason, "Vision API rejected request");
                    return Attempt::Rejected(item);
                }
                Err(ItemFailure::Transient(reason)) => {
                    if transient_failures < self.policy.transient_item_retries {
                        transient_failures += 1;
                        tracing::warn!(
                            image_id = %item.image_id,
                            attempt = transient_failures,
                            reason = %reason,
                            "Transient classification error, retrying item"
                        );
                        sleep(self.policy.transient_retry_delay).await;
                        continue;
                    }
                    tracing::warn!(image_id = %item.image_id, reason = %reason, "Transient classification error");
                    return Attempt::Transient(item);
                }
            }
        }
    }

    async fn classify_once(&self, item: &ImageRecord) -> Result<(Option<Label>, u64), ItemFailure> {
        let url = self
            .signer
            .read_url(&item.source_ref)
            .await
            .map_err(|e| ItemFailure::Transient(e.to_string()))?;
        let classification = self.classifier.classify(&url, &self.prompt).await?;
        Ok((classification.label, classification.total_tokens))
    }

    fn classified(
        &self,
        item: ImageRecord,
        label: Label,
        total_tokens: u64,
        processing_time_ms: i64,
    ) -> ImageRecord {
        ImageRecord {
            classification: Some(label),
            confidence: VISION_CONFIDENCE,
            cost: self.cost.cost(total_tokens),
            processing_time_ms,
            service_name: Some(self.classifier.service_name().to_string()),
            updated_at: Utc::now(),
            ..item
        }
    }
}

/// Combine per-item attempts and the untouched remainder into a pass result.
fn fold_attempts(
    request_id: &str,
    retry_count: u32,
    policy: &RetryPolicy,
    attempts: Vec<Attempt>,
    unexamined: Vec<ImageRecord>,
) -> BatchResult {
    let mut result = BatchResult {
        request_id: request_id.to_string(),
        succeeded_items: Vec::new(),
        retryable_items: Vec::new(),
        rate_limited: false,
        wait_seconds: 0,
        retry_count: retry_count + 1,
        fatal: false,
    };

    for attempt in attempts {
        match attempt {
            Attempt::Classified(item) => result.succeeded_items.push(item),
            Attempt::Unrecognised(item) => result.retryable_items.push(item),
            Attempt::RateLimited { item, remaining } => {
                result.rate_limited = true;
                result.wait_seconds = policy.rate_limit_wait_seconds(remaining);
                result.retryable_items.push(item);
            }
            Attempt::Transient(item) => {
                result.rate_limited = true;
                result.wait_seconds = policy.rate_limit_short_wait_seconds;
                result.retryable_items.push(item);
            }
            Attempt::Rejected(item) => {
                result.fatal = true;
                result.retryable_items.push(item);
            }
        }
    }
    result.retryable_items.extend(unexamined);

    if retry_count > policy.max_rate_limit_retries {
        result.rate_limited = false;
    }

    result
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Failed to load unclassified images: {0}")]
    Query(#[source] StoreError),

    #[error("Failed to store classified images: {0}")]
    StorageWrite(#[source] StoreError),
}
