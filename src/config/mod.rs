use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the request queue
    pub redis_url: String,

    /// Bucket holding source and resized images
    pub s3_bucket: String,

    /// S3-compatible endpoint URL
    pub s3_endpoint: String,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    pub s3_access_key: String,

    pub s3_secret_key: String,

    /// Lifetime of the presigned read URLs handed to the vision model
    #[serde(default = "default_presign_expiry_secs")]
    pub presign_expiry_secs: u32,

    /// API key for the vision model endpoint
    pub openai_api_key: String,

    /// Base URL of an OpenAI-compatible chat completions API
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// Per-call timeout for a single classification request
    #[serde(default = "default_classify_timeout_secs")]
    pub classify_timeout_secs: u64,

    #[serde(default = "default_price_per_token")]
    pub price_per_token: f64,

    #[serde(default = "default_fixed_per_image_cost")]
    pub fixed_per_image_cost: f64,

    /// Prometheus listener of the worker process
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,

    /// Number of requests a worker classifies in parallel
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_short_poll_seconds")]
    pub short_poll_seconds: u64,

    #[serde(default = "default_rate_limit_short_wait_seconds")]
    pub rate_limit_short_wait_seconds: u64,

    #[serde(default = "default_rate_limit_long_wait_seconds")]
    pub rate_limit_long_wait_seconds: u64,

    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    #[serde(default = "default_outer_max_attempts")]
    pub outer_max_attempts: u32,

    #[serde(default = "default_outer_backoff_base_seconds")]
    pub outer_backoff_base_seconds: u64,

    #[serde(default = "default_outer_backoff_rate")]
    pub outer_backoff_rate: f64,

    #[serde(default = "default_outer_max_backoff_seconds")]
    pub outer_max_backoff_seconds: u64,

    #[serde(default = "default_max_passes")]
    pub max_passes: u32,

    #[serde(default)]
    pub transient_item_retries: u32,

    #[serde(default = "default_transient_retry_delay_ms")]
    pub transient_retry_delay_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_s3_region() -> String {
    "auto".to_string()
}

fn default_presign_expiry_secs() -> u32 {
    900
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_vision_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_classify_timeout_secs() -> u64 {
    30
}

fn default_price_per_token() -> f64 {
    0.00001
}

fn default_fixed_per_image_cost() -> f64 {
    0.001
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_short_poll_seconds() -> u64 {
    5
}

fn default_rate_limit_short_wait_seconds() -> u64 {
    60
}

fn default_rate_limit_long_wait_seconds() -> u64 {
    600
}

fn default_max_rate_limit_retries() -> u32 {
    2
}

fn default_outer_max_attempts() -> u32 {
    30
}

fn default_outer_backoff_base_seconds() -> u64 {
    60
}

fn default_outer_backoff_rate() -> f64 {
    2.0
}

fn default_outer_max_backoff_seconds() -> u64 {
    3600
}

fn default_max_passes() -> u32 {
    100
}

fn default_transient_retry_delay_ms() -> u64 {
    1000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            short_poll_seconds: self.short_poll_seconds,
            rate_limit_short_wait_seconds: self.rate_limit_short_wait_seconds,
            rate_limit_long_wait_seconds: self.rate_limit_long_wait_seconds,
            max_rate_limit_retries: self.max_rate_limit_retries,
            outer_max_attempts: self.outer_max_attempts,
            outer_backoff_base_seconds: self.outer_backoff_base_seconds,
            outer_backoff_rate: self.outer_backoff_rate,
            outer_max_backoff_seconds: self.outer_max_backoff_seconds,
            max_passes: self.max_passes,
            transient_item_retries: self.transient_item_retries,
            transient_retry_delay: Duration::from_millis(self.transient_retry_delay_ms),
        }
    }

    pub fn cost_model(&self) -> CostModel {
        CostModel {
            price_per_token: self.price_per_token,
            fixed_per_image_cost: self.fixed_per_image_cost,
        }
    }
}

/// Waits, caps and backoff parameters of the classification loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Pause before re-running a pass that left items unclassified.
    pub short_poll_seconds: u64,
    /// Rate-limit wait when the backend still reports remaining allowance.
    pub rate_limit_short_wait_seconds: u64,
    /// Rate-limit wait when the allowance is exhausted.
    pub rate_limit_long_wait_seconds: u64,
    /// Passes with a retry count above this never report a rate limit.
    pub max_rate_limit_retries: u32,
    pub outer_max_attempts: u32,
    pub outer_backoff_base_seconds: u64,
    pub outer_backoff_rate: f64,
    pub outer_max_backoff_seconds: u64,
    pub max_passes: u32,
    /// Inline retries of an item after a transient error before the pass
    /// escalates. Zero escalates on the first transient error.
    pub transient_item_retries: u32,
    pub transient_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            short_poll_seconds: default_short_poll_seconds(),
            rate_limit_short_wait_seconds: default_rate_limit_short_wait_seconds(),
            rate_limit_long_wait_seconds: default_rate_limit_long_wait_seconds(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
            outer_max_attempts: default_outer_max_attempts(),
            outer_backoff_base_seconds: default_outer_backoff_base_seconds(),
            outer_backoff_rate: default_outer_backoff_rate(),
            outer_max_backoff_seconds: default_outer_max_backoff_seconds(),
            max_passes: default_max_passes(),
            transient_item_retries: 0,
            transient_retry_delay: Duration::from_millis(default_transient_retry_delay_ms()),
        }
    }
}

impl RetryPolicy {
    /// Wait recommended for a rate-limit signal carrying `remaining` requests.
    pub fn rate_limit_wait_seconds(&self, remaining: u32) -> u64 {
        if remaining == 0 {
            self.rate_limit_long_wait_seconds
        } else {
            self.rate_limit_short_wait_seconds
        }
    }

    /// Backoff before outer attempt `attempt + 1`, where `attempt` counts
    /// failed invocations so far (1-based).
    pub fn outer_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.outer_backoff_base_seconds as f64 * self.outer_backoff_rate.powi(exponent);
        let capped = secs.min(self.outer_max_backoff_seconds as f64).max(0.0);
        Duration::from_secs_f64(capped)
    }
}

/// Pricing of a single classification call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    pub price_per_token: f64,
    pub fixed_per_image_cost: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            price_per_token: default_price_per_token(),
            fixed_per_image_cost: default_fixed_per_image_cost(),
        }
    }
}

impl CostModel {
    pub fn cost(&self, total_tokens: u64) -> f64 {
        total_tokens as f64 * self.price_per_token + self.fixed_per_image_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_wait_exceeds_short_wait() {
        let policy = RetryPolicy::default();
        assert!(policy.rate_limit_wait_seconds(0) > policy.rate_limit_wait_seconds(1));
        assert_eq!(policy.rate_limit_wait_seconds(17), 60);
        assert_eq!(policy.rate_limit_wait_seconds(0), 600);
    }

    #[test]
    fn test_outer_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.outer_backoff(1), Duration::from_secs(60));
        assert_eq!(policy.outer_backoff(2), Duration::from_secs(120));
        assert_eq!(policy.outer_backoff(3), Duration::from_secs(240));
    }

    #[test]
    fn test_outer_backoff_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.outer_backoff(29), Duration::from_secs(3600));
    }

    #[test]
    fn test_cost_model() {
        let model = CostModel {
            price_per_token: 0.00001,
            fixed_per_image_cost: 0.001,
        };
        let cost = model.cost(1000);
        assert!((cost - 0.011).abs() < 1e-12);
        assert!((model.cost(0) - 0.001).abs() < 1e-12);
    }
}
