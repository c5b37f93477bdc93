use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::image::ImageRecord;

/// What a caller supplies to start or resume classification of a request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyInvocation {
    #[garde(ascii, length(min = 1, max = 128), custom(key_safe))]
    pub request_id: String,

    #[garde(skip)]
    #[serde(default)]
    pub retry_count: u32,
}

/// Request ids end up in object keys; keep them to `[A-Za-z0-9_-]`.
fn key_safe(value: &str, _ctx: &()) -> garde::Result {
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Ok(())
    } else {
        Err(garde::Error::new("may only contain letters, digits, '-' and '_'"))
    }
}

/// Output of one classification pass over a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub request_id: String,
    /// Items classified during this pass, in processing order.
    pub succeeded_items: Vec<ImageRecord>,
    /// Items still unclassified, including those never attempted.
    pub retryable_items: Vec<ImageRecord>,
    pub rate_limited: bool,
    pub wait_seconds: u64,
    pub retry_count: u32,
    pub fatal: bool,
}

impl BatchResult {
    pub fn unclassified_count(&self) -> usize {
        self.retryable_items.len()
    }
}

/// How an orchestrator run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    Done,
    Failed,
    Aborted,
}

/// State of the classification loop for one request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OrchestratorState {
    Classifying,
    WaitRateLimited { seconds: u64 },
    WaitShortPoll { seconds: u64 },
    Failed,
    Done,
}

impl OrchestratorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrchestratorState::Failed | OrchestratorState::Done)
    }
}

/// What a host scheduler receives once an orchestrator run ends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorOutcome {
    pub request_id: String,
    pub terminal: Terminal,
    pub unclassified_count: usize,
    pub rate_limited: bool,
    pub wait_seconds: u64,
    pub retry_count: u32,
    /// Completed passes.
    pub passes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Every state entered after the initial `Classifying`.
    pub transitions: Vec<OrchestratorState>,
}
