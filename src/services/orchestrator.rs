use async_trait::async_trait;
use garde::Validate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::config::RetryPolicy;
use crate::models::classification::{
    BatchResult, ClassifyInvocation, OrchestratorOutcome, OrchestratorState, Terminal,
};
use crate::services::batch::{BatchClassifier, BatchError};

/// One classification pass, as seen by the orchestrator.
#[async_trait]
pub trait PassRunner: Send + Sync {
    async fn run_pass(&self, request_id: &str, retry_count: u32) -> Result<BatchResult, BatchError>;
}

#[async_trait]
impl PassRunner for BatchClassifier {
    async fn run_pass(&self, request_id: &str, retry_count: u32) -> Result<BatchResult, BatchError> {
        self.run(request_id, retry_count).await
    }
}

/// State entered after a pass produced `result`.
///
/// | condition (first match wins) | next state       |
/// |------------------------------|------------------|
/// | `rate_limited`               | `WaitRateLimited`|
/// | `fatal`                      | `Failed`         |
/// | retryable items remain       | `WaitShortPoll`  |
/// | otherwise                    | `Done`           |
pub fn next_state(result: &BatchResult, policy: &RetryPolicy) -> OrchestratorState {
    if result.rate_limited {
        OrchestratorState::WaitRateLimited {
            seconds: result.wait_seconds,
        }
    } else if result.fatal {
        OrchestratorState::Failed
    } else if !result.retryable_items.is_empty() {
        OrchestratorState::WaitShortPoll {
            seconds: policy.short_poll_seconds,
        }
    } else {
        OrchestratorState::Done
    }
}

/// Drives classification passes for one request until it is done or failed.
pub struct RetryOrchestrator {
    runner: Arc<dyn PassRunner>,
    policy: RetryPolicy,
    abort: Option<watch::Receiver<bool>>,
}

/// Progress of a single run.
struct Progress {
    request_id: String,
    retry_count: u32,
    passes: u32,
    last: Option<BatchResult>,
    transitions: Vec<OrchestratorState>,
}

impl Progress {
    fn finish(self, terminal: Terminal, error: Option<String>) -> OrchestratorOutcome {
        let (unclassified_count, rate_limited, wait_seconds) = match &self.last {
            Some(r) => (r.unclassified_count(), r.rate_limited, r.wait_seconds),
            None => (0, false, 0),
        };
        OrchestratorOutcome {
            request_id: self.request_id,
            terminal,
            unclassified_count,
            rate_limited,
            wait_seconds,
            retry_count: self.retry_count,
            passes: self.passes,
            error,
            transitions: self.transitions,
        }
    }
}

impl RetryOrchestrator {
    pub fn new(runner: Arc<dyn PassRunner>, policy: RetryPolicy) -> Self {
        Self {
            runner,
            policy,
            abort: None,
        }
    }

    /// Stop scheduling passes once `abort` turns true.
    pub fn with_abort(mut self, abort: watch::Receiver<bool>) -> Self {
        self.abort = Some(abort);
        self
    }

    /// Run the classification loop for `request_id`, starting from `retry_count`.
    pub async fn run(&self, request_id: &str, retry_count: u32) -> OrchestratorOutcome {
        let mut progress = Progress {
            request_id: request_id.to_string(),
            retry_count,
            passes: 0,
            last: None,
            transitions: Vec::new(),
        };

        let invocation = ClassifyInvocation {
            request_id: request_id.to_string(),
            retry_count,
        };
        if let Err(report) = invocation.validate() {
            return self.fail(progress, OrchestratorError::InvalidRequestId(report.to_string()));
        }

        loop {
            if self.is_aborted() {
                return self.aborted(progress);
            }
            if progress.passes >= self.policy.max_passes {
                let passes = progress.passes;
                return self.fail(progress, OrchestratorError::PassLimit { passes });
            }

            let result = match self.invoke_with_retry(request_id, progress.retry_count).await {
                Ok(result) => result,
                Err(OrchestratorError::Aborted) => return self.aborted(progress),
                Err(e) => return self.fail(progress, e),
            };

            progress.passes += 1;
            progress.retry_count = result.retry_count;
            let next = next_state(&result, &self.policy);
            progress.last = Some(result);
            progress.transitions.push(next);

            tracing::info!(
                request_id = %request_id,
                retry_count = progress.retry_count,
                passes = progress.passes,
                next = ?next,
                "Orchestrator transition"
            );

            match next {
                OrchestratorState::WaitRateLimited { seconds }
                | OrchestratorState::WaitShortPoll { seconds } => {
                    if progress.passes >= self.policy.max_passes {
                        let passes = progress.passes;
                        return self.fail(progress, OrchestratorError::PassLimit { passes });
                    }
                    if !self.pause(Duration::from_secs(seconds)).await {
                        return self.aborted(progress);
                    }
                    progress.transitions.push(OrchestratorState::Classifying);
                }
                OrchestratorState::Failed => {
                    return self.fail(progress, OrchestratorError::FatalPass);
                }
                OrchestratorState::Done => {
                    metrics::counter!("classification_requests_total", "terminal" => "done")
                        .increment(1);
                    tracing::info!(
                        request_id = %request_id,
                        passes = progress.passes,
                        "All images classified"
                    );
                    return progress.finish(Terminal::Done, None);
                }
                OrchestratorState::Classifying => {}
            }
        }
    }

    /// Invoke one pass, retrying failed invocations with exponential backoff.
    async fn invoke_with_retry(
        &self,
        request_id: &str,
        retry_count: u32,
    ) -> Result<BatchResult, OrchestratorError> {
        let mut failures = 0;
        loop {
            match self.runner.run_pass(request_id, retry_count).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    failures += 1;
                    if failures > self.policy.outer_max_attempts {
                        return Err(OrchestratorError::OuterRetriesExhausted {
                            attempts: failures,
                            source: e,
                        });
                    }
                    let backoff = self.policy.outer_backoff(failures);
                    tracing::warn!(
                        request_id = %request_id,
                        attempt = failures,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "Classification pass failed, retrying"
                    );
                    if !self.pause(backoff).await {
                        return Err(OrchestratorError::Aborted);
                    }
                }
            }
        }
    }

    /// Sleep for `duration`; false if aborted first.
    async fn pause(&self, duration: Duration) -> bool {
        let Some(abort) = &self.abort else {
            sleep(duration).await;
            return true;
        };
        if *abort.borrow() {
            return false;
        }
        tokio::select! {
            _ = sleep(duration) => true,
            _ = wait_for_abort(abort.clone()) => false,
        }
    }

    fn is_aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn aborted(&self, progress: Progress) -> OrchestratorOutcome {
        metrics::counter!("classification_requests_total", "terminal" => "aborted").increment(1);
        tracing::warn!(request_id = %progress.request_id, "Classification aborted");
        progress.finish(Terminal::Aborted, Some(OrchestratorError::Aborted.to_string()))
    }

    fn fail(&self, progress: Progress, error: OrchestratorError) -> OrchestratorOutcome {
        metrics::counter!("classification_requests_total", "terminal" => "failed").increment(1);
        tracing::error!(request_id = %progress.request_id, error = %error, "Classification failed");
        progress.finish(Terminal::Failed, Some(error.to_string()))
    }
}

/// Resolves once the abort flag is set. A dropped sender never aborts.
async fn wait_for_abort(mut abort: watch::Receiver<bool>) {
    if abort.wait_for(|aborted| *aborted).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Invalid request id: {0}")]
    InvalidRequestId(String),

    #[error("Classification pass failed {attempts} times: {source}")]
    OuterRetriesExhausted {
        attempts: u32,
        #[source]
        source: BatchError,
    },

    #[error("Classification pass reported an unrecoverable error")]
    FatalPass,

    #[error("Gave up after {passes} passes with images still unclassified")]
    PassLimit { passes: u32 },

    #[error("Aborted")]
    Aborted,
}
