use image_description::{
    config::AppConfig,
    db::{self, image_queries::PgRecordStore, queries},
    models::{classification::Terminal, job::RequestStatus},
    routes::metrics::describe_metrics,
    services::{
        batch::BatchClassifier,
        classifier::VisionClient,
        orchestrator::RetryOrchestrator,
        queue::{QueuedRequest, RequestQueue},
        storage::ObjectStorage,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

type WorkerError = Box<dyn std::error::Error + Send + Sync>;

/// Everything a request task needs.
struct Worker {
    db: PgPool,
    queue: RequestQueue,
    orchestrator: RetryOrchestrator,
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting image classification worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let metrics_addr: SocketAddr = config
        .worker_metrics_addr
        .parse()
        .expect("Invalid WORKER_METRICS_ADDR");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    describe_metrics();

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let storage = ObjectStorage::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
        config.presign_expiry_secs,
    )
    .expect("Failed to initialize object storage client");

    let queue = RequestQueue::new(&config.redis_url).expect("Failed to initialize request queue");

    let vision = VisionClient::new(
        &config.openai_base_url,
        &config.openai_api_key,
        &config.vision_model,
        Duration::from_secs(config.classify_timeout_secs),
    )
    .expect("Failed to initialize vision client");

    let batch = BatchClassifier::new(
        Arc::new(PgRecordStore::new(db_pool.clone())),
        Arc::new(storage),
        Arc::new(vision),
        config.retry_policy(),
        config.cost_model(),
    );

    let (abort_tx, abort_rx) = watch::channel(false);
    let orchestrator =
        RetryOrchestrator::new(Arc::new(batch), config.retry_policy()).with_abort(abort_rx.clone());

    let worker = Arc::new(Worker {
        db: db_pool,
        queue,
        orchestrator,
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested, aborting in-flight requests");
            let _ = abort_tx.send(true);
        }
    });

    let permits = Arc::new(Semaphore::new(config.worker_concurrency.max(1)));
    let mut tasks = JoinSet::new();

    tracing::info!(
        concurrency = config.worker_concurrency,
        "Worker ready, starting request loop"
    );

    while !*abort_rx.borrow() {
        let permit = match permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };

        // Reap finished tasks so the set does not grow unbounded
        while tasks.try_join_next().is_some() {}

        match worker.queue.dequeue().await {
            Ok(Some(request)) => {
                let worker = worker.clone();
                tasks.spawn(async move {
                    if let Err(e) = worker.process_request(&request).await {
                        tracing::error!(request_id = %request.request_id, error = %e, "Request handling failed");
                    }
                    drop(permit);
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No requests available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to dequeue request, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }

        if let Ok(depth) = worker.queue.queue_depth().await {
            metrics::gauge!("classification_queue_depth").set(depth as f64);
        }
    }

    tracing::info!(in_flight = tasks.len(), "Waiting for in-flight requests");
    while tasks.join_next().await.is_some() {}
    tracing::info!("Worker stopped");
}

impl Worker {
    /// Run the orchestrator for one queued request and record its terminal state.
    ///
    /// The request leaves the processing list on every path: completed once
    /// its terminal state is recorded, or handed back to the queue.
    async fn process_request(&self, request: &QueuedRequest) -> Result<(), WorkerError> {
        tracing::info!(
            request_id = %request.request_id,
            retry_count = request.retry_count,
            "Processing classification request"
        );

        if let Err(e) =
            queries::update_request_status(&self.db, &request.request_id, RequestStatus::Classifying)
                .await
        {
            tracing::warn!(request_id = %request.request_id, error = %e, "Failed to mark request as classifying");
        }

        let outcome = self
            .orchestrator
            .run(&request.request_id, request.retry_count)
            .await;

        if outcome.terminal == Terminal::Aborted {
            self.queue
                .requeue(request, &QueuedRequest::resume_from(&outcome))
                .await?;
            if let Err(e) =
                queries::update_request_status(&self.db, &outcome.request_id, RequestStatus::Pending)
                    .await
            {
                tracing::warn!(request_id = %outcome.request_id, error = %e, "Failed to mark request as pending");
            }
            tracing::info!(request_id = %outcome.request_id, "Request re-queued after abort");
            return Ok(());
        }

        let status = if outcome.terminal == Terminal::Done {
            RequestStatus::Completed
        } else {
            RequestStatus::Failed
        };
        if let Err(e) = queries::finish_request(
            &self.db,
            &outcome.request_id,
            status,
            outcome.unclassified_count as i32,
            outcome.retry_count as i32,
            outcome.error.as_deref(),
        )
        .await
        {
            // Classified images are already stored; a rerun only redoes the rest
            tracing::error!(request_id = %outcome.request_id, error = %e, "Failed to record terminal state, re-queueing");
            self.queue
                .requeue(request, &QueuedRequest::resume_from(&outcome))
                .await?;
            return Err(e.into());
        }

        self.queue.complete(request).await?;
        tracing::info!(
            request_id = %outcome.request_id,
            terminal = ?outcome.terminal,
            passes = outcome.passes,
            unclassified = outcome.unclassified_count,
            "Request finished"
        );
        Ok(())
    }
}
