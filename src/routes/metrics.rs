use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for every metric the service emits.
pub fn describe_metrics() {
    metrics::describe_counter!("image_uploads_total", "Images accepted for classification");
    metrics::describe_counter!(
        "classification_passes_total",
        "Completed classification passes"
    );
    metrics::describe_counter!(
        "classification_items_total",
        "Classification attempts by outcome"
    );
    metrics::describe_counter!(
        "classification_rate_limited_total",
        "Passes that ended in a rate-limit wait"
    );
    metrics::describe_histogram!(
        "classification_item_seconds",
        "Time to classify a single image"
    );
    metrics::describe_counter!(
        "classification_requests_total",
        "Requests that reached a terminal state"
    );
    metrics::describe_gauge!(
        "classification_queue_depth",
        "Requests waiting in the queue"
    );
}

/// Prometheus metrics scrape endpoint.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
