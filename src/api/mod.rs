use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::inference::classifier::Classifier;
use crate::metrics::MetricsRegistry;

pub mod handlers;

/// Everything a request needs, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub model: Arc<dyn Classifier>,
    pub metrics: MetricsRegistry,
}

impl AppState {
    pub fn new(model: Arc<dyn Classifier>, metrics: MetricsRegistry) -> Self {
        Self { model, metrics }
    }
}

pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/predict", post(handlers::handle_predict_request))
        .route("/metrics", get(handlers::handle_metrics_request))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
