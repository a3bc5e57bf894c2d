use crate::commands;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/metrics/manual",
            post(commands::metrics::record_manual_entry),
        )
        .route(
            "/api/metrics/summary",
            get(commands::metrics::get_metrics_summary),
        )
}
