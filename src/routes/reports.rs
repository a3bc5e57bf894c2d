use crate::commands;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/reports/generate",
            post(commands::reports::generate_report),
        )
        .route(
            "/api/reports/generate-all",
            post(commands::reports::generate_all_reports),
        )
        .route("/api/reports/send", post(commands::reports::send_reports))
        .route(
            "/api/reports/send-all-now",
            post(commands::reports::send_all_now),
        )
        .route("/api/reports", get(commands::reports::list_reports))
        .route(
            "/api/reports/months",
            get(commands::reports::list_available_months),
        )
        .route(
            "/api/reports/:id/download",
            get(commands::reports::download_report),
        )
}
