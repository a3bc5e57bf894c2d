use crate::commands;
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/dashboard/overview",
            get(commands::dashboard::get_overview),
        )
        .route(
            "/api/dashboard/kpi",
            get(commands::dashboard::get_practitioner_kpi),
        )
}
