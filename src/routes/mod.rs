use crate::state::AppState;
use axum::Router;

pub mod auth;
pub mod dashboard;
pub mod import;
pub mod metrics;
pub mod patients;
pub mod reports;
pub mod settings;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .merge(dashboard::router())
        .merge(metrics::router())
        .merge(import::router())
        .merge(patients::router())
        .merge(reports::router())
        .merge(settings::router())
}
