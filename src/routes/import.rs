use crate::commands;
use crate::state::AppState;
use axum::{routing::post, Router};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/import", post(commands::import::import_batch))
}
