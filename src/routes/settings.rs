use crate::commands;
use crate::state::AppState;
use axum::{
    routing::{get, put},
    Router,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/settings", get(commands::settings::get_settings))
        .route("/api/settings", put(commands::settings::update_settings))
}
