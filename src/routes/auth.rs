use crate::commands;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/login", post(commands::auth::login))
        .route("/api/auth/check", get(commands::auth::check_auth))
        .route(
            "/api/auth/practitioners",
            get(commands::auth::list_practitioners),
        )
        .route("/api/auth/users", post(commands::auth::create_account))
}
