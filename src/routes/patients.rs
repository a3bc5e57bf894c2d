use crate::commands;
use crate::state::AppState;
use axum::{
    routing::{delete, get, post, put},
    Router,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/patients", get(commands::patients::list_patients))
        .route("/api/patients", post(commands::patients::create_patient))
        .route("/api/patients/:id", put(commands::patients::update_patient))
        .route(
            "/api/patients/:id",
            delete(commands::patients::delete_patient),
        )
}
