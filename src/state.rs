use crate::db::DbPool;
use crate::report::mailer::ReportMailer;
use crate::report::renderer::DocumentRenderer;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub mailer: Arc<dyn ReportMailer>,
}

impl axum::extract::FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}
