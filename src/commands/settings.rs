use crate::db::{AppSettings, DbPool};
use crate::error::{ApiError, ApiResult};
use crate::middleware::auth::Claims;
use crate::state::AppState;
use axum::extract::State;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;

// Settings live in one pinned row, created on first access.
pub async fn get_or_create(pool: &DbPool) -> ApiResult<AppSettings> {
    if let Some(existing) =
        sqlx::query_as::<_, AppSettings>("SELECT * FROM app_settings WHERE id = 1")
            .fetch_optional(pool)
            .await?
    {
        return Ok(existing);
    }

    sqlx::query("INSERT INTO app_settings (id) VALUES (1) ON CONFLICT (id) DO NOTHING")
        .execute(pool)
        .await?;
    let created = sqlx::query_as::<_, AppSettings>("SELECT * FROM app_settings WHERE id = 1")
        .fetch_one(pool)
        .await?;
    Ok(created)
}

pub async fn get_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<AppSettings>> {
    claims.require_admin()?;
    let settings = get_or_create(&state.pool).await?;
    Ok(Json(settings))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    pub auto_generation: Option<bool>,
    pub auto_email: Option<bool>,
    pub cron_hour: Option<i32>,
    pub maintenance_mode: Option<bool>,
    pub ai_models_enabled: Option<bool>,
    pub import_enabled: Option<bool>,
    pub dynamic_mode_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub clear_dynamic_mode: bool,
}

pub async fn update_settings_internal(
    pool: &DbPool,
    payload: &UpdateSettingsRequest,
) -> ApiResult<AppSettings> {
    if let Some(hour) = payload.cron_hour {
        if !(0..=23).contains(&hour) {
            return Err(ApiError::InvalidInput(
                "L'heure planifiée doit être comprise entre 0 et 23.".to_string(),
            ));
        }
    }

    let current = get_or_create(pool).await?;
    let dynamic_mode_expires_at = if payload.clear_dynamic_mode {
        None
    } else {
        payload
            .dynamic_mode_expires_at
            .or(current.dynamic_mode_expires_at)
    };

    let updated = sqlx::query_as::<_, AppSettings>(
        "UPDATE app_settings SET
            auto_generation = $1,
            auto_email = $2,
            cron_hour = $3,
            maintenance_mode = $4,
            ai_models_enabled = $5,
            import_enabled = $6,
            dynamic_mode_expires_at = $7,
            updated_at = now()
         WHERE id = 1
         RETURNING *",
    )
    .bind(payload.auto_generation.unwrap_or(current.auto_generation))
    .bind(payload.auto_email.unwrap_or(current.auto_email))
    .bind(payload.cron_hour.unwrap_or(current.cron_hour))
    .bind(payload.maintenance_mode.unwrap_or(current.maintenance_mode))
    .bind(payload.ai_models_enabled.unwrap_or(current.ai_models_enabled))
    .bind(payload.import_enabled.unwrap_or(current.import_enabled))
    .bind(dynamic_mode_expires_at)
    .fetch_one(pool)
    .await?;
    Ok(updated)
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UpdateSettingsRequest>,
) -> ApiResult<Json<AppSettings>> {
    claims.require_admin()?;
    let updated = update_settings_internal(&state.pool, &payload).await?;
    tracing::info!(
        auto_generation = updated.auto_generation,
        auto_email = updated.auto_email,
        cron_hour = updated.cron_hour,
        "settings updated"
    );
    Ok(Json(updated))
}
