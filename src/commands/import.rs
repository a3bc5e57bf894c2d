use crate::commands::metrics::{
    insert_realisation, require_month, upsert_devis, upsert_encours, upsert_jours_ouverts,
    upsert_rendezvous, AppointmentFields, EncoursFields, HoursFields, MetricKind, QuoteFields,
    RealisationFields,
};
use crate::commands::settings;
use crate::db::DbPool;
use crate::error::{ApiError, ApiResult};
use crate::middleware::auth::Claims;
use crate::state::AppState;
use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub kind: MetricKind,
    pub rows: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRowError {
    pub row: usize,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub imported_count: usize,
    pub errors: Vec<ImportRowError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportRow<F> {
    practitioner: Option<String>,
    month: Option<String>,
    #[serde(flatten)]
    fields: F,
}

fn required_practitioner(practitioner: &Option<String>) -> ApiResult<&str> {
    match practitioner.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => Ok(code),
        _ => Err(ApiError::InvalidInput(
            "Le code praticien est requis.".to_string(),
        )),
    }
}

async fn import_row(pool: &DbPool, kind: MetricKind, row: &serde_json::Value) -> ApiResult<()> {
    match kind {
        MetricKind::Realisation => {
            let parsed: ImportRow<RealisationFields> = serde_json::from_value(row.clone())?;
            let code = required_practitioner(&parsed.practitioner)?;
            let month = require_month(&parsed.month)?;
            insert_realisation(pool, code, month, &parsed.fields).await?;
        }
        MetricKind::Rendezvous => {
            let parsed: ImportRow<AppointmentFields> = serde_json::from_value(row.clone())?;
            let code = required_practitioner(&parsed.practitioner)?;
            let month = require_month(&parsed.month)?;
            upsert_rendezvous(pool, code, month, &parsed.fields).await?;
        }
        MetricKind::JoursOuverts => {
            let parsed: ImportRow<HoursFields> = serde_json::from_value(row.clone())?;
            let code = required_practitioner(&parsed.practitioner)?;
            let month = require_month(&parsed.month)?;
            upsert_jours_ouverts(pool, code, month, &parsed.fields).await?;
        }
        MetricKind::Devis => {
            let parsed: ImportRow<QuoteFields> = serde_json::from_value(row.clone())?;
            let code = required_practitioner(&parsed.practitioner)?;
            let month = require_month(&parsed.month)?;
            upsert_devis(pool, code, month, &parsed.fields).await?;
        }
        MetricKind::Encours => {
            // Rows without a practitioner feed the shared GLOBAL gauge.
            let parsed: ImportRow<EncoursFields> = serde_json::from_value(row.clone())?;
            let code = parsed
                .practitioner
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty());
            upsert_encours(pool, code, &parsed.fields).await?;
        }
    }
    Ok(())
}

// Row failures are collected, not fatal. One bad line must not sink the batch.
pub async fn import_batch_internal(
    pool: &DbPool,
    kind: MetricKind,
    rows: &[serde_json::Value],
) -> ApiResult<ImportResult> {
    let mut imported_count = 0;
    let mut errors = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        match import_row(pool, kind, row).await {
            Ok(()) => imported_count += 1,
            Err(e) => {
                tracing::warn!(row = index, error = %e, "import row rejected");
                errors.push(ImportRowError {
                    row: index,
                    error: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        imported = imported_count,
        rejected = errors.len(),
        "import batch finished"
    );
    Ok(ImportResult {
        imported_count,
        errors,
    })
}

pub async fn import_batch(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ImportRequest>,
) -> ApiResult<Json<ImportResult>> {
    claims.require_admin()?;

    let app_settings = settings::get_or_create(&state.pool).await?;
    if !app_settings.import_enabled {
        return Err(ApiError::Forbidden(
            "L'import de données est désactivé.".to_string(),
        ));
    }

    let result = import_batch_internal(&state.pool, payload.kind, &payload.rows).await?;
    Ok(Json(result))
}
