use crate::commands::kpi::{
    build_snapshot, fetch_history, fetch_recent_month_totals, trend_percent, KpiSnapshot,
    MonthHistory,
};
use crate::commands::metrics::{current_month_token, ensure_month_token};
use crate::commands::recommend::build_recommendations;
use crate::error::ApiResult;
use crate::middleware::auth::{resolve_practitioner_scope, Claims};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardOverview {
    pub latest_month: Option<String>,
    pub latest_billed_amount: f64,
    pub latest_patient_count: i64,
    pub billed_trend_pct: Option<i64>,
    pub patient_trend_pct: Option<i64>,
    pub active_practitioners: i64,
    pub reports_this_month: i64,
}

pub async fn get_overview(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<DashboardOverview>> {
    claims.require_admin()?;

    let totals = fetch_recent_month_totals(&state.pool, 2).await?;
    let (latest_month, latest_billed_amount, latest_patient_count, billed_trend_pct, patient_trend_pct) =
        match totals.as_slice() {
            [] => (None, 0.0, 0, None, None),
            [latest] => (
                Some(latest.month.clone()),
                latest.billed_amount,
                latest.patient_count,
                None,
                None,
            ),
            [latest, previous, ..] => (
                Some(latest.month.clone()),
                latest.billed_amount,
                latest.patient_count,
                trend_percent(latest.billed_amount, previous.billed_amount),
                trend_percent(latest.patient_count as f64, previous.patient_count as f64),
            ),
        };

    let active_practitioners: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM accounts WHERE role = 'praticien' AND is_active = TRUE",
    )
    .fetch_one(&state.pool)
    .await?;
    let reports_this_month: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM reports WHERE left(month, 6) = $1")
            .bind(current_month_token())
            .fetch_one(&state.pool)
            .await?;

    Ok(Json(DashboardOverview {
        latest_month,
        latest_billed_amount,
        latest_patient_count,
        billed_trend_pct,
        patient_trend_pct,
        active_practitioners,
        reports_this_month,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiQuery {
    pub practitioner_code: Option<String>,
    pub month: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PractitionerKpiView {
    pub kpi: KpiSnapshot,
    pub recommendations: Vec<String>,
    pub history: Vec<MonthHistory>,
}

pub async fn get_practitioner_kpi(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<KpiQuery>,
) -> ApiResult<Json<PractitionerKpiView>> {
    let code = resolve_practitioner_scope(&claims, query.practitioner_code.as_deref())?;
    ensure_month_token(&query.month)?;

    let kpi = build_snapshot(&state.pool, &code, &query.month).await?;
    let recommendations = build_recommendations(&kpi);
    let history = fetch_history(&state.pool, &code, &query.month, 6).await?;
    Ok(Json(PractitionerKpiView {
        kpi,
        recommendations,
        history,
    }))
}
