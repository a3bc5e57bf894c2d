use crate::commands::kpi;
use crate::db::{AppointmentRecord, DbPool, HoursRecord, QuoteRecord, RealisationRecord, WipGauge};
use crate::error::{ApiError, ApiResult};
use crate::middleware::auth::{resolve_practitioner_scope, Claims};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

pub const MONTH_NAMES_FR: [&str; 12] = [
    "Janvier",
    "Février",
    "Mars",
    "Avril",
    "Mai",
    "Juin",
    "Juillet",
    "Août",
    "Septembre",
    "Octobre",
    "Novembre",
    "Décembre",
];

// Month tokens are AAAAMM or AAAAMMJJ, stored as supplied. Fixed-width digits
// keep lexicographic order chronological.
pub fn is_valid_month_token(token: &str) -> bool {
    (token.len() == 6 || token.len() == 8) && token.bytes().all(|b| b.is_ascii_digit())
}

pub fn ensure_month_token(token: &str) -> ApiResult<()> {
    if is_valid_month_token(token) {
        Ok(())
    } else {
        Err(ApiError::InvalidInput(format!(
            "Mois invalide: '{}' (format attendu AAAAMM ou AAAAMMJJ).",
            token
        )))
    }
}

// Both token widths address the same month through their first six digits.
pub fn month_prefix(token: &str) -> &str {
    if token.len() >= 6 {
        &token[..6]
    } else {
        token
    }
}

pub fn month_label(token: &str) -> String {
    if token.len() < 6 {
        return token.to_string();
    }
    let year = &token[..4];
    let month: usize = token[4..6].parse().unwrap_or(0);
    if (1..=12).contains(&month) {
        format!("{} {}", MONTH_NAMES_FR[month - 1], year)
    } else {
        token.to_string()
    }
}

pub fn sort_months_desc(mut months: Vec<String>) -> Vec<String> {
    months.sort();
    months.dedup();
    months.reverse();
    months
}

pub fn current_month_token() -> String {
    chrono::Local::now().format("%Y%m").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Realisation,
    Rendezvous,
    JoursOuverts,
    Devis,
    Encours,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealisationFields {
    #[serde(default)]
    pub patient_count: i32,
    #[serde(default)]
    pub billed_amount: f64,
    #[serde(default)]
    pub collected_amount: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentFields {
    #[serde(default)]
    pub appointment_count: i32,
    #[serde(default)]
    pub total_duration_minutes: i32,
    #[serde(default)]
    pub patient_count: i32,
    #[serde(default)]
    pub new_patient_count: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoursFields {
    #[serde(default)]
    pub minutes_open: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteFields {
    #[serde(default)]
    pub quote_count: i32,
    #[serde(default)]
    pub proposed_amount: f64,
    #[serde(default)]
    pub accepted_quote_count: i32,
    #[serde(default)]
    pub accepted_amount: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoursFields {
    #[serde(default)]
    pub remaining_minutes_to_bill: i32,
    #[serde(default)]
    pub remaining_amount_to_bill: f64,
    #[serde(default)]
    pub hourly_profitability: f64,
    #[serde(default)]
    pub worked_days_profitability: f64,
    #[serde(default)]
    pub patients_in_progress: i32,
}

// Plain insert: several rows per (practitioner, month) are legal and summed on read.
pub async fn insert_realisation(
    pool: &DbPool,
    practitioner: &str,
    month: &str,
    fields: &RealisationFields,
) -> ApiResult<RealisationRecord> {
    let record = sqlx::query_as::<_, RealisationRecord>(
        "INSERT INTO realisations (practitioner, month, patient_count, billed_amount, collected_amount)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(practitioner)
    .bind(month)
    .bind(fields.patient_count)
    .bind(fields.billed_amount)
    .bind(fields.collected_amount)
    .fetch_one(pool)
    .await?;
    Ok(record)
}

// Upserts store the six-digit month so either token width lands on the same row.
pub async fn upsert_rendezvous(
    pool: &DbPool,
    practitioner: &str,
    month: &str,
    fields: &AppointmentFields,
) -> ApiResult<AppointmentRecord> {
    let record = sqlx::query_as::<_, AppointmentRecord>(
        "INSERT INTO rendezvous (practitioner, month, appointment_count, total_duration_minutes, patient_count, new_patient_count)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (practitioner, month) DO UPDATE SET
            appointment_count = EXCLUDED.appointment_count,
            total_duration_minutes = EXCLUDED.total_duration_minutes,
            patient_count = EXCLUDED.patient_count,
            new_patient_count = EXCLUDED.new_patient_count,
            updated_at = now()
         RETURNING *",
    )
    .bind(practitioner)
    .bind(month_prefix(month))
    .bind(fields.appointment_count)
    .bind(fields.total_duration_minutes)
    .bind(fields.patient_count)
    .bind(fields.new_patient_count)
    .fetch_one(pool)
    .await?;
    Ok(record)
}

pub async fn upsert_jours_ouverts(
    pool: &DbPool,
    practitioner: &str,
    month: &str,
    fields: &HoursFields,
) -> ApiResult<HoursRecord> {
    let record = sqlx::query_as::<_, HoursRecord>(
        "INSERT INTO jours_ouverts (practitioner, month, minutes_open)
         VALUES ($1, $2, $3)
         ON CONFLICT (practitioner, month) DO UPDATE SET
            minutes_open = EXCLUDED.minutes_open,
            updated_at = now()
         RETURNING *",
    )
    .bind(practitioner)
    .bind(month_prefix(month))
    .bind(fields.minutes_open)
    .fetch_one(pool)
    .await?;
    Ok(record)
}

pub async fn upsert_devis(
    pool: &DbPool,
    practitioner: &str,
    month: &str,
    fields: &QuoteFields,
) -> ApiResult<QuoteRecord> {
    let record = sqlx::query_as::<_, QuoteRecord>(
        "INSERT INTO devis (practitioner, month, quote_count, proposed_amount, accepted_quote_count, accepted_amount)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (practitioner, month) DO UPDATE SET
            quote_count = EXCLUDED.quote_count,
            proposed_amount = EXCLUDED.proposed_amount,
            accepted_quote_count = EXCLUDED.accepted_quote_count,
            accepted_amount = EXCLUDED.accepted_amount,
            updated_at = now()
         RETURNING *",
    )
    .bind(practitioner)
    .bind(month_prefix(month))
    .bind(fields.quote_count)
    .bind(fields.proposed_amount)
    .bind(fields.accepted_quote_count)
    .bind(fields.accepted_amount)
    .fetch_one(pool)
    .await?;
    Ok(record)
}

pub async fn upsert_encours(
    pool: &DbPool,
    practitioner: Option<&str>,
    fields: &EncoursFields,
) -> ApiResult<WipGauge> {
    let code = practitioner.filter(|p| !p.is_empty()).unwrap_or("GLOBAL");
    let record = sqlx::query_as::<_, WipGauge>(
        "INSERT INTO encours (practitioner, remaining_minutes_to_bill, remaining_amount_to_bill, hourly_profitability, worked_days_profitability, patients_in_progress, imported_at)
         VALUES ($1, $2, $3, $4, $5, $6, now())
         ON CONFLICT (practitioner) DO UPDATE SET
            remaining_minutes_to_bill = EXCLUDED.remaining_minutes_to_bill,
            remaining_amount_to_bill = EXCLUDED.remaining_amount_to_bill,
            hourly_profitability = EXCLUDED.hourly_profitability,
            worked_days_profitability = EXCLUDED.worked_days_profitability,
            patients_in_progress = EXCLUDED.patients_in_progress,
            imported_at = now()
         RETURNING *",
    )
    .bind(code)
    .bind(fields.remaining_minutes_to_bill)
    .bind(fields.remaining_amount_to_bill)
    .bind(fields.hourly_profitability)
    .bind(fields.worked_days_profitability)
    .bind(fields.patients_in_progress)
    .fetch_one(pool)
    .await?;
    Ok(record)
}

// Practitioner-specific gauge wins over the shared GLOBAL row.
pub async fn fetch_encours(pool: &DbPool, practitioner: &str) -> ApiResult<Option<WipGauge>> {
    let gauge = sqlx::query_as::<_, WipGauge>(
        "SELECT * FROM encours WHERE practitioner IN ($1, 'GLOBAL')
         ORDER BY (practitioner = 'GLOBAL') ASC
         LIMIT 1",
    )
    .bind(practitioner)
    .fetch_optional(pool)
    .await?;
    Ok(gauge)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualEntryRequest {
    pub practitioner_code: String,
    pub kind: MetricKind,
    pub month: Option<String>,
    pub fields: serde_json::Value,
}

pub(crate) fn require_month(month: &Option<String>) -> ApiResult<&str> {
    let token = month
        .as_deref()
        .ok_or_else(|| ApiError::InvalidInput("Le mois est requis.".to_string()))?;
    ensure_month_token(token)?;
    Ok(token)
}

pub async fn record_manual_entry_internal(
    pool: &DbPool,
    payload: &ManualEntryRequest,
) -> ApiResult<serde_json::Value> {
    let code = payload.practitioner_code.trim();
    if code.is_empty() {
        return Err(ApiError::InvalidInput(
            "Le code praticien est requis.".to_string(),
        ));
    }

    let stored = match payload.kind {
        MetricKind::Realisation => {
            let month = require_month(&payload.month)?;
            let fields: RealisationFields = serde_json::from_value(payload.fields.clone())?;
            serde_json::to_value(insert_realisation(pool, code, month, &fields).await?)?
        }
        MetricKind::Rendezvous => {
            let month = require_month(&payload.month)?;
            let fields: AppointmentFields = serde_json::from_value(payload.fields.clone())?;
            serde_json::to_value(upsert_rendezvous(pool, code, month, &fields).await?)?
        }
        MetricKind::JoursOuverts => {
            let month = require_month(&payload.month)?;
            let fields: HoursFields = serde_json::from_value(payload.fields.clone())?;
            serde_json::to_value(upsert_jours_ouverts(pool, code, month, &fields).await?)?
        }
        MetricKind::Devis => {
            let month = require_month(&payload.month)?;
            let fields: QuoteFields = serde_json::from_value(payload.fields.clone())?;
            serde_json::to_value(upsert_devis(pool, code, month, &fields).await?)?
        }
        MetricKind::Encours => {
            let fields: EncoursFields = serde_json::from_value(payload.fields.clone())?;
            serde_json::to_value(upsert_encours(pool, Some(code), &fields).await?)?
        }
    };
    Ok(stored)
}

pub async fn record_manual_entry(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ManualEntryRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    claims.allowed_practitioner(&payload.practitioner_code)?;
    let stored = record_manual_entry_internal(&state.pool, &payload).await?;
    Ok(Json(stored))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryQuery {
    pub practitioner_code: Option<String>,
    pub month: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub practitioner: String,
    pub month: String,
    pub realisation: kpi::RealisationTotals,
    pub rendezvous: Option<AppointmentRecord>,
    pub jours_ouverts: Option<HoursRecord>,
    pub devis: Option<QuoteRecord>,
    pub encours: Option<WipGauge>,
}

pub async fn get_metrics_summary(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult<Json<MetricsSummary>> {
    let code = resolve_practitioner_scope(&claims, query.practitioner_code.as_deref())?;
    ensure_month_token(&query.month)?;

    let realisation = kpi::fetch_realisation_totals(&state.pool, &code, &query.month).await?;
    let rendezvous = kpi::fetch_rendezvous(&state.pool, &code, &query.month).await?;
    let jours_ouverts = kpi::fetch_jours_ouverts(&state.pool, &code, &query.month).await?;
    let devis = kpi::fetch_devis(&state.pool, &code, &query.month).await?;
    let encours = fetch_encours(&state.pool, &code).await?;

    Ok(Json(MetricsSummary {
        practitioner: code,
        month: query.month,
        realisation,
        rendezvous,
        jours_ouverts,
        devis,
        encours,
    }))
}
