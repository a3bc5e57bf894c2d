use crate::commands::metrics::{current_month_token, month_prefix};
use crate::db::{DbPool, Patient};
use crate::error::{ApiError, ApiResult};
use crate::middleware::auth::{resolve_practitioner_scope, Claims};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::NaiveDate;
use serde::Deserialize;

pub const PATIENT_STATUSES: [&str; 3] = ["actif", "inactif", "nouveau"];

fn ensure_status(status: &str) -> ApiResult<()> {
    if PATIENT_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(ApiError::InvalidInput(format!(
            "Statut invalide: '{}' (valeurs acceptées: actif, inactif, nouveau).",
            status
        )))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientQuery {
    pub practitioner_code: Option<String>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub sort: Option<String>,
}

pub async fn list_patients(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PatientQuery>,
) -> ApiResult<Json<Vec<Patient>>> {
    let code = resolve_practitioner_scope(&claims, query.practitioner_code.as_deref())?;

    // Sort keys are whitelisted, never interpolated from raw input.
    let order = match query.sort.as_deref() {
        Some("recent") => "updated_at DESC",
        Some("visites") => "visit_count DESC, last_name ASC",
        _ => "last_name ASC, first_name ASC",
    };
    let sql = format!(
        "SELECT * FROM patients
         WHERE practitioner = $1
           AND ($2::text IS NULL OR last_name ILIKE '%' || $2 || '%' OR first_name ILIKE '%' || $2 || '%')
           AND ($3::text IS NULL OR status = $3)
         ORDER BY {}",
        order
    );

    let patients = sqlx::query_as::<_, Patient>(&sql)
        .bind(&code)
        .bind(query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()))
        .bind(query.status.as_deref().filter(|s| !s.is_empty()))
        .fetch_all(&state.pool)
        .await?;
    Ok(Json(patients))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientPayload {
    pub practitioner_code: Option<String>,
    pub last_name: String,
    pub first_name: String,
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub notes: String,
    pub status: Option<String>,
    pub last_visit: Option<NaiveDate>,
    pub next_visit: Option<NaiveDate>,
    #[serde(default)]
    pub lifetime_billed: f64,
    #[serde(default)]
    pub visit_count: i32,
}

// Keeps the month's activity counters in step with the patient registry.
// Decrements floor at zero, missing counter rows are only created on increment.
pub async fn adjust_monthly_patient_counters(
    pool: &DbPool,
    practitioner: &str,
    month: &str,
    delta: i32,
) -> ApiResult<()> {
    let prefix = month_prefix(month);
    if delta > 0 {
        let updated = sqlx::query(
            "UPDATE realisations SET patient_count = patient_count + $3, updated_at = now()
             WHERE id = (SELECT id FROM realisations
                         WHERE practitioner = $1 AND left(month, 6) = $2
                         ORDER BY id LIMIT 1)",
        )
        .bind(practitioner)
        .bind(prefix)
        .bind(delta)
        .execute(pool)
        .await?;
        if updated.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO realisations (practitioner, month, patient_count, billed_amount, collected_amount)
                 VALUES ($1, $2, $3, 0, 0)",
            )
            .bind(practitioner)
            .bind(prefix)
            .bind(delta)
            .execute(pool)
            .await?;
        }

        sqlx::query(
            "INSERT INTO rendezvous (practitioner, month, appointment_count, total_duration_minutes, patient_count, new_patient_count)
             VALUES ($1, $2, 0, 0, $3, $3)
             ON CONFLICT (practitioner, month) DO UPDATE SET
                patient_count = rendezvous.patient_count + EXCLUDED.patient_count,
                new_patient_count = rendezvous.new_patient_count + EXCLUDED.new_patient_count,
                updated_at = now()",
        )
        .bind(practitioner)
        .bind(prefix)
        .bind(delta)
        .execute(pool)
        .await?;
    } else if delta < 0 {
        sqlx::query(
            "UPDATE realisations SET patient_count = GREATEST(0, patient_count + $3), updated_at = now()
             WHERE id = (SELECT id FROM realisations
                         WHERE practitioner = $1 AND left(month, 6) = $2
                         ORDER BY id LIMIT 1)",
        )
        .bind(practitioner)
        .bind(prefix)
        .bind(delta)
        .execute(pool)
        .await?;

        sqlx::query(
            "UPDATE rendezvous SET
                patient_count = GREATEST(0, patient_count + $3),
                new_patient_count = GREATEST(0, new_patient_count + $3),
                updated_at = now()
             WHERE practitioner = $1 AND left(month, 6) = $2",
        )
        .bind(practitioner)
        .bind(prefix)
        .bind(delta)
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn create_patient_internal(
    pool: &DbPool,
    practitioner: &str,
    payload: &PatientPayload,
) -> ApiResult<Patient> {
    if payload.last_name.trim().is_empty() {
        return Err(ApiError::InvalidInput(
            "Le nom du patient est requis.".to_string(),
        ));
    }
    let status = payload.status.as_deref().unwrap_or("nouveau");
    ensure_status(status)?;

    let patient = sqlx::query_as::<_, Patient>(
        "INSERT INTO patients (practitioner, last_name, first_name, birth_date, phone, email, notes, status, last_visit, next_visit, lifetime_billed, visit_count)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
         RETURNING *",
    )
    .bind(practitioner)
    .bind(payload.last_name.trim())
    .bind(payload.first_name.trim())
    .bind(payload.birth_date)
    .bind(payload.phone.trim())
    .bind(payload.email.trim())
    .bind(&payload.notes)
    .bind(status)
    .bind(payload.last_visit)
    .bind(payload.next_visit)
    .bind(payload.lifetime_billed)
    .bind(payload.visit_count)
    .fetch_one(pool)
    .await?;

    adjust_monthly_patient_counters(pool, practitioner, &current_month_token(), 1).await?;
    Ok(patient)
}

pub async fn create_patient(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<PatientPayload>,
) -> ApiResult<Json<Patient>> {
    let code = resolve_practitioner_scope(&claims, payload.practitioner_code.as_deref())?;
    let patient = create_patient_internal(&state.pool, &code, &payload).await?;
    tracing::info!(patient_id = patient.id, practitioner = %code, "patient created");
    Ok(Json(patient))
}

async fn fetch_patient(pool: &DbPool, id: i64) -> ApiResult<Patient> {
    sqlx::query_as::<_, Patient>("SELECT * FROM patients WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("Patient introuvable.".to_string()))
}

pub async fn update_patient(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<PatientPayload>,
) -> ApiResult<Json<Patient>> {
    let existing = fetch_patient(&state.pool, id).await?;
    claims.allowed_practitioner(&existing.practitioner)?;

    let status = payload.status.as_deref().unwrap_or(&existing.status);
    ensure_status(status)?;
    if payload.last_name.trim().is_empty() {
        return Err(ApiError::InvalidInput(
            "Le nom du patient est requis.".to_string(),
        ));
    }

    let patient = sqlx::query_as::<_, Patient>(
        "UPDATE patients SET
            last_name = $2,
            first_name = $3,
            birth_date = $4,
            phone = $5,
            email = $6,
            notes = $7,
            status = $8,
            last_visit = $9,
            next_visit = $10,
            lifetime_billed = $11,
            visit_count = $12,
            updated_at = now()
         WHERE id = $1
         RETURNING *",
    )
    .bind(id)
    .bind(payload.last_name.trim())
    .bind(payload.first_name.trim())
    .bind(payload.birth_date)
    .bind(payload.phone.trim())
    .bind(payload.email.trim())
    .bind(&payload.notes)
    .bind(status)
    .bind(payload.last_visit)
    .bind(payload.next_visit)
    .bind(payload.lifetime_billed)
    .bind(payload.visit_count)
    .fetch_one(&state.pool)
    .await?;
    Ok(Json(patient))
}

pub async fn delete_patient_internal(pool: &DbPool, patient: &Patient) -> ApiResult<()> {
    sqlx::query("DELETE FROM patients WHERE id = $1")
        .bind(patient.id)
        .execute(pool)
        .await?;
    adjust_monthly_patient_counters(pool, &patient.practitioner, &current_month_token(), -1).await?;
    Ok(())
}

pub async fn delete_patient(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Patient>> {
    let patient = fetch_patient(&state.pool, id).await?;
    claims.allowed_practitioner(&patient.practitioner)?;
    delete_patient_internal(&state.pool, &patient).await?;
    tracing::info!(patient_id = patient.id, practitioner = %patient.practitioner, "patient deleted");
    Ok(Json(patient))
}
