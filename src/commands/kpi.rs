use crate::commands::metrics::month_prefix;
use crate::db::{AppointmentRecord, DbPool, HoursRecord, QuoteRecord};
use crate::error::ApiResult;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn average_basket(billed_amount: f64, patient_count: i64) -> f64 {
    if patient_count <= 0 {
        return 0.0;
    }
    round2(billed_amount / patient_count as f64)
}

pub fn hourly_yield(billed_amount: f64, minutes_open: i64) -> f64 {
    if minutes_open <= 0 {
        return 0.0;
    }
    round2(billed_amount / (minutes_open as f64 / 60.0))
}

pub fn quote_acceptance_rate(accepted_quote_count: i64, quote_count: i64) -> f64 {
    if quote_count <= 0 {
        return 0.0;
    }
    round1(accepted_quote_count as f64 * 100.0 / quote_count as f64)
}

pub fn average_appointment_duration(total_duration_minutes: i64, appointment_count: i64) -> f64 {
    if appointment_count <= 0 {
        return 0.0;
    }
    round1(total_duration_minutes as f64 / appointment_count as f64)
}

// Seen counts can exceed booked ones after walk-ins, never report a negative gap.
pub fn absences(booked_patient_count: i64, seen_patient_count: i64) -> i64 {
    (booked_patient_count - seen_patient_count).max(0)
}

// Percent change between two month totals. A zero base has no meaningful trend.
pub fn trend_percent(last: f64, previous: f64) -> Option<i64> {
    if previous == 0.0 {
        return None;
    }
    Some(((last - previous) * 100.0 / previous).round() as i64)
}

#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealisationTotals {
    pub patient_count: i64,
    pub billed_amount: f64,
    pub collected_amount: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiSnapshot {
    pub practitioner: String,
    pub month: String,
    pub patient_count: i64,
    pub billed_amount: f64,
    pub collected_amount: f64,
    pub appointment_count: i64,
    pub total_duration_minutes: i64,
    pub appointment_patient_count: i64,
    pub new_patient_count: i64,
    pub minutes_open: i64,
    pub quote_count: i64,
    pub proposed_amount: f64,
    pub accepted_quote_count: i64,
    pub accepted_amount: f64,
    pub average_basket: f64,
    pub hourly_yield: f64,
    pub quote_acceptance_rate: f64,
    pub average_appointment_duration: f64,
    pub absences: i64,
}

// Realisation rows accumulate per month, so totals are summed by month prefix.
pub async fn fetch_realisation_totals(
    pool: &DbPool,
    practitioner: &str,
    month: &str,
) -> ApiResult<RealisationTotals> {
    let totals = sqlx::query_as::<_, RealisationTotals>(
        "SELECT CAST(COALESCE(SUM(patient_count), 0) AS BIGINT) AS patient_count,
                CAST(COALESCE(SUM(billed_amount), 0) AS DOUBLE PRECISION) AS billed_amount,
                CAST(COALESCE(SUM(collected_amount), 0) AS DOUBLE PRECISION) AS collected_amount
         FROM realisations
         WHERE practitioner = $1 AND left(month, 6) = $2",
    )
    .bind(practitioner)
    .bind(month_prefix(month))
    .fetch_one(pool)
    .await?;
    Ok(totals)
}

pub async fn fetch_rendezvous(
    pool: &DbPool,
    practitioner: &str,
    month: &str,
) -> ApiResult<Option<AppointmentRecord>> {
    let record = sqlx::query_as::<_, AppointmentRecord>(
        "SELECT * FROM rendezvous
         WHERE practitioner = $1 AND left(month, 6) = $2
         ORDER BY month DESC
         LIMIT 1",
    )
    .bind(practitioner)
    .bind(month_prefix(month))
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

pub async fn fetch_jours_ouverts(
    pool: &DbPool,
    practitioner: &str,
    month: &str,
) -> ApiResult<Option<HoursRecord>> {
    let record = sqlx::query_as::<_, HoursRecord>(
        "SELECT * FROM jours_ouverts
         WHERE practitioner = $1 AND left(month, 6) = $2
         ORDER BY month DESC
         LIMIT 1",
    )
    .bind(practitioner)
    .bind(month_prefix(month))
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

pub async fn fetch_devis(
    pool: &DbPool,
    practitioner: &str,
    month: &str,
) -> ApiResult<Option<QuoteRecord>> {
    let record = sqlx::query_as::<_, QuoteRecord>(
        "SELECT * FROM devis
         WHERE practitioner = $1 AND left(month, 6) = $2
         ORDER BY month DESC
         LIMIT 1",
    )
    .bind(practitioner)
    .bind(month_prefix(month))
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

// Derived figures are rounded once here, the raw totals stay untouched.
pub async fn build_snapshot(
    pool: &DbPool,
    practitioner: &str,
    month: &str,
) -> ApiResult<KpiSnapshot> {
    let realisation = fetch_realisation_totals(pool, practitioner, month).await?;
    let rendezvous = fetch_rendezvous(pool, practitioner, month).await?;
    let jours_ouverts = fetch_jours_ouverts(pool, practitioner, month).await?;
    let devis = fetch_devis(pool, practitioner, month).await?;

    let mut snapshot = KpiSnapshot {
        practitioner: practitioner.to_string(),
        month: month_prefix(month).to_string(),
        patient_count: realisation.patient_count,
        billed_amount: round2(realisation.billed_amount),
        collected_amount: round2(realisation.collected_amount),
        ..KpiSnapshot::default()
    };

    if let Some(rdv) = rendezvous {
        snapshot.appointment_count = rdv.appointment_count as i64;
        snapshot.total_duration_minutes = rdv.total_duration_minutes as i64;
        snapshot.appointment_patient_count = rdv.patient_count as i64;
        snapshot.new_patient_count = rdv.new_patient_count as i64;
    }
    if let Some(hours) = jours_ouverts {
        snapshot.minutes_open = hours.minutes_open as i64;
    }
    if let Some(quotes) = devis {
        snapshot.quote_count = quotes.quote_count as i64;
        snapshot.proposed_amount = round2(quotes.proposed_amount);
        snapshot.accepted_quote_count = quotes.accepted_quote_count as i64;
        snapshot.accepted_amount = round2(quotes.accepted_amount);
    }

    snapshot.average_basket = average_basket(realisation.billed_amount, snapshot.patient_count);
    snapshot.hourly_yield = hourly_yield(realisation.billed_amount, snapshot.minutes_open);
    snapshot.quote_acceptance_rate =
        quote_acceptance_rate(snapshot.accepted_quote_count, snapshot.quote_count);
    snapshot.average_appointment_duration = average_appointment_duration(
        snapshot.total_duration_minutes,
        snapshot.appointment_count,
    );
    snapshot.absences = absences(
        snapshot.appointment_patient_count,
        snapshot.patient_count,
    );

    Ok(snapshot)
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthHistory {
    pub month: String,
    pub billed_amount: f64,
    pub patient_count: i64,
    pub appointment_count: i64,
    pub minutes_open: i64,
}

// Up to `limit` months ending at the requested one, oldest first for charting.
pub async fn fetch_history(
    pool: &DbPool,
    practitioner: &str,
    month: &str,
    limit: i64,
) -> ApiResult<Vec<MonthHistory>> {
    let mut rows = sqlx::query_as::<_, MonthHistory>(
        "WITH real_months AS (
             SELECT left(month, 6) AS ym,
                    SUM(billed_amount) AS billed_amount,
                    SUM(patient_count) AS patient_count
             FROM realisations
             WHERE practitioner = $1
             GROUP BY left(month, 6)
         ),
         rdv_months AS (
             SELECT left(month, 6) AS ym,
                    MAX(appointment_count) AS appointment_count
             FROM rendezvous
             WHERE practitioner = $1
             GROUP BY left(month, 6)
         ),
         open_months AS (
             SELECT left(month, 6) AS ym,
                    MAX(minutes_open) AS minutes_open
             FROM jours_ouverts
             WHERE practitioner = $1
             GROUP BY left(month, 6)
         )
         SELECT COALESCE(r.ym, v.ym, o.ym) AS month,
                CAST(COALESCE(r.billed_amount, 0) AS DOUBLE PRECISION) AS billed_amount,
                CAST(COALESCE(r.patient_count, 0) AS BIGINT) AS patient_count,
                CAST(COALESCE(v.appointment_count, 0) AS BIGINT) AS appointment_count,
                CAST(COALESCE(o.minutes_open, 0) AS BIGINT) AS minutes_open
         FROM real_months r
         FULL OUTER JOIN rdv_months v ON v.ym = r.ym
         FULL OUTER JOIN open_months o ON o.ym = COALESCE(r.ym, v.ym)
         WHERE COALESCE(r.ym, v.ym, o.ym) <= $2
         ORDER BY 1 DESC
         LIMIT $3",
    )
    .bind(practitioner)
    .bind(month_prefix(month))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.reverse();
    Ok(rows)
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthTotals {
    pub month: String,
    pub billed_amount: f64,
    pub patient_count: i64,
}

// Cabinet-wide month totals, newest first.
pub async fn fetch_recent_month_totals(pool: &DbPool, limit: i64) -> ApiResult<Vec<MonthTotals>> {
    let rows = sqlx::query_as::<_, MonthTotals>(
        "SELECT left(month, 6) AS month,
                CAST(COALESCE(SUM(billed_amount), 0) AS DOUBLE PRECISION) AS billed_amount,
                CAST(COALESCE(SUM(patient_count), 0) AS BIGINT) AS patient_count
         FROM realisations
         GROUP BY left(month, 6)
         ORDER BY 1 DESC
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
