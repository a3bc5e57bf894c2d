#![allow(dead_code)]
use bcrypt;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{FromRow, Pool, Postgres};
use std::str::FromStr;

use crate::error::{ApiError, ApiResult};

pub type DbPool = Pool<Postgres>;

pub async fn init_pool(database_url: &str) -> ApiResult<DbPool> {
    let opts = PgConnectOptions::from_str(database_url)
        .map_err(|e| ApiError::Internal(format!("Invalid DB URL: {}", e)))?
        .ssl_mode(PgSslMode::Disable);

    // connect_lazy_with returns the pool immediately. It does not validate connection.
    Ok(PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .idle_timeout(std::time::Duration::from_secs(120))
        .max_lifetime(std::time::Duration::from_secs(300))
        .connect_lazy_with(opts))
}

pub async fn init_database(pool: &DbPool) -> ApiResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;

    let _ = ensure_seeds(pool).await;
    tracing::info!("Database ready");

    Ok(())
}

async fn ensure_seeds(pool: &DbPool) -> ApiResult<()> {
    let admin_email =
        std::env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@dentboard.local".to_string());

    let admin_exists: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM accounts WHERE role = 'admin'")
        .fetch_one(pool)
        .await
        .unwrap_or((0,));
    if admin_exists.0 == 0 {
        let admin_password =
            std::env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string());
        if let Ok(hash) = bcrypt::hash(admin_password, bcrypt::DEFAULT_COST) {
            let _ = sqlx::query(
                "INSERT INTO accounts (email, password_hash, role, name, cabinet_name, is_active, is_verified)
                 VALUES ($1, $2, 'admin', 'Administrateur', '', TRUE, TRUE) ON CONFLICT DO NOTHING",
            )
            .bind(&admin_email)
            .bind(hash)
            .execute(pool)
            .await;
        }
    }

    // Settings singleton; also created lazily on first read.
    let _ = sqlx::query("INSERT INTO app_settings (id) VALUES (1) ON CONFLICT (id) DO NOTHING")
        .execute(pool)
        .await;

    Ok(())
}

#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub name: String,
    pub practitioner_code: Option<String>,
    pub cabinet_name: String,
    pub is_active: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RealisationRecord {
    pub id: i64,
    pub practitioner: String,
    pub month: String,
    pub patient_count: i32,
    pub billed_amount: f64,
    pub collected_amount: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRecord {
    pub id: i64,
    pub practitioner: String,
    pub month: String,
    pub appointment_count: i32,
    pub total_duration_minutes: i32,
    pub patient_count: i32,
    pub new_patient_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HoursRecord {
    pub id: i64,
    pub practitioner: String,
    pub month: String,
    pub minutes_open: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRecord {
    pub id: i64,
    pub practitioner: String,
    pub month: String,
    pub quote_count: i32,
    pub proposed_amount: f64,
    pub accepted_quote_count: i32,
    pub accepted_amount: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WipGauge {
    pub id: i64,
    pub practitioner: String,
    pub remaining_minutes_to_bill: i32,
    pub remaining_amount_to_bill: f64,
    pub hourly_profitability: f64,
    pub worked_days_profitability: f64,
    pub patients_in_progress: i32,
    pub imported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: i64,
    pub practitioner: String,
    pub last_name: String,
    pub first_name: String,
    pub birth_date: Option<NaiveDate>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: String,
    pub status: String,
    pub last_visit: Option<NaiveDate>,
    pub next_visit: Option<NaiveDate>,
    pub lifetime_billed: f64,
    pub visit_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: i64,
    pub practitioner: String,
    pub month: String,
    pub kind: String,
    pub content: serde_json::Value,
    pub artifact_path: String,
    pub email_sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub recipient_email: Option<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub id: i32,
    pub auto_generation: bool,
    pub auto_email: bool,
    pub cron_hour: i32,
    pub maintenance_mode: bool,
    pub ai_models_enabled: bool,
    pub import_enabled: bool,
    pub dynamic_mode_expires_at: Option<DateTime<Utc>>,
    pub renewal_code: Option<String>,
    pub renewal_code_expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
