use crate::commands::reports::{generate_all_reports_internal, send_reports_internal};
use crate::commands::settings::get_or_create;
use crate::error::ApiResult;
use crate::state::AppState;
use chrono::{Datelike, Local, NaiveDate, Timelike, Utc};
use rand::Rng;
use std::time::Duration;

pub const RENEWAL_CODE_VALIDITY_HOURS: i64 = 24;

const MONTHLY_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const DYNAMIC_MODE_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

pub fn is_last_day_of_month(date: NaiveDate) -> bool {
    match date.succ_opt() {
        Some(next) => next.month() != date.month(),
        None => true,
    }
}

pub fn monthly_due(today: NaiveDate, hour: u32, cron_hour: i32) -> bool {
    is_last_day_of_month(today) && hour as i32 >= cron_hour
}

pub fn generate_renewal_code() -> String {
    rand::rng().random_range(100_000..=999_999).to_string()
}

pub fn spawn(state: AppState) {
    tokio::spawn(monthly_loop(state.clone()));
    tokio::spawn(hourly_loop(state));
}

// Calendar checks tick every minute, a trigger failure never kills the loop.
async fn monthly_loop(state: AppState) {
    let mut ticker = tokio::time::interval(MONTHLY_CHECK_INTERVAL);
    let mut last_run: Option<NaiveDate> = None;
    loop {
        ticker.tick().await;
        if let Err(e) = monthly_trigger(&state, &mut last_run).await {
            tracing::error!(error = %e, "monthly report trigger failed");
        }
    }
}

async fn monthly_trigger(state: &AppState, last_run: &mut Option<NaiveDate>) -> ApiResult<()> {
    let now = Local::now();
    let today = now.date_naive();
    if *last_run == Some(today) {
        return Ok(());
    }

    let settings = get_or_create(&state.pool).await?;
    if !monthly_due(today, now.hour(), settings.cron_hour) {
        return Ok(());
    }
    *last_run = Some(today);

    if !settings.auto_generation {
        tracing::info!("automatic generation disabled, skipping monthly run");
        return Ok(());
    }

    let month = today.format("%Y%m").to_string();
    tracing::info!(month = %month, "monthly report run starting");
    let generated =
        generate_all_reports_internal(&state.pool, state.renderer.as_ref(), &month).await?;
    let generated_ok = generated.iter().filter(|r| r.status == "success").count();
    tracing::info!(
        month = %month,
        generated = generated_ok,
        failed = generated.len() - generated_ok,
        "monthly generation finished"
    );

    if settings.auto_email {
        let sent = send_reports_internal(&state.pool, state.mailer.as_ref(), &month, false).await?;
        let sent_ok = sent.iter().filter(|r| r.status == "success").count();
        if sent_ok < generated_ok {
            tracing::warn!(
                month = %month,
                generated = generated_ok,
                sent = sent_ok,
                "some generated reports were not delivered"
            );
        } else {
            tracing::info!(month = %month, sent = sent_ok, "monthly delivery finished");
        }
    }
    Ok(())
}

async fn hourly_loop(state: AppState) {
    let mut ticker = tokio::time::interval(DYNAMIC_MODE_CHECK_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(e) = hourly_trigger(&state).await {
            tracing::error!(error = %e, "dynamic mode check failed");
        }
    }
}

// Once dynamic mode lapses, a renewal code is stored and mailed to the admin.
// The stored copy survives a mail outage.
async fn hourly_trigger(state: &AppState) -> ApiResult<()> {
    let settings = get_or_create(&state.pool).await?;
    let expired_at = match settings.dynamic_mode_expires_at {
        Some(at) if at <= Utc::now() => at,
        _ => return Ok(()),
    };

    let code = generate_renewal_code();
    let code_expires = Utc::now() + chrono::Duration::hours(RENEWAL_CODE_VALIDITY_HOURS);
    sqlx::query(
        "UPDATE app_settings SET
            dynamic_mode_expires_at = NULL,
            renewal_code = $1,
            renewal_code_expires_at = $2,
            updated_at = now()
         WHERE id = 1",
    )
    .bind(&code)
    .bind(code_expires)
    .execute(&state.pool)
    .await?;
    tracing::info!(expired_at = %expired_at, "dynamic mode expired, renewal code issued");

    let admin_email: Option<String> = sqlx::query_scalar(
        "SELECT email FROM accounts WHERE role = 'admin' AND is_active = TRUE ORDER BY id LIMIT 1",
    )
    .fetch_optional(&state.pool)
    .await?;
    let admin_email = match admin_email {
        Some(email) => email,
        None => {
            tracing::warn!("no active admin account, renewal code only stored");
            return Ok(());
        }
    };

    let body = format!(
        "<p>Bonjour,</p>\
         <p>Le mode dynamique de DentBoard a expiré. Votre code de renouvellement est : <strong>{}</strong></p>\
         <p>Ce code est valable {} heures.</p>",
        code, RENEWAL_CODE_VALIDITY_HOURS
    );
    if let Err(e) = state
        .mailer
        .send_report(
            &admin_email,
            "Renouvellement du mode dynamique",
            &body,
            None,
        )
        .await
    {
        tracing::warn!(error = %e, "renewal code email failed, code stays available in settings");
    }
    Ok(())
}
