use crate::commands::auth::{find_practitioner, list_active_practitioners};
use crate::commands::kpi::{build_snapshot, fetch_history, KpiSnapshot, MonthHistory};
use crate::commands::metrics::{ensure_month_token, month_label, month_prefix, sort_months_desc};
use crate::commands::recommend::build_recommendations;
use crate::db::{DbPool, Report};
use crate::error::{ApiError, ApiResult};
use crate::middleware::auth::{resolve_practitioner_scope, Claims};
use crate::report::composer::{ReportComposer, ReportInput};
use crate::report::mailer::{MailAttachment, ReportMailer};
use crate::report::renderer::DocumentRenderer;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use base64::{engine::general_purpose, Engine as _};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// A stuck chromium must not hold up a whole batch.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(30);

pub fn reports_dir() -> PathBuf {
    std::env::var("REPORTS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./data/reports"))
}

pub fn artifact_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"%PDF") {
        "application/pdf"
    } else {
        "text/html; charset=utf-8"
    }
}

// Pdf when chromium cooperates, otherwise the raw html is kept as artifact.
async fn render_artifact(renderer: &dyn DocumentRenderer, html: &str) -> (Vec<u8>, &'static str) {
    match renderer.render_pdf(html).await {
        Ok(bytes) => (bytes, "pdf"),
        Err(e) => {
            tracing::warn!(error = %e, "pdf rendering failed, keeping html artifact");
            (html.as_bytes().to_vec(), "html")
        }
    }
}

pub struct GeneratedReport {
    pub report_id: i64,
    pub kpi: KpiSnapshot,
    pub recommendations: Vec<String>,
    pub history: Vec<MonthHistory>,
    pub artifact: Vec<u8>,
    pub artifact_ext: &'static str,
}

pub async fn generate_report_internal(
    pool: &DbPool,
    renderer: &dyn DocumentRenderer,
    practitioner: &str,
    month: &str,
) -> ApiResult<GeneratedReport> {
    ensure_month_token(month)?;
    let account = find_practitioner(pool, practitioner).await?;

    let kpi = build_snapshot(pool, practitioner, month).await?;
    let recommendations = build_recommendations(&kpi);
    let history = fetch_history(pool, practitioner, month, 6).await?;

    let composer = ReportComposer::new()?;
    let html = composer.render_monthly(&ReportInput {
        practitioner_name: &account.name,
        practitioner_code: practitioner,
        cabinet_name: &account.cabinet_name,
        kpi: &kpi,
        recommendations: &recommendations,
        history: &history,
        generated_on: Local::now().date_naive(),
    })?;
    let (artifact, artifact_ext) = render_artifact(renderer, &html).await;

    let dir = reports_dir();
    tokio::fs::create_dir_all(&dir).await?;
    let filename = format!(
        "rapport_{}_{}.{}",
        practitioner,
        month_prefix(month),
        artifact_ext
    );
    let path = dir.join(&filename);
    tokio::fs::write(&path, &artifact).await?;

    let content = serde_json::json!({
        "kpiSnapshot": &kpi,
        "recommendations": &recommendations,
        "history": &history,
    });
    // Regeneration replaces content but keeps the delivery bookkeeping.
    let report_id: i64 = sqlx::query_scalar(
        "INSERT INTO reports (practitioner, month, kind, content, artifact_path, generated_at)
         VALUES ($1, $2, 'monthly', $3, $4, now())
         ON CONFLICT (practitioner, month) DO UPDATE SET
            content = EXCLUDED.content,
            artifact_path = EXCLUDED.artifact_path,
            generated_at = now()
         RETURNING id",
    )
    .bind(practitioner)
    .bind(month_prefix(month))
    .bind(&content)
    .bind(path.to_string_lossy().as_ref())
    .fetch_one(pool)
    .await?;

    tracing::info!(
        practitioner = %practitioner,
        month = %month_prefix(month),
        report_id,
        format = artifact_ext,
        "report generated"
    );
    Ok(GeneratedReport {
        report_id,
        kpi,
        recommendations,
        history,
        artifact,
        artifact_ext,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateReportRequest {
    pub practitioner_code: String,
    pub month: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateReportResponse {
    pub report_id: i64,
    pub kpi_snapshot: KpiSnapshot,
    pub recommendations: Vec<String>,
    pub history_last6_months: Vec<MonthHistory>,
    pub document_format: String,
    pub rendered_document_base64: String,
}

pub async fn generate_report(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<GenerateReportRequest>,
) -> ApiResult<Json<GenerateReportResponse>> {
    claims.allowed_practitioner(&payload.practitioner_code)?;
    let generated = generate_report_internal(
        &state.pool,
        state.renderer.as_ref(),
        &payload.practitioner_code,
        &payload.month,
    )
    .await?;
    Ok(Json(GenerateReportResponse {
        report_id: generated.report_id,
        kpi_snapshot: generated.kpi,
        recommendations: generated.recommendations,
        history_last6_months: generated.history,
        document_format: generated.artifact_ext.to_string(),
        rendered_document_base64: general_purpose::STANDARD.encode(&generated.artifact),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub practitioner: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItemResult {
    fn success(practitioner: &str, report_id: i64) -> Self {
        BatchItemResult {
            practitioner: practitioner.to_string(),
            status: "success".to_string(),
            report_id: Some(report_id),
            error: None,
        }
    }

    fn failure(practitioner: &str, report_id: Option<i64>, error: String) -> Self {
        BatchItemResult {
            practitioner: practitioner.to_string(),
            status: "error".to_string(),
            report_id,
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub success_count: usize,
    pub error_count: usize,
    pub results: Vec<BatchItemResult>,
}

fn summarize(results: Vec<BatchItemResult>) -> BatchSummary {
    let success_count = results.iter().filter(|r| r.status == "success").count();
    BatchSummary {
        success_count,
        error_count: results.len() - success_count,
        results,
    }
}

// One practitioner failing or timing out never aborts the rest of the batch.
pub async fn generate_all_reports_internal(
    pool: &DbPool,
    renderer: &dyn DocumentRenderer,
    month: &str,
) -> ApiResult<Vec<BatchItemResult>> {
    ensure_month_token(month)?;
    let practitioners = list_active_practitioners(pool).await?;

    let mut results = Vec::with_capacity(practitioners.len());
    for account in &practitioners {
        let code = match account.practitioner_code.as_deref() {
            Some(code) => code,
            None => continue,
        };
        let outcome = tokio::time::timeout(
            GENERATION_TIMEOUT,
            generate_report_internal(pool, renderer, code, month),
        )
        .await;
        let item = match outcome {
            Ok(Ok(generated)) => BatchItemResult::success(code, generated.report_id),
            Ok(Err(e)) => {
                tracing::warn!(practitioner = %code, error = %e, "report generation failed");
                BatchItemResult::failure(code, None, e.to_string())
            }
            Err(_) => {
                tracing::warn!(practitioner = %code, "report generation timed out");
                BatchItemResult::failure(code, None, "Délai de génération dépassé.".to_string())
            }
        };
        results.push(item);
    }
    Ok(results)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateAllRequest {
    pub month: String,
}

pub async fn generate_all_reports(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<GenerateAllRequest>,
) -> ApiResult<Json<BatchSummary>> {
    claims.require_admin()?;
    let results =
        generate_all_reports_internal(&state.pool, state.renderer.as_ref(), &payload.month).await?;
    Ok(Json(summarize(results)))
}

async fn send_one_report(
    pool: &DbPool,
    mailer: &dyn ReportMailer,
    report: &Report,
) -> ApiResult<()> {
    let account = find_practitioner(pool, &report.practitioner).await?;
    if report.artifact_path.is_empty() {
        return Err(ApiError::NotFound(
            "Aucun document généré pour ce rapport.".to_string(),
        ));
    }
    let bytes = tokio::fs::read(&report.artifact_path).await?;
    let content_type = artifact_content_type(&bytes);
    let ext = if content_type == "application/pdf" {
        "pdf"
    } else {
        "html"
    };

    let label = month_label(&report.month);
    let subject = format!("Rapport mensuel {} - {}", label, account.cabinet_name);
    let body = format!(
        "<p>Bonjour {},</p>\
         <p>Veuillez trouver en pièce jointe votre rapport d'activité pour {}.</p>\
         <p>Cordialement,<br>L'équipe DentBoard</p>",
        account.name, label
    );
    let attachment = MailAttachment {
        filename: format!(
            "rapport_{}_{}.{}",
            report.practitioner,
            month_prefix(&report.month),
            ext
        ),
        content_type: content_type.to_string(),
        bytes,
    };

    mailer
        .send_report(&account.email, &subject, &body, Some(attachment))
        .await?;
    sqlx::query(
        "UPDATE reports SET email_sent = TRUE, sent_at = now(), recipient_email = $2 WHERE id = $1",
    )
    .bind(report.id)
    .bind(&account.email)
    .execute(pool)
    .await?;
    tracing::info!(practitioner = %report.practitioner, month = %report.month, "report sent");
    Ok(())
}

// Without force, only reports not yet delivered are picked up.
pub async fn send_reports_internal(
    pool: &DbPool,
    mailer: &dyn ReportMailer,
    month: &str,
    force: bool,
) -> ApiResult<Vec<BatchItemResult>> {
    ensure_month_token(month)?;
    let reports = sqlx::query_as::<_, Report>(
        "SELECT * FROM reports
         WHERE left(month, 6) = $1 AND ($2 OR email_sent = FALSE)
         ORDER BY practitioner",
    )
    .bind(month_prefix(month))
    .bind(force)
    .fetch_all(pool)
    .await?;

    let mut results = Vec::with_capacity(reports.len());
    for report in &reports {
        let item = match send_one_report(pool, mailer, report).await {
            Ok(()) => BatchItemResult::success(&report.practitioner, report.id),
            Err(e) => {
                tracing::warn!(practitioner = %report.practitioner, error = %e, "report delivery failed");
                BatchItemResult::failure(&report.practitioner, Some(report.id), e.to_string())
            }
        };
        results.push(item);
    }
    Ok(results)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReportsRequest {
    pub month: String,
    #[serde(default)]
    pub force: bool,
}

pub async fn send_reports(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<SendReportsRequest>,
) -> ApiResult<Json<BatchSummary>> {
    claims.require_admin()?;
    let results = send_reports_internal(
        &state.pool,
        state.mailer.as_ref(),
        &payload.month,
        payload.force,
    )
    .await?;
    Ok(Json(summarize(results)))
}

// Fused generate-then-send, still isolated per practitioner.
pub async fn send_all_now_internal(
    pool: &DbPool,
    renderer: &dyn DocumentRenderer,
    mailer: &dyn ReportMailer,
    month: &str,
) -> ApiResult<Vec<BatchItemResult>> {
    ensure_month_token(month)?;
    let practitioners = list_active_practitioners(pool).await?;

    let mut results = Vec::with_capacity(practitioners.len());
    for account in &practitioners {
        let code = match account.practitioner_code.as_deref() {
            Some(code) => code,
            None => continue,
        };
        let outcome = async {
            let generated = tokio::time::timeout(
                GENERATION_TIMEOUT,
                generate_report_internal(pool, renderer, code, month),
            )
            .await
            .map_err(|_| ApiError::Upstream("Délai de génération dépassé.".to_string()))??;
            let report = sqlx::query_as::<_, Report>("SELECT * FROM reports WHERE id = $1")
                .bind(generated.report_id)
                .fetch_one(pool)
                .await?;
            send_one_report(pool, mailer, &report).await?;
            Ok::<i64, ApiError>(generated.report_id)
        }
        .await;
        let item = match outcome {
            Ok(report_id) => BatchItemResult::success(code, report_id),
            Err(e) => {
                tracing::warn!(practitioner = %code, error = %e, "generate-and-send failed");
                BatchItemResult::failure(code, None, e.to_string())
            }
        };
        results.push(item);
    }
    Ok(results)
}

pub async fn send_all_now(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<GenerateAllRequest>,
) -> ApiResult<Json<BatchSummary>> {
    claims.require_admin()?;
    let results = send_all_now_internal(
        &state.pool,
        state.renderer.as_ref(),
        state.mailer.as_ref(),
        &payload.month,
    )
    .await?;
    Ok(Json(summarize(results)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListReportsQuery {
    pub practitioner_code: Option<String>,
    pub month: Option<String>,
}

pub async fn list_reports(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ListReportsQuery>,
) -> ApiResult<Json<Vec<Report>>> {
    // Admins browse every cabinet unless they filter, practitioners only their own.
    let scope = if claims.is_admin() {
        query
            .practitioner_code
            .clone()
            .filter(|code| !code.is_empty())
    } else {
        Some(resolve_practitioner_scope(
            &claims,
            query.practitioner_code.as_deref(),
        )?)
    };
    if let Some(month) = query.month.as_deref() {
        ensure_month_token(month)?;
    }

    let reports = sqlx::query_as::<_, Report>(
        "SELECT * FROM reports
         WHERE ($1::text IS NULL OR practitioner = $1)
           AND ($2::text IS NULL OR left(month, 6) = $2)
         ORDER BY month DESC, practitioner ASC",
    )
    .bind(scope)
    .bind(query.month.as_deref().map(month_prefix))
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(reports))
}

pub async fn download_report(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let report = sqlx::query_as::<_, Report>("SELECT * FROM reports WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("Rapport introuvable.".to_string()))?;
    claims.allowed_practitioner(&report.practitioner)?;

    let bytes = tokio::fs::read(&report.artifact_path).await?;
    let content_type = artifact_content_type(&bytes);
    let ext = if content_type == "application/pdf" {
        "pdf"
    } else {
        "html"
    };
    let filename = format!(
        "rapport_{}_{}.{}",
        report.practitioner,
        month_prefix(&report.month),
        ext
    );
    let headers = [
        (header::CONTENT_TYPE, content_type.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ),
    ];
    Ok((headers, bytes))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthOption {
    pub value: String,
    pub label: String,
}

// Every month any metric feed touched, newest first.
pub async fn list_available_months_internal(pool: &DbPool) -> ApiResult<Vec<MonthOption>> {
    let months: Vec<String> = sqlx::query_scalar(
        "SELECT left(month, 6) FROM realisations
         UNION SELECT left(month, 6) FROM rendezvous
         UNION SELECT left(month, 6) FROM jours_ouverts
         UNION SELECT left(month, 6) FROM devis",
    )
    .fetch_all(pool)
    .await?;
    let months = sort_months_desc(months);
    Ok(months
        .into_iter()
        .map(|m| MonthOption {
            label: month_label(&m),
            value: m,
        })
        .collect())
}

pub async fn list_available_months(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> ApiResult<Json<Vec<MonthOption>>> {
    let months = list_available_months_internal(&state.pool).await?;
    Ok(Json(months))
}
