use crate::db::{Account, DbPool};
use crate::error::{ApiError, ApiResult};
use crate::middleware::auth::{get_jwt_secret, Claims};
use crate::state::AppState;
use axum::extract::State;
use axum::{Extension, Json};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

// Public projection of an account, the password hash never leaves the server.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub role: String,
    pub practitioner_code: Option<String>,
    pub cabinet_name: String,
    pub is_active: bool,
    pub is_verified: bool,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        AccountView {
            id: account.id,
            email: account.email.clone(),
            name: account.name.clone(),
            role: account.role.clone(),
            practitioner_code: account.practitioner_code.clone(),
            cabinet_name: account.cabinet_name.clone(),
            is_active: account.is_active,
            is_verified: account.is_verified,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub account: AccountView,
}

fn issue_token(account: &Account) -> ApiResult<String> {
    let expiry = Utc::now() + Duration::hours(24);
    let claims = Claims {
        sub: account.email.clone(),
        account_id: account.id,
        name: account.name.clone(),
        role: account.role.clone(),
        practitioner_code: account.practitioner_code.clone(),
        exp: expiry.timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(&get_jwt_secret()),
    )
    .map_err(|e| ApiError::Internal(format!("token encoding failed: {}", e)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(ApiError::InvalidInput(
            "Email et mot de passe sont requis.".to_string(),
        ));
    }

    let account = sqlx::query_as::<_, Account>(
        "SELECT * FROM accounts WHERE lower(email) = lower($1) LIMIT 1",
    )
    .bind(payload.email.trim())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::Unauthorized("Identifiants invalides.".to_string()))?;

    if !account.is_active {
        return Err(ApiError::Forbidden("Ce compte est désactivé.".to_string()));
    }
    if !bcrypt::verify(&payload.password, &account.password_hash)? {
        return Err(ApiError::Unauthorized("Identifiants invalides.".to_string()));
    }

    tracing::info!(email = %account.email, role = %account.role, "login succeeded");
    let token = issue_token(&account)?;
    Ok(Json(LoginResponse {
        token,
        account: AccountView::from(&account),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCheckResponse {
    pub email: String,
    pub name: String,
    pub role: String,
    pub practitioner_code: Option<String>,
}

pub async fn check_auth(
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<AuthCheckResponse>> {
    Ok(Json(AuthCheckResponse {
        email: claims.sub,
        name: claims.name,
        role: claims.role,
        practitioner_code: claims.practitioner_code,
    }))
}

pub async fn list_practitioners(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<AccountView>>> {
    claims.require_admin()?;
    let accounts = sqlx::query_as::<_, Account>(
        "SELECT * FROM accounts WHERE role = 'praticien' ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(accounts.iter().map(AccountView::from).collect()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: String,
    pub practitioner_code: Option<String>,
    #[serde(default)]
    pub cabinet_name: String,
}

// Codes end up in artifact file names, so keep them path safe.
pub fn is_valid_practitioner_code(code: &str) -> bool {
    !code.is_empty()
        && code
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

pub async fn create_account(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateAccountRequest>,
) -> ApiResult<Json<AccountView>> {
    claims.require_admin()?;

    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(ApiError::InvalidInput(
            "Email et mot de passe sont requis.".to_string(),
        ));
    }
    if payload.role != "admin" && payload.role != "praticien" {
        return Err(ApiError::InvalidInput(format!(
            "Rôle invalide: '{}'.",
            payload.role
        )));
    }
    let practitioner_code = payload
        .practitioner_code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty());
    if payload.role == "praticien" && practitioner_code.is_none() {
        return Err(ApiError::InvalidInput(
            "Le code praticien est requis pour un compte praticien.".to_string(),
        ));
    }
    if let Some(code) = practitioner_code {
        if !is_valid_practitioner_code(code) {
            return Err(ApiError::InvalidInput(format!(
                "Code praticien invalide: '{}' (lettres, chiffres, tirets et tirets bas uniquement).",
                code
            )));
        }
    }

    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM accounts WHERE lower(email) = lower($1)")
            .bind(payload.email.trim())
            .fetch_optional(&state.pool)
            .await?;
    if existing.is_some() {
        return Err(ApiError::InvalidInput(
            "Un compte existe déjà avec cet email.".to_string(),
        ));
    }

    let password_hash = bcrypt::hash(&payload.password, bcrypt::DEFAULT_COST)?;
    let account = sqlx::query_as::<_, Account>(
        "INSERT INTO accounts (email, password_hash, role, name, practitioner_code, cabinet_name)
         VALUES (lower($1), $2, $3, $4, $5, $6)
         RETURNING *",
    )
    .bind(payload.email.trim())
    .bind(&password_hash)
    .bind(&payload.role)
    .bind(payload.name.trim())
    .bind(practitioner_code)
    .bind(payload.cabinet_name.trim())
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(email = %account.email, role = %account.role, "account created");
    Ok(Json(AccountView::from(&account)))
}

pub async fn find_practitioner(pool: &DbPool, code: &str) -> ApiResult<Account> {
    sqlx::query_as::<_, Account>(
        "SELECT * FROM accounts
         WHERE practitioner_code = $1 AND role = 'praticien' AND is_active = TRUE
         LIMIT 1",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("Praticien inconnu: '{}'.", code)))
}

pub async fn list_active_practitioners(pool: &DbPool) -> ApiResult<Vec<Account>> {
    let accounts = sqlx::query_as::<_, Account>(
        "SELECT * FROM accounts
         WHERE role = 'praticien' AND is_active = TRUE AND practitioner_code IS NOT NULL
         ORDER BY practitioner_code",
    )
    .fetch_all(pool)
    .await?;
    Ok(accounts)
}
