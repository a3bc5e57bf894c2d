use crate::error::{ApiError, ApiResult};
use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub account_id: i64,
    pub name: String,
    pub role: String,
    pub practitioner_code: Option<String>,
    pub exp: usize,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    pub fn require_admin(&self) -> ApiResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "Réservé à l'administrateur.".to_string(),
            ))
        }
    }

    pub fn allowed_practitioner(&self, code: &str) -> ApiResult<()> {
        if self.is_admin() || self.practitioner_code.as_deref() == Some(code) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "Accès limité à votre propre cabinet.".to_string(),
            ))
        }
    }
}

// Admin must name a practitioner explicitly; practitioners only reach their own code.
pub fn resolve_practitioner_scope(claims: &Claims, requested: Option<&str>) -> ApiResult<String> {
    let requested = requested.map(str::trim).filter(|code| !code.is_empty());
    if claims.is_admin() {
        return requested
            .map(|code| code.to_string())
            .ok_or_else(|| ApiError::InvalidInput("Le code praticien est requis.".to_string()));
    }

    let own = claims.practitioner_code.as_deref().ok_or_else(|| {
        ApiError::Forbidden("Aucun code praticien associé à ce compte.".to_string())
    })?;

    match requested {
        Some(code) if code != own => Err(ApiError::Forbidden(
            "Accès limité à votre propre cabinet.".to_string(),
        )),
        _ => Ok(own.to_string()),
    }
}

pub fn get_jwt_secret() -> Vec<u8> {
    std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET not set, using insecure default!");
            "insecure-development-secret-key-replace-me-immediately".to_string()
        })
        .into_bytes()
}

pub async fn auth_middleware(mut request: Request, next: Next) -> Result<Response, StatusCode> {
    let path = request.uri().path();
    let public_routes = ["/api/auth/login"];

    if !path.starts_with("/api/") || public_routes.contains(&path) {
        return Ok(next.run(request).await);
    }

    let auth_header = request.headers().get(header::AUTHORIZATION);

    let auth_header = match auth_header {
        Some(header) => header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?,
        None => return Err(StatusCode::UNAUTHORIZED),
    };

    if !auth_header.starts_with("Bearer ") {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let token = &auth_header["Bearer ".len()..];

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(&get_jwt_secret()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    request.extensions_mut().insert(token_data.claims);

    Ok(next.run(request).await)
}
