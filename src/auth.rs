//! Hash de contraseñas (bcrypt), emisión/validación de JWT y middleware de autenticación.

use anyhow::{Context, Result};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{app_state::AppState, error::ApiError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Id del usuario.
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

/// Usuario autenticado, insertado en las extensiones de la petición.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

pub async fn hash_password(password: String, cost: u32) -> Result<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .context("La tarea de hash fue cancelada")?
        .context("No se pudo generar el hash de la contraseña")
}

pub async fn verify_password(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .context("La tarea de verificación fue cancelada")?
        .context("Hash de contraseña corrupto")
}

pub fn issue_token(user_id: &str, secret: &str, ttl_hours: i64) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp() as usize,
        exp: (now + Duration::hours(ttl_hours)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .context("No se pudo firmar el token")
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// Acepta la cabecera `Authorization` con el token en bruto o como `Bearer <token>`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Access denied. No token provided.".into()))?;
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();

    let claims = decode_token(token, &state.config.jwt_secret)
        .map_err(|_| ApiError::Unauthorized("Invalid token".into()))?;

    req.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
    });
    Ok(next.run(req).await)
}
