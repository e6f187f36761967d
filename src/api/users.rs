//! Endpoints de usuarios: registro, login, usuarios similares y mantenimiento.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Extension, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::{required, ApiJson, SIMILAR_K};
use crate::{
    app_state::AppState,
    auth::{self, AuthUser},
    error::{ApiError, ApiResult},
    models::{PublicUser, User},
    store::StoreError,
};

const MIN_PASSWORD_LEN: usize = 6;

// --- Payloads y Respuestas ---

#[derive(Deserialize)]
pub struct RegisterPayload {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    embedding: Option<Vec<f64>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    msg: String,
    token: String,
    user_id: String,
}

#[derive(Deserialize)]
pub struct LoginPayload {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Serialize)]
pub struct LoginUser {
    id: String,
    name: String,
    email: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    msg: String,
    token: String,
    user: LoginUser,
}

#[derive(Deserialize)]
pub struct EmbeddingPayload {
    #[serde(default)]
    embedding: Vec<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarUsersResponse {
    user_ids: Vec<String>,
    distances: Vec<f64>,
}

#[derive(Deserialize)]
pub struct UpdateUserPayload {
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
    embedding: Option<Vec<f64>>,
}

// --- Router ---

pub fn routes(app_state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/api/user/update/:id", put(update_user_handler))
        .route("/api/user/all-users", get(all_users_handler))
        .route_layer(middleware::from_fn_with_state(app_state, auth::require_auth));

    Router::new()
        .route("/api/user/register", post(register_handler))
        .route("/api/user/login", post(login_handler))
        .route("/api/user/find-similar", post(find_similar_handler))
        .route("/api/user/user/:id", get(get_user_handler))
        .merge(protected)
}

// --- Validación ---

fn validate_email(raw: &str) -> ApiResult<String> {
    let email = required(raw, "email")?;
    if !email.contains('@') {
        return Err(ApiError::bad_request("Invalid email"));
    }
    Ok(email)
}

fn validate_password(password: &str) -> ApiResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Un embedding vacío equivale a no tener embedding.
fn validate_embedding(state: &AppState, embedding: Option<Vec<f64>>) -> ApiResult<Vec<f64>> {
    let embedding = embedding.unwrap_or_default();
    if !embedding.is_empty() {
        state.user_index.check_dimension(&embedding)?;
    }
    Ok(embedding)
}

fn duplicate_email_as(msg: &'static str) -> impl Fn(anyhow::Error) -> ApiError {
    move |err| match err.downcast_ref::<StoreError>() {
        Some(StoreError::DuplicateEmail(_)) => ApiError::bad_request(msg),
        None => ApiError::Internal(err),
    }
}

// --- Handlers ---

#[axum::debug_handler]
async fn register_handler(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterPayload>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let name = required(&payload.name, "name")?;
    let email = validate_email(&payload.email)?;
    validate_password(&payload.password)?;
    let embedding = validate_embedding(&state, payload.embedding)?;

    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(ApiError::bad_request("User already exists"));
    }

    let password_hash = auth::hash_password(payload.password, state.config.bcrypt_cost).await?;
    let user = User {
        id: Uuid::new_v4().to_string(),
        name,
        email,
        password_hash,
        embedding,
        created_at: Utc::now(),
    };
    // La comprobación previa no cubre registros concurrentes; el almacén decide.
    state
        .store
        .insert_user(&user)
        .await
        .map_err(duplicate_email_as("User already exists"))?;

    if !user.embedding.is_empty() {
        state.user_index.upsert(&user.id, &user.embedding)?;
    }

    let token = auth::issue_token(&user.id, &state.config.jwt_secret, state.config.token_ttl_hours)?;
    info!("Usuario registrado: {}", user.id);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            msg: "User registered successfully".to_string(),
            token,
            user_id: user.id,
        }),
    ))
}

#[axum::debug_handler]
async fn login_handler(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginPayload>,
) -> ApiResult<Json<LoginResponse>> {
    let invalid = || ApiError::bad_request("Invalid credentials");

    let user = state
        .store
        .find_user_by_email(payload.email.trim())
        .await?
        .ok_or_else(invalid)?;

    if !auth::verify_password(payload.password, user.password_hash.clone()).await? {
        return Err(invalid());
    }

    let token = auth::issue_token(&user.id, &state.config.jwt_secret, state.config.token_ttl_hours)?;
    Ok(Json(LoginResponse {
        msg: "Login successful".to_string(),
        token,
        user: LoginUser {
            id: user.id,
            name: user.name,
            email: user.email,
        },
    }))
}

#[axum::debug_handler]
async fn find_similar_handler(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<EmbeddingPayload>,
) -> ApiResult<Json<SimilarUsersResponse>> {
    let neighbors = state.user_index.search(&payload.embedding, SIMILAR_K)?;
    let (user_ids, distances): (Vec<String>, Vec<f64>) = neighbors
        .into_iter()
        .map(|n| (n.id, n.distance))
        .unzip();
    Ok(Json(SimilarUsersResponse {
        user_ids,
        distances,
    }))
}

#[axum::debug_handler]
async fn update_user_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(auth_user): Extension<AuthUser>,
    ApiJson(payload): ApiJson<UpdateUserPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    if auth_user.user_id != id {
        return Err(ApiError::Forbidden(
            "Not allowed to update another user".to_string(),
        ));
    }

    let mut user = state
        .store
        .find_user(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if let Some(name) = payload.name.filter(|n| !n.trim().is_empty()) {
        user.name = name.trim().to_string();
    }

    if let Some(email) = payload.email.filter(|e| !e.trim().is_empty()) {
        let email = validate_email(&email)?;
        if email != user.email {
            if let Some(other) = state.store.find_user_by_email(&email).await? {
                if other.id != user.id {
                    return Err(ApiError::bad_request("Email already in use"));
                }
            }
            user.email = email;
        }
    }

    if let Some(password) = payload.password.filter(|p| !p.is_empty()) {
        validate_password(&password)?;
        user.password_hash = auth::hash_password(password, state.config.bcrypt_cost).await?;
    }

    let embedding = validate_embedding(&state, payload.embedding)?;
    let reindex = !embedding.is_empty();
    if reindex {
        user.embedding = embedding;
    }

    state
        .store
        .update_user(&user)
        .await
        .map_err(duplicate_email_as("Email already in use"))?;
    if reindex {
        // Reemplaza el vector anterior del mismo usuario.
        state.user_index.upsert(&user.id, &user.embedding)?;
    }

    info!("Usuario actualizado: {}", user.id);
    Ok(Json(json!({ "msg": "User updated successfully" })))
}

#[axum::debug_handler]
async fn all_users_handler(State(state): State<AppState>) -> ApiResult<Json<Vec<PublicUser>>> {
    let users = state.store.list_users().await?;
    Ok(Json(users.iter().map(PublicUser::from).collect()))
}

#[axum::debug_handler]
async fn get_user_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PublicUser>> {
    let user = state
        .store
        .find_user(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(PublicUser::from(&user)))
}
