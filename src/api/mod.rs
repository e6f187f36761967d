mod categories;
mod chat;
mod users;

#[cfg(test)]
mod tests;

use axum::{
    extract::{FromRequest, State},
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::{app_state::AppState, error::ApiError};

/// Número de vecinos devueltos por las búsquedas por similitud.
const SIMILAR_K: usize = 5;

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .merge(users::routes(app_state.clone()))
        .merge(chat::routes())
        .merge(categories::routes())
        .with_state(app_state)
}

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "store": state.store.backend() }))
}

/// `Json` con rechazo propio: los cuerpos inválidos responden 400 `{msg}`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
struct ApiJson<T>(T);

/// Campo de texto obligatorio: recortado y no vacío.
fn required(value: &str, field: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Campo opcional: `None` si está ausente o vacío.
fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
