//! CRUD de categorías de chat (hilos de conversación de un usuario).

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::{required, ApiJson};
use crate::{
    app_state::AppState,
    error::{ApiError, ApiResult},
    models::ChatCategory,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCategoryPayload {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    topic: String,
}

#[derive(Deserialize)]
pub struct UpdateCategoryPayload {
    #[serde(default)]
    topic: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/chat/create-category", post(create_category_handler))
        .route("/api/chat/categoryByUser/:user_id", get(list_categories_handler))
        .route("/api/chat/updatecategory/:id", put(update_category_handler))
        .route("/api/chat/category/:id", delete(delete_category_handler))
}

#[axum::debug_handler]
async fn create_category_handler(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CreateCategoryPayload>,
) -> ApiResult<(StatusCode, Json<ChatCategory>)> {
    let user_id = required(&payload.user_id, "userId")?;
    let topic = required(&payload.topic, "topic")?;

    let now = Utc::now();
    let category = ChatCategory {
        id: Uuid::new_v4().to_string(),
        user_id,
        topic,
        created_at: now,
        updated_at: now,
    };
    state.store.insert_category(&category).await?;
    info!("Categoría de chat creada: {}", category.id);

    Ok((StatusCode::CREATED, Json(category)))
}

#[axum::debug_handler]
async fn list_categories_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<ChatCategory>>> {
    let categories = state.store.list_categories(&user_id).await?;
    info!(
        "{} categorías encontradas para el usuario {}",
        categories.len(),
        user_id
    );
    Ok(Json(categories))
}

#[axum::debug_handler]
async fn update_category_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<UpdateCategoryPayload>,
) -> ApiResult<Json<ChatCategory>> {
    let topic = required(&payload.topic, "topic")?;

    let mut category = state
        .store
        .find_category(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Chat category not found."))?;

    category.topic = topic;
    category.updated_at = Utc::now();
    state.store.update_category(&category).await?;

    info!("Categoría de chat actualizada: {id}");
    Ok(Json(category))
}

#[axum::debug_handler]
async fn delete_category_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.store.delete_category(&id).await? {
        return Err(ApiError::not_found("Chat category not found."));
    }
    info!("Categoría de chat eliminada: {id}");
    Ok(Json(json!({ "msg": "Chat category deleted." })))
}
