//! Endpoints de chat: turno de conversación, clasificación, historial,
//! búsqueda semántica y analíticas.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{optional, required, ApiJson, SIMILAR_K};
use crate::{
    analytics::{self, ChatAnalytics},
    app_state::AppState,
    collaborators,
    error::{ApiError, ApiResult},
    models::{ChatHistory, ChatInput, ResponseModality, ResponseType},
    pipeline::{self, ChatTurn},
};

// --- Payloads y Respuestas ---

/// `userMessage` llega como texto o como objeto de audio; se resuelve aquí.
#[derive(Deserialize)]
#[serde(untagged)]
enum IncomingMessage {
    Text(String),
    Audio(AudioMessage),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AudioMessage {
    #[serde(default)]
    is_audio: bool,
    #[serde(default)]
    audio_url: String,
}

impl IncomingMessage {
    fn into_input(self) -> ApiResult<ChatInput> {
        match self {
            Self::Text(text) => Ok(ChatInput::Text(required(&text, "userMessage")?)),
            Self::Audio(audio) if audio.is_audio => {
                let audio_url = required(&audio.audio_url, "audioUrl")?;
                collaborators::validate_audio_url(&audio_url)
                    .map_err(|e| ApiError::bad_request(format!("Invalid audioUrl: {e}")))?;
                Ok(ChatInput::Audio { audio_url })
            }
            Self::Audio(_) => Err(ApiError::bad_request("Unsupported userMessage format")),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponsePayload {
    user_message: Option<IncomingMessage>,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    response_type: String,
    chat_category_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponseBody {
    bot_response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_url: Option<String>,
    msg: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyPayload {
    #[serde(default)]
    message: String,
    user_id: Option<String>,
    chat_category_id: Option<String>,
    response_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveChatPayload {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    user_message: String,
    #[serde(default)]
    bot_response: String,
    #[serde(default)]
    embedding: Vec<f64>,
    chat_category_id: Option<String>,
}

#[derive(Deserialize)]
pub struct SemanticSearchPayload {
    #[serde(default)]
    embedding: Vec<f64>,
}

#[derive(Serialize)]
pub struct SemanticSearchResponse {
    chats: Vec<ChatHistory>,
    distances: Vec<f64>,
}

// --- Router ---

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/chat/generate-response", post(generate_response_handler))
        .route("/api/chat/classify", post(classify_handler))
        .route("/api/chat/save-chat", post(save_chat_handler))
        .route("/api/chat/semantic-search", post(semantic_search_handler))
        .route("/api/chat/history/:user_id", get(history_handler))
        .route(
            "/api/chat/history/:user_id/:chat_category_id",
            get(category_history_handler),
        )
        .route(
            "/api/chat/get-analytic/:user_id/:chat_category_id",
            get(analytics_handler),
        )
}

// --- Handlers ---

#[axum::debug_handler]
async fn generate_response_handler(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<GenerateResponsePayload>,
) -> ApiResult<Json<GenerateResponseBody>> {
    let modality = ResponseModality::parse(&payload.response_type)
        .ok_or_else(|| ApiError::bad_request("Invalid response type"))?;
    let user_id = required(&payload.user_id, "userId")?;
    let input = payload
        .user_message
        .ok_or_else(|| ApiError::bad_request("userMessage is required"))?
        .into_input()?;

    let outcome = pipeline::run_chat_turn(
        state.responder.as_ref(),
        state.store.as_ref(),
        ChatTurn {
            user_id,
            chat_category_id: optional(payload.chat_category_id),
            input,
            modality,
        },
    )
    .await?;
    debug!("Turno de chat registrado como {}", outcome.history.id);

    Ok(Json(GenerateResponseBody {
        bot_response: outcome.bot_response,
        audio_url: outcome.audio_url,
        msg: "Response generated".to_string(),
    }))
}

#[axum::debug_handler]
async fn classify_handler(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ClassifyPayload>,
) -> ApiResult<Response> {
    let message = required(&payload.message, "message")?;
    let response_type = match optional(payload.response_type) {
        Some(raw) => ResponseType::parse(&raw)
            .ok_or_else(|| ApiError::bad_request("Invalid response type"))?,
        None => ResponseType::default(),
    };

    let classification =
        pipeline::classify_message(state.classifier.as_ref(), state.mood.as_ref(), &message)
            .await?;

    let (Some(user_id), Some(chat_category_id)) = (
        optional(payload.user_id),
        optional(payload.chat_category_id),
    ) else {
        // Sin usuario o categoría no hay nada que persistir.
        return Ok(Json(json!({
            "category": classification.category,
            "mood": classification.mood,
            "messageLabel": classification.message_label,
        }))
        .into_response());
    };

    match pipeline::record_message(
        state.store.as_ref(),
        &classification,
        &message,
        &user_id,
        &chat_category_id,
        response_type,
    )
    .await
    {
        Ok(record) => Ok((StatusCode::CREATED, Json(record)).into_response()),
        Err(e) => {
            error!("Error guardando el mensaje clasificado: {e:#}");
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "category": classification.category,
                    "mood": classification.mood,
                    "error": format!("{e:#}"),
                })),
            )
                .into_response())
        }
    }
}

#[axum::debug_handler]
async fn save_chat_handler(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<SaveChatPayload>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    state.chat_index.check_dimension(&payload.embedding)?;
    let chat = ChatHistory {
        id: Uuid::new_v4().to_string(),
        user_id: required(&payload.user_id, "userId")?,
        chat_category_id: optional(payload.chat_category_id),
        user_message: required(&payload.user_message, "userMessage")?,
        bot_response: required(&payload.bot_response, "botResponse")?,
        audio_url: None,
        timestamp: Utc::now(),
        embedding: Some(payload.embedding),
    };

    state.store.insert_chat(&chat).await?;
    if let Some(embedding) = &chat.embedding {
        state.chat_index.upsert(&chat.id, embedding)?;
    }
    info!("Chat guardado e indexado: {}", chat.id);

    Ok((
        StatusCode::CREATED,
        Json(json!({ "msg": "Chat history saved successfully", "id": chat.id })),
    ))
}

#[axum::debug_handler]
async fn semantic_search_handler(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<SemanticSearchPayload>,
) -> ApiResult<Json<SemanticSearchResponse>> {
    let neighbors = state.chat_index.search(&payload.embedding, SIMILAR_K)?;
    let ids: Vec<String> = neighbors.iter().map(|n| n.id.clone()).collect();
    let found = state.store.find_chats(&ids).await?;

    // Se respeta el orden del índice; los chats ausentes del almacén se omiten.
    let mut chats = Vec::with_capacity(neighbors.len());
    let mut distances = Vec::with_capacity(neighbors.len());
    for neighbor in neighbors {
        if let Some(chat) = found.iter().find(|c| c.id == neighbor.id) {
            chats.push(chat.clone());
            distances.push(neighbor.distance);
        }
    }

    Ok(Json(SemanticSearchResponse { chats, distances }))
}

#[axum::debug_handler]
async fn history_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<ChatHistory>>> {
    Ok(Json(state.store.list_chats(&user_id, None).await?))
}

#[axum::debug_handler]
async fn category_history_handler(
    State(state): State<AppState>,
    Path((user_id, chat_category_id)): Path<(String, String)>,
) -> ApiResult<Json<Vec<ChatHistory>>> {
    Ok(Json(
        state
            .store
            .list_chats(&user_id, Some(&chat_category_id))
            .await?,
    ))
}

#[axum::debug_handler]
async fn analytics_handler(
    State(state): State<AppState>,
    Path((user_id, chat_category_id)): Path<(String, String)>,
) -> ApiResult<Json<ChatAnalytics>> {
    let messages = state
        .store
        .list_messages(&user_id, &chat_category_id)
        .await?;
    Ok(Json(analytics::summarize(&messages)))
}
