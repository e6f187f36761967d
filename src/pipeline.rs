//! Flujo de un turno de chat y pipeline de clasificación de mensajes.
//!
//! Turno de chat:
//!   1. Despacho al servicio de chat según el tipo de entrada (texto o audio).
//!   2. Filtrado del audio de respuesta según la modalidad pedida.
//!   3. Persistencia del historial, sólo si el servicio respondió.
//!
//! Clasificación:
//!   1. Etiqueta del LLM; una etiqueta fuera del conjunto admitido aborta la petición.
//!   2. Ánimo del servicio de emociones; si falla se usa "unknown".
//!   3. Persistencia opcional del `MessageRecord`.

use anyhow::{anyhow, Result};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    collaborators::{ChatResponder, MoodAnalyzer},
    error::{ApiError, ApiResult},
    llm::Classifier,
    models::{ChatHistory, ChatInput, MessageCategory, MessageRecord, ResponseModality, ResponseType},
    store::Store,
};

pub const UNKNOWN_MOOD: &str = "unknown";

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub user_id: String,
    pub chat_category_id: Option<String>,
    pub input: ChatInput,
    pub modality: ResponseModality,
}

#[derive(Debug, Clone)]
pub struct ChatTurnOutcome {
    pub bot_response: String,
    pub audio_url: Option<String>,
    pub history: ChatHistory,
}

/// Ejecuta un turno de chat completo. No persiste nada si el servicio falla.
pub async fn run_chat_turn(
    responder: &dyn ChatResponder,
    store: &dyn Store,
    turn: ChatTurn,
) -> ApiResult<ChatTurnOutcome> {
    let reply = match &turn.input {
        ChatInput::Text(text) => responder.reply_text(text, turn.modality).await,
        ChatInput::Audio { audio_url } => {
            responder
                .reply_audio(audio_url, turn.modality, &turn.user_id)
                .await
        }
    }
    .map_err(|e| ApiError::collaborator("Failed to generate response", e))?;

    let audio_url = if turn.modality.includes_audio() {
        reply.audio_url
    } else {
        None
    };

    let history = ChatHistory {
        id: Uuid::new_v4().to_string(),
        user_id: turn.user_id.clone(),
        chat_category_id: turn.chat_category_id.clone(),
        user_message: turn.input.history_text().to_string(),
        bot_response: reply.response.clone(),
        audio_url: audio_url.clone(),
        timestamp: Utc::now(),
        embedding: None,
    };
    store.insert_chat(&history).await?;
    info!("Turno de chat guardado para el usuario {}", turn.user_id);

    Ok(ChatTurnOutcome {
        bot_response: reply.response,
        audio_url,
        history,
    })
}

/// Resultado de clasificar un mensaje (aún sin persistir).
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: MessageCategory,
    pub mood: String,
    pub message_label: String,
}

/// Clasifica el mensaje y obtiene su ánimo. Sólo el fallo del clasificador es fatal.
pub async fn classify_message(
    classifier: &dyn Classifier,
    mood: &dyn MoodAnalyzer,
    message: &str,
) -> ApiResult<Classification> {
    let raw = classifier
        .classify(message)
        .await
        .map_err(|e| ApiError::collaborator("Classification failed", e))?;

    let category = MessageCategory::from_label(&raw).ok_or_else(|| {
        ApiError::collaborator(
            "Classification failed",
            anyhow!("Etiqueta fuera de las categorías admitidas: '{}'", raw.trim()),
        )
    })?;

    let (mood, message_label) = match mood.analyze(message).await {
        Ok(reading) => {
            let label = reading
                .mental_health_status
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| category.label().to_string());
            (reading.emotion, label)
        }
        Err(e) => {
            warn!("Servicio de emociones no disponible, se usa '{UNKNOWN_MOOD}': {e:#}");
            (UNKNOWN_MOOD.to_string(), category.label().to_string())
        }
    };

    Ok(Classification {
        category,
        mood,
        message_label,
    })
}

/// Persiste un mensaje ya clasificado.
pub async fn record_message(
    store: &dyn Store,
    classification: &Classification,
    user_message: &str,
    user_id: &str,
    chat_category_id: &str,
    response_type: ResponseType,
) -> Result<MessageRecord> {
    let record = MessageRecord {
        id: Uuid::new_v4().to_string(),
        category: classification.category,
        mood: classification.mood.clone(),
        user_id: user_id.to_string(),
        user_message: user_message.to_string(),
        response_type,
        chat_category_id: chat_category_id.to_string(),
        timestamp: Utc::now(),
        message_label: classification.message_label.clone(),
    };
    store.insert_message(&record).await?;
    info!(
        "Mensaje clasificado como '{}' guardado en la categoría {}",
        record.category, chat_category_id
    );
    Ok(record)
}
