//! Modelos de dominio (usuarios, categorías de chat, mensajes clasificados e historial).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Categorías admitidas para un mensaje clasificado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageCategory {
    Tech,
    #[serde(rename = "Mental Health")]
    MentalHealth,
    #[serde(rename = "General Talk")]
    GeneralTalk,
    Knowledge,
    Other,
}

impl MessageCategory {
    pub const ALL: [MessageCategory; 5] = [
        Self::Tech,
        Self::MentalHealth,
        Self::GeneralTalk,
        Self::Knowledge,
        Self::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Tech => "Tech",
            Self::MentalHealth => "Mental Health",
            Self::GeneralTalk => "General Talk",
            Self::Knowledge => "Knowledge",
            Self::Other => "Other",
        }
    }

    /// Interpreta la etiqueta devuelta por el clasificador.
    /// No hay valor por defecto: una etiqueta desconocida devuelve `None`.
    pub fn from_label(raw: &str) -> Option<Self> {
        let label = raw.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Tipo de respuesta asociado a un mensaje persistido.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    #[default]
    Text,
    Audio,
    Image,
    Video,
    File,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Video => "video",
            Self::File => "file",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(Self::Text),
            "audio" => Some(Self::Audio),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

/// Modalidad de respuesta pedida en un turno de chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseModality {
    Text,
    Audio,
    Both,
}

impl ResponseModality {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "text" => Some(Self::Text),
            "audio" => Some(Self::Audio),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
            Self::Both => "both",
        }
    }

    pub fn includes_audio(&self) -> bool {
        matches!(self, Self::Audio | Self::Both)
    }
}

/// Contenido de un turno de chat, decidido en la frontera HTTP.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatInput {
    Text(String),
    Audio { audio_url: String },
}

impl ChatInput {
    /// Texto que se guarda en el historial para este turno.
    pub fn history_text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Audio { audio_url } => audio_url,
        }
    }
}

/// Usuario registrado (nodo :User).
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub embedding: Vec<f64>,
    pub created_at: DateTime<Utc>,
}

/// Vista pública de un usuario: nunca incluye el hash de la contraseña.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub embedding: Vec<f64>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            embedding: user.embedding.clone(),
        }
    }
}

/// Hilo de conversación creado por un usuario.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatCategory {
    pub id: String,
    pub user_id: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mensaje clasificado con su estado de ánimo. Inmutable una vez creado.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub category: MessageCategory,
    pub mood: String,
    pub user_id: String,
    pub user_message: String,
    pub response_type: ResponseType,
    pub chat_category_id: String,
    pub timestamp: DateTime<Utc>,
    pub message_label: String,
}

/// Turno de chat completado (pregunta del usuario y respuesta del bot).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistory {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_category_id: Option<String>,
    pub user_message: String,
    pub bot_response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,
}
