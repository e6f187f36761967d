//! Errores de la API y su traducción a respuestas HTTP.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::vector_index::IndexError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Campos ausentes o inválidos en la petición.
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    /// Fallo de un servicio externo (LLM, servicio de chat o de ánimo).
    #[error("{context}: {cause}")]
    Collaborator { context: String, cause: anyhow::Error },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn collaborator(context: impl Into<String>, cause: anyhow::Error) -> Self {
        Self::Collaborator {
            context: context.into(),
            cause,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Collaborator { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<IndexError> for ApiError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DimensionMismatch { .. } => Self::bad_request("Invalid embedding size"),
        }
    }
}

/// Cuerpo ilegible o con tipos incorrectos: siempre 400, nunca el 422 de axum.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Collaborator { context, cause } => {
                error!("{context}: {cause:#}");
                json!({ "msg": context, "error": format!("{cause:#}") })
            }
            Self::Internal(err) => {
                error!("Error interno: {err:#}");
                json!({ "msg": "Internal server error", "error": format!("{err:#}") })
            }
            other => json!({ "msg": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
