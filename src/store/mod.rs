//! Capa de persistencia: un trait `Store` con backend Neo4j (producción)
//! y backend en memoria (tests y ejecución sin base de datos).

mod memory;
mod neo4j;

pub use memory::MemoryStore;
pub use neo4j::Neo4jStore;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{AppConfig, StoreBackend};
use crate::models::{ChatCategory, ChatHistory, MessageRecord, User};

/// Errores de dominio que los backends comparten. Viajan dentro de `anyhow::Error`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("el email {0} ya está registrado")]
    DuplicateEmail(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Nombre del backend, para logs y health check.
    fn backend(&self) -> &'static str;

    // --- Usuarios ---
    /// Falla con `StoreError::DuplicateEmail` si el email ya existe.
    async fn insert_user(&self, user: &User) -> Result<()>;
    async fn find_user(&self, id: &str) -> Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn list_users(&self) -> Result<Vec<User>>;
    async fn update_user(&self, user: &User) -> Result<()>;

    // --- Categorías de chat ---
    async fn insert_category(&self, category: &ChatCategory) -> Result<()>;
    async fn find_category(&self, id: &str) -> Result<Option<ChatCategory>>;
    /// Categorías de un usuario, de la más reciente a la más antigua.
    async fn list_categories(&self, user_id: &str) -> Result<Vec<ChatCategory>>;
    async fn update_category(&self, category: &ChatCategory) -> Result<()>;
    async fn delete_category(&self, id: &str) -> Result<bool>;

    // --- Mensajes clasificados ---
    async fn insert_message(&self, message: &MessageRecord) -> Result<()>;
    async fn list_messages(&self, user_id: &str, chat_category_id: &str)
        -> Result<Vec<MessageRecord>>;

    // --- Historial de chat ---
    async fn insert_chat(&self, chat: &ChatHistory) -> Result<()>;
    /// Historial de un usuario en orden cronológico, opcionalmente filtrado por categoría.
    async fn list_chats(
        &self,
        user_id: &str,
        chat_category_id: Option<&str>,
    ) -> Result<Vec<ChatHistory>>;
    async fn find_chats(&self, ids: &[String]) -> Result<Vec<ChatHistory>>;
    /// Chats que tienen embedding (para reconstruir el índice).
    async fn embedded_chats(&self) -> Result<Vec<ChatHistory>>;
}

/// Construye el backend indicado en la configuración.
pub async fn from_config(cfg: &AppConfig) -> Result<Arc<dyn Store>> {
    match &cfg.store {
        StoreBackend::Neo4j { .. } => {
            let store = Neo4jStore::connect(cfg).await?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::default())),
    }
}
