use std::sync::Arc;

use crate::{
    collaborators::{ChatResponder, MoodAnalyzer},
    config::AppConfig,
    llm::Classifier,
    store::Store,
    vector_index::VectorIndex,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub classifier: Arc<dyn Classifier>,
    pub mood: Arc<dyn MoodAnalyzer>,
    pub responder: Arc<dyn ChatResponder>,
    /// Embeddings de usuarios ("usuarios similares").
    pub user_index: Arc<VectorIndex>,
    /// Embeddings de chats guardados (búsqueda semántica).
    pub chat_index: Arc<VectorIndex>,
}
