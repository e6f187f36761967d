//! Abstracción sobre Rig para clasificar mensajes con distintos proveedores de LLM.
//! Gemini es el proveedor por defecto; OpenAI queda disponible vía `LLM_PROVIDER`.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use tracing::debug;

use crate::config::{AppConfig, LlmProvider};

/// Instrucciones del clasificador. Enumera exactamente las categorías persistibles.
const CLASSIFICATION_PROMPT: &str = r#"
You are a message classifier for a chat application.
Classify the user's message into exactly one of these categories:
Tech, Mental Health, General Talk, Knowledge, Other.
Answer with the category name only, without punctuation, quotes or explanations.
"#;

/// Colaborador que etiqueta un mensaje. Devuelve la etiqueta en bruto.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, message: &str) -> Result<String>;
}

/// Clasificador respaldado por un LLM vía Rig.
#[derive(Debug, Clone)]
pub struct LlmClassifier {
    pub provider: LlmProvider,
    pub model: String,
    pub timeout: Duration,
}

impl LlmClassifier {
    /// Construye el clasificador a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider.clone(),
            model: cfg.llm_classifier_model.clone(),
            timeout: cfg.collaborator_timeout,
        }
    }

    async fn classify_with_gemini(&self, message: &str) -> Result<String> {
        use rig::client::CompletionClient as _;
        use rig::providers::gemini;

        let client = gemini::Client::from_env();
        let agent = client
            .agent(&self.model)
            .preamble(CLASSIFICATION_PROMPT)
            .temperature(0.0)
            .build();

        Ok(agent.prompt(message).await?)
    }

    async fn classify_with_openai(&self, message: &str) -> Result<String> {
        use rig::client::CompletionClient as _;
        use rig::providers::openai;

        let client = openai::Client::from_env();
        let agent = client
            .agent(&self.model)
            .preamble(CLASSIFICATION_PROMPT)
            .temperature(0.0)
            .build();

        Ok(agent.prompt(message).await?)
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, message: &str) -> Result<String> {
        debug!("Clasificando mensaje con {:?} ({})", self.provider, self.model);
        let call = async {
            match self.provider {
                LlmProvider::Gemini => self.classify_with_gemini(message).await,
                LlmProvider::OpenAI => self.classify_with_openai(message).await,
            }
        };

        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| anyhow!("El clasificador no respondió en {:?}", self.timeout))?
    }
}
