//! Carga y gestión de configuración de la aplicación (almacén, LLM, servicios externos).

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

/// Dimensión fija de los embeddings aceptados por los índices vectoriales.
pub const EMBEDDING_DIM: usize = 128;

#[derive(Clone, Debug, PartialEq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    /// Modelo de clasificación por defecto para cada proveedor.
    pub fn default_classifier_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Gemini => "gemini-1.5-flash",
        }
    }
}

/// Backend de persistencia.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreBackend {
    Neo4j {
        uri: String,
        user: String,
        password: String,
    },
    Memory,
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub store: StoreBackend,

    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub bcrypt_cost: u32,

    pub llm_provider: LlmProvider,
    pub llm_classifier_model: String,

    pub model_service_url: String,
    pub collaborator_timeout: Duration,
    /// Tamaño máximo del audio que se descarga para reenviarlo al servicio de modelos.
    pub max_audio_bytes: usize,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:5000".to_string());

        let backend = env::var("STORE_BACKEND").unwrap_or_else(|_| "neo4j".to_string());
        let store = match backend.to_lowercase().as_str() {
            "neo4j" => StoreBackend::Neo4j {
                uri: env::var("NEO4J_URI").map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?,
                user: env::var("NEO4J_USER")
                    .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?,
                password: env::var("NEO4J_PASSWORD")
                    .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?,
            },
            "memory" => StoreBackend::Memory,
            other => return Err(anyhow!("Backend de almacenamiento no soportado: {other}")),
        };

        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| anyhow!("Falta JWT_SECRET en el entorno"))?;
        let token_ttl_hours = parse_var("TOKEN_TTL_HOURS", 1)?;
        let bcrypt_cost = parse_var("BCRYPT_COST", 10)?;

        let llm_provider_str = env::var("LLM_PROVIDER").unwrap_or_else(|_| "gemini".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;
        let llm_classifier_model = env::var("LLM_CLASSIFIER_MODEL")
            .unwrap_or_else(|_| llm_provider.default_classifier_model().to_string());

        let model_service_url = env::var("MODEL_SERVICE_URL")
            .unwrap_or_else(|_| "http://localhost:8000".to_string())
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&model_service_url)
            .with_context(|| format!("MODEL_SERVICE_URL inválida: {model_service_url}"))?;
        let collaborator_timeout = Duration::from_secs(parse_var("COLLABORATOR_TIMEOUT_SECS", 30)?);
        let max_audio_bytes = parse_var("MAX_AUDIO_BYTES", 10 * 1024 * 1024)?;

        Ok(Self {
            server_addr,
            store,
            jwt_secret,
            token_ttl_hours,
            bcrypt_cost,
            llm_provider,
            llm_classifier_model,
            model_service_url,
            collaborator_timeout,
            max_audio_bytes,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Valor inválido para {name} ({raw}): {e}")),
        Err(_) => Ok(default),
    }
}
