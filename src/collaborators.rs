//! Cliente HTTP del servicio de modelos (FastAPI): generación de respuestas
//! de chat (texto y audio) y análisis de emociones.

use std::net::IpAddr;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::redirect::Policy;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::{Host, Url};

use crate::config::AppConfig;
use crate::models::ResponseModality;

/// Lectura de ánimo devuelta por `/analyze/`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MoodReading {
    pub emotion: String,
    #[serde(default)]
    pub mental_health_status: Option<String>,
}

/// Respuesta de `/chat/` y `/chat/audio/file`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BotReply {
    pub response: String,
    #[serde(default)]
    pub audio_url: Option<String>,
}

#[async_trait]
pub trait MoodAnalyzer: Send + Sync {
    async fn analyze(&self, message: &str) -> Result<MoodReading>;
}

#[async_trait]
pub trait ChatResponder: Send + Sync {
    async fn reply_text(&self, message: &str, modality: ResponseModality) -> Result<BotReply>;

    async fn reply_audio(
        &self,
        audio_url: &str,
        modality: ResponseModality,
        user_id: &str,
    ) -> Result<BotReply>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    response_type: &'a str,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    message: &'a str,
}

/// Cliente del servicio de modelos. Todas las llamadas llevan timeout.
#[derive(Debug, Clone)]
pub struct ModelServiceClient {
    http: reqwest::Client,
    /// Cliente aparte para audios: cada redirección se valida como la URL original.
    audio_http: reqwest::Client,
    base_url: String,
    max_audio_bytes: usize,
}

impl ModelServiceClient {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.collaborator_timeout)
            .build()
            .context("No se pudo construir el cliente HTTP")?;
        let audio_http = reqwest::Client::builder()
            .timeout(cfg.collaborator_timeout)
            .redirect(Policy::custom(|attempt| {
                if attempt.previous().len() >= 5 {
                    attempt.error("demasiadas redirecciones")
                } else if validate_audio_url(attempt.url().as_str()).is_ok() {
                    attempt.follow()
                } else {
                    attempt.error("redirección a un host no permitido")
                }
            }))
            .build()
            .context("No se pudo construir el cliente HTTP de audio")?;
        Ok(Self {
            http,
            audio_http,
            base_url: cfg.model_service_url.clone(),
            max_audio_bytes: cfg.max_audio_bytes,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Sólo se aceptan audios http(s) alojados en hosts públicos.
pub fn validate_audio_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("URL de audio inválida: {raw}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("Esquema no permitido para el audio: {}", url.scheme());
    }
    let allowed = match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            domain != "localhost" && !domain.ends_with(".localhost")
        }
        Some(Host::Ipv4(ip)) => is_public(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_public(IpAddr::V6(ip)),
        None => false,
    };
    if !allowed {
        bail!("Host no permitido para el audio: {url}");
    }
    Ok(url)
}

fn is_public(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast())
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_public(IpAddr::V4(v4));
            }
            let head = v6.segments()[0];
            // fc00::/7 (ULA) y fe80::/10 (link-local).
            !(v6.is_loopback()
                || v6.is_unspecified()
                || (head & 0xfe00) == 0xfc00
                || (head & 0xffc0) == 0xfe80)
        }
    }
}

/// Descarga el cuerpo por trozos y corta en cuanto supera `max_bytes`.
async fn fetch_limited(http: &reqwest::Client, url: Url, max_bytes: usize) -> Result<Vec<u8>> {
    let mut resp = http
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("No se pudo descargar el audio {url}"))?;
    if !resp.status().is_success() {
        bail!("Descarga de audio fallida ({}): {url}", resp.status());
    }
    if let Some(declared) = resp.content_length() {
        if declared > max_bytes as u64 {
            bail!("El audio declara {declared} bytes, el máximo es {max_bytes}");
        }
    }

    let mut audio = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        if audio.len() + chunk.len() > max_bytes {
            bail!("El audio supera el máximo de {max_bytes} bytes");
        }
        audio.extend_from_slice(&chunk);
    }
    Ok(audio)
}

async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response, what: &str) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(anyhow!("{what} respondió {status}: {body}"));
    }
    resp.json::<T>()
        .await
        .with_context(|| format!("Respuesta inválida de {what}"))
}

#[async_trait]
impl MoodAnalyzer for ModelServiceClient {
    async fn analyze(&self, message: &str) -> Result<MoodReading> {
        debug!("Analizando ánimo del mensaje");
        let resp = self
            .http
            .post(self.endpoint("/analyze/"))
            .json(&AnalyzeRequest { message })
            .send()
            .await
            .context("Servicio de emociones no disponible")?;
        decode(resp, "/analyze/").await
    }
}

#[async_trait]
impl ChatResponder for ModelServiceClient {
    async fn reply_text(&self, message: &str, modality: ResponseModality) -> Result<BotReply> {
        debug!("Generando respuesta de texto ({})", modality.as_str());
        let resp = self
            .http
            .post(self.endpoint("/chat/"))
            .json(&ChatRequest {
                message,
                response_type: modality.as_str(),
            })
            .send()
            .await
            .context("Servicio de chat no disponible")?;
        decode(resp, "/chat/").await
    }

    async fn reply_audio(
        &self,
        audio_url: &str,
        modality: ResponseModality,
        user_id: &str,
    ) -> Result<BotReply> {
        debug!("Generando respuesta para audio ({})", modality.as_str());
        let url = validate_audio_url(audio_url)?;
        let audio = fetch_limited(&self.audio_http, url, self.max_audio_bytes).await?;
        let file = Part::bytes(audio)
            .file_name("message.webm")
            .mime_str("audio/webm")?;
        let form = Form::new()
            .part("file", file)
            .text("response_type", modality.as_str())
            .text("user_id", user_id.to_string());

        let resp = self
            .http
            .post(self.endpoint("/chat/audio/file"))
            .multipart(form)
            .send()
            .await
            .context("Servicio de chat de audio no disponible")?;
        decode(resp, "/chat/audio/file").await
    }
}
