// Módulos de la aplicación
mod analytics;
mod api;
mod app_state;
mod auth;
mod collaborators;
mod config;
mod error;
mod llm;
mod models;
mod pipeline;
mod store;
mod vector_index;

use std::sync::Arc;

use crate::app_state::AppState;
use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env()?;

    // 3. Conectar el almacén y asegurar esquemas
    let store = store::from_config(&cfg).await?;
    info!("Almacén '{}' listo.", store.backend());

    // 4. Reconstruir los índices vectoriales desde lo persistido
    let user_index = Arc::new(vector_index::VectorIndex::new(config::EMBEDDING_DIM));
    let chat_index = Arc::new(vector_index::VectorIndex::new(config::EMBEDDING_DIM));
    vector_index::warm_up(store.as_ref(), &user_index, &chat_index).await?;

    // 5. Servicios externos (clasificador LLM y servicio de modelos)
    let classifier = Arc::new(llm::LlmClassifier::from_config(&cfg));
    let model_service = Arc::new(collaborators::ModelServiceClient::from_config(&cfg)?);
    info!(
        "Clasificador: {:?} ({}). Servicio de modelos: {}",
        cfg.llm_provider, cfg.llm_classifier_model, cfg.model_service_url
    );

    // 6. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        store,
        classifier,
        mood: model_service.clone(),
        responder: model_service,
        user_index,
        chat_index,
    };

    // 7. Configurar el router de la API
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 8. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr).await?;
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Apagado ordenado con Ctrl-C.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
