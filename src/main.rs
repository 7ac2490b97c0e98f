//! Streaming parenting assistant backend
//!
//! Serves a single chat conversation with a persona-driven generation
//! model, streaming replies to the browser as they arrive.

mod api;
mod chat;
mod config;
mod llm;
mod persona;
mod session;
#[cfg(test)]
mod testing;
mod transcript;
mod turn;

use api::{create_router, AppState};
use chat::{ChatService, Settings};
use config::AppConfig;
use llm::{find_model, GeminiService, LoggingService};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "douzhidao=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();
    if config.api_key.is_none() {
        tracing::warn!("No API key configured. Set GEMINI_API_KEY or API_KEY.");
    }
    if find_model(&config.model).is_none() {
        tracing::warn!(model = %config.model, "Configured model is not in the catalog");
    }

    let gemini = GeminiService::new(config.api_key.clone(), Some(&config.base_url))?;
    let service = Arc::new(LoggingService::new(Arc::new(gemini)));

    let settings = Settings {
        model: config.model.clone(),
        ..Settings::default()
    };
    let chat = Arc::new(ChatService::new(service, settings, config.lazy_bootstrap));
    tracing::info!(
        model = %config.model,
        base_url = %config.base_url,
        lazy_bootstrap = config.lazy_bootstrap,
        "Chat service initialized"
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(Arc::clone(&chat)))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    chat.shutdown().await;
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => tracing::info!("Received SIGINT - shutting down"),
        () = terminate => tracing::info!("Received SIGTERM - shutting down"),
    }
}
