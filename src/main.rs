//! # Voice Bridge Backend - Main Application Entry Point
//!
//! Real-time voice bridge: a caller's audio stream is transcribed, answered by a
//! language model, and spoken back, with the caller able to interrupt at any time.
//!
//! ## Application Architecture:
//! - **config**: Configuration (TOML file + environment variables)
//! - **state**: Shared state handed to every handler: registry, metrics, config
//! - **session**: The per-call orchestrator (history, turns, barge-in, registry)
//! - **collaborators**: Traits for the recognizer, generator, synthesizer and transport
//! - **providers**: Network implementations of those traits
//! - **websocket**: The telephony media stream, one session per connection
//! - **audio**: µ-law/PCM conversion
//! - **health / handlers**: HTTP API
//! - **error**: Error types and HTTP error responses

mod audio;
mod collaborators;
mod config;
mod error;
mod handlers;
mod health;
mod providers;
mod session;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use providers::HttpCollaborators;
use session::{SessionRegistry, SessionSettings};
use state::{AppState, BridgeMetrics};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once a SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Builds the session registry** on top of the network collaborators
/// 4. **Serves** the media stream WebSocket and the HTTP API
/// 5. **Shuts down gracefully**, ending every live call first
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-bridge-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    if config.recognizer.api_key.is_empty() {
        warn!("No recognizer API key configured; calls will be rejected");
    }

    let metrics = Arc::new(BridgeMetrics::new());
    let collaborators = Arc::new(HttpCollaborators::new(&config)?);
    let registry = Arc::new(SessionRegistry::new(
        collaborators,
        SessionSettings::from(&config.session),
        metrics.clone(),
    ));

    let app_state = AppState::new(config.clone(), registry.clone(), metrics);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/sessions", web::get().to(handlers::list_sessions))
                    .route("/sessions/{id}", web::get().to(handlers::get_session))
                    .route("/sessions/{id}", web::delete().to(handlers::end_session))
                    .route(
                        "/sessions/{id}/history",
                        web::get().to(handlers::get_session_history),
                    ),
            )
            .route("/health", web::get().to(health::health_check))
            .route("/audiostream", web::get().to(websocket::media_stream))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, ending live sessions...");
            let ended = registry.end_all();
            info!("Ended {} session(s), stopping server...", ended);
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing.
///
/// ## Environment Variables:
/// - `RUST_LOG`: log filter; defaults to "voice_bridge_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_bridge_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Set the shutdown flag on SIGTERM or SIGINT.
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Resolves once the shutdown flag is set.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
