//! edu-ai - Streaming advisory engine service
//!
//! Streams model output for four advisory features (profile analysis,
//! university recommendations, cost estimate, flashcards), extracts typed
//! results, and fills gaps with deterministic fallback scoring.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use edu_common::config::{load_config, TomlConfig};
use edu_common::events::EventBus;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use edu_ai::advisory::{HttpLlmTransport, InMemoryQuota};
use edu_ai::catalog::Catalog;
use edu_ai::AppState;

/// Command-line arguments for edu-ai
#[derive(Parser, Debug)]
#[command(name = "edu-ai")]
#[command(about = "Streaming advisory engine for university admissions guidance")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "EDU_AI_PORT")]
    port: Option<u16>,

    /// University catalog JSON (overrides config)
    #[arg(long, env = "EDU_CATALOG")]
    catalog: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config: TomlConfig =
        load_config(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(catalog) = args.catalog {
        config.advisory.catalog_path = Some(catalog);
    }

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("edu_ai={0},edu_common={0},tower_http=info", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting edu-ai (advisory engine)");
    info!(
        "Version: {} ({}, {} build at {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );

    let catalog = match &config.advisory.catalog_path {
        Some(path) => Catalog::load_json(path)
            .with_context(|| format!("Failed to load catalog {}", path.display()))?,
        None => {
            warn!("No catalog configured; recommendation fallback is unavailable");
            Catalog::empty()
        }
    };

    let transport = HttpLlmTransport::new(&config.llm, config.resolve_llm_api_key())
        .context("Failed to build LLM transport")?;
    let quota = InMemoryQuota::new(config.advisory.free_sessions_per_user);

    let event_bus = EventBus::new(config.advisory.event_capacity);
    info!(capacity = event_bus.capacity(), "Event bus initialized");

    let state = AppState::new(
        Arc::new(catalog),
        Arc::new(transport),
        Arc::new(quota),
        event_bus,
        config.advisory.clone(),
    );
    let registry = Arc::clone(&state.registry);
    let app = edu_ai::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    registry.cancel_all().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
