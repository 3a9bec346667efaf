//! llm-proxy - transparent relay for OpenAI-compatible completion servers
//!
//! This is the main entry point for the proxy server.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use llm_proxy::{routes, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Configuration errors are fatal before anything is bound
    let config = Config::from_env()?;

    init_tracing(config.log_json);

    info!("Starting llm-proxy");

    routes::metrics::init_metrics();

    let state = Arc::new(AppState::new(config.clone())?);

    if let Some(admin_port) = config.admin_port {
        let admin_addr = format!("{}:{}", config.host, admin_port);
        let admin_listener = TcpListener::bind(&admin_addr)
            .await
            .with_context(|| format!("Failed to bind admin listener on {}", admin_addr))?;
        let admin_app = routes::create_admin_router(state.clone());

        info!("Admin endpoints listening on {}", admin_addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(admin_listener, admin_app).await {
                error!(error = %e, "Admin listener failed");
            }
        });
    }

    let app = routes::create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind proxy listener on {}", addr))?;
    let local: SocketAddr = listener.local_addr()?;

    info!("Proxy server listening on {}", local);
    info!("Forwarding requests to {}", config.target_url);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("llm-proxy shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "llm_proxy=info,tower_http=info".into());

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    }
}

/// Handle graceful shutdown signals
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating shutdown");
        }
    }
}
