//! Sentry Agent
//!
//! Autonomous defensive loop for a price oracle, AMM, and lending vault:
//! OBSERVE -> REASON -> DECIDE -> ACT -> REPORT, plus a proactive fast path
//! for deviations too large to wait on an LLM round trip.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sentry_agent::chain::ChainGateway;
use sentry_agent::config::AgentConfig;
use sentry_agent::reasoner::GeminiClient;
use sentry_agent::{http, Agent};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Logging isn't initialized yet for a config failure; this is
            // the one place in the process that prints straight to stderr.
            eprintln!("fatal: configuration error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(config.log_level.to_ascii_lowercase())
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        chain_id = config.chain_id,
        poll_interval = config.poll_interval,
        pause_confidence_threshold = config.pause_confidence_threshold,
        "starting sentry agent"
    );

    let chain = match ChainGateway::new(&config).await {
        Ok(chain) => Arc::new(chain),
        Err(e) => {
            tracing::error!(error = %e, "fatal: could not connect to chain node");
            std::process::exit(1);
        }
    };

    let llm = Box::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
    ));

    let backend_port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(8080);

    let mut agent = Agent::new(config, chain, llm);
    let status_handle = agent.status_handle();

    let router = http::router(status_handle);
    let listener = TcpListener::bind(("0.0.0.0", backend_port))
        .await
        .context("binding health endpoint listener")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut http_shutdown_rx = shutdown_rx.clone();

    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown_rx.changed().await;
            })
            .await
    });

    let agent_task = tokio::spawn(async move {
        agent.run(shutdown_rx).await;
    });

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, finishing current cycle");
    let _ = shutdown_tx.send(true);

    let _ = agent_task.await;
    server.abort();

    Ok(())
}

/// Waits for either Ctrl-C or SIGTERM, whichever arrives first.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
