//! fleetmedic -- vehicle telemetry health scoring and anomaly detection.
//!
//! The core is [`detect::Evaluator`]: validate a raw sample, run the fixed
//! threshold rules, test it against an isolation forest fit on the vehicle's
//! history, then score and classify. Storage, the HTTP surface, and the
//! simulator are callers of that core.

pub mod api;
pub mod config;
pub mod detect;
pub mod history;
pub mod simulator;
pub mod storage;
pub mod telemetry;

use anyhow::{Context, Result};

use crate::config::{FleetConfig, LogFormat, LoggingConfig};

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
pub fn init_logging(cfg: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match cfg.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    if let Err(e) = result {
        eprintln!("logging already initialised: {e}");
    }
}

/// Start the fleetmedic server: storage plus the ingestion API.
pub async fn serve(cfg: &FleetConfig) -> Result<()> {
    tracing::info!(db_path = %cfg.server.db_path, "Initializing database");
    let pool = storage::open_pool(&cfg.server.db_path)?;

    let state = api::state::AppState::new(pool, cfg);
    let app = api::router(state);

    let addr: std::net::SocketAddr = cfg
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", cfg.server.bind))?;

    tracing::info!(
        %addr,
        min_history = cfg.detector.min_history,
        contamination = cfg.detector.contamination,
        "fleetmedic listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
