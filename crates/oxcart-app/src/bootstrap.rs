//! Service wiring: configuration, telemetry, engine, and the API server.

use std::net::SocketAddr;
use std::sync::Arc;

use oxcart_api::ApiServer;
use oxcart_config::Settings;
use oxcart_core::{ArchiveEngine, CheckpointLog};
use oxcart_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, Metrics, init_logging};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::store::DirObjectStore;

/// Entry point for the Oxcart application boot sequence.
///
/// # Errors
///
/// Returns an error if configuration, telemetry, engine construction, resume,
/// or serving fails.
pub async fn run_app() -> AppResult<()> {
    let settings = oxcart_config::load_from_env().map_err(|source| AppError::Config {
        operation: "config.load_from_env",
        source,
    })?;
    run_app_with(settings).await
}

/// Boot sequence over injected settings to simplify testing.
pub(crate) async fn run_app_with(settings: Settings) -> AppResult<()> {
    let logging = LoggingConfig {
        level: &settings.log_level,
        format: settings
            .log_format
            .as_deref()
            .map_or_else(LogFormat::infer, LogFormat::parse),
        ..LoggingConfig::default()
    };
    init_logging(&logging).map_err(|source| AppError::Telemetry {
        operation: "telemetry.init_logging",
        source,
    })?;
    let _context = GlobalContextGuard::new("serve");

    info!(
        state_dir = %settings.state_dir.display(),
        target_root = %settings.target_root.display(),
        max_parallel = settings.max_parallel_transfers,
        "oxcart bootstrap starting"
    );

    let telemetry = Metrics::new().map_err(|source| AppError::Telemetry {
        operation: "telemetry.metrics",
        source,
    })?;

    let engine = build_engine(&settings, &telemetry).await?;
    let resumed = engine.resume().await.map_err(|source| AppError::Core {
        operation: "engine.resume",
        source,
    })?;
    info!(resumed, "checkpoint replay complete");

    let addr = SocketAddr::new(settings.bind_addr, settings.http_port);
    ApiServer::new(engine, telemetry)
        .serve(addr)
        .await
        .map_err(|source| AppError::ApiServer {
            operation: "api.serve",
            source,
        })
}

/// Wire the checkpoint log, object store, and engine from settings.
pub(crate) async fn build_engine(
    settings: &Settings,
    telemetry: &Metrics,
) -> AppResult<Arc<ArchiveEngine>> {
    let checkpoints =
        CheckpointLog::new(&settings.state_dir).map_err(|source| AppError::Core {
            operation: "checkpoint.open",
            source,
        })?;
    let store = DirObjectStore::new(&settings.target_root)
        .await
        .map_err(|source| AppError::Store {
            operation: "store.open",
            source,
        })?;
    Ok(Arc::new(ArchiveEngine::new(
        Arc::new(store),
        checkpoints,
        settings.max_parallel_transfers,
        telemetry.clone(),
    )))
}
