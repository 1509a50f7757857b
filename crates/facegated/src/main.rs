use anyhow::{Context, Result};
use facegate_core::FaceAuthService;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};
use dbus_interface::{FaceGateService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        bus = ?config.bus,
        timeout_secs = config.request_timeout.as_secs(),
        "facegated starting"
    );

    let service = FaceAuthService::from_model_dir(config.pipeline.clone(), &config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    let engine = engine::spawn_engine(service, config.request_timeout)
        .context("spawning engine thread")?;

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, FaceGateService::new(engine))?
        .build()
        .await
        .with_context(|| format!("registering {BUS_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "facegated ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    Ok(())
}
