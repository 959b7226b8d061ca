use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod overlay;
mod speech;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegreetd starting");

    let config = config::Config::from_env();
    tracing::info!(
        identities = ?config.identities,
        reference_dir = %config.reference_dir.display(),
        threshold = config.match_threshold,
        cooldown_ms = config.cooldown_ms,
        "configuration loaded"
    );

    let (engine, engine_thread) =
        engine::spawn_engine(&config).context("failed to start recognition engine")?;

    let service = dbus_interface::FaceGreetService {
        engine: engine.clone(),
    };
    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(dbus_interface::BUS_NAME)?
        .serve_at(dbus_interface::OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = dbus_interface::BUS_NAME, "facegreetd ready");

    let mut engine_exit = tokio::task::spawn_blocking(move || engine_thread.join());

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("facegreetd shutting down");
            if let Err(e) = engine.stop().await {
                tracing::debug!(error = %e, "engine already stopped");
            }
            if (&mut engine_exit).await?.is_err() {
                anyhow::bail!("engine thread panicked");
            }
        }
        joined = &mut engine_exit => {
            if joined?.is_err() {
                anyhow::bail!("engine thread panicked");
            }
            anyhow::bail!("capture loop ended unexpectedly");
        }
    }

    Ok(())
}
