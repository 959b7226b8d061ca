use crate::engine::{EngineError, EngineHandle};
use zbus::interface;

pub const BUS_NAME: &str = "org.facegreet.Daemon1";
pub const OBJECT_PATH: &str = "/org/facegreet/Daemon1";

/// D-Bus interface for the facegreet daemon.
///
/// Bus name: org.facegreet.Daemon1
/// Object path: /org/facegreet/Daemon1
pub struct FaceGreetService {
    pub engine: EngineHandle,
}

fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.facegreet.Daemon1")]
impl FaceGreetService {
    /// Return daemon status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "state": status.state,
            "identities": status.identities.len(),
            "cooling_down": status.cooling_down,
            "stats": status.stats,
        })
        .to_string())
    }

    /// List the identities in the reference set with their descriptor counts.
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        serde_json::to_string(&status.identities)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Forget every last-notified time so the next sighting greets again.
    async fn reset_cooldowns(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("reset_cooldowns requested");
        self.engine.reset_cooldowns().await.map_err(to_fdo)?;
        Ok(true)
    }
}
