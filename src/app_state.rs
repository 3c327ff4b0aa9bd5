use std::sync::Arc;

use crate::{
    config::AppConfig,
    errors::{InsureError, InsureResult},
    event_log::EventLogger,
    session_guard::GuardPolicy,
    storage::{BlobStore, MemoryBlobStore, SledBlobStore},
};

/// Shared state handed to every handler
pub struct AppState {
    pub config: AppConfig,
    pub policy: GuardPolicy,
    pub logger: EventLogger,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn BlobStore>) -> Self {
        let policy = GuardPolicy::from(&config.session);
        let logger = EventLogger::new(store, config.events.storage_key.clone());
        Self {
            config,
            policy,
            logger,
        }
    }

    /// Build state over the configured sled store, or an in-memory one when
    /// `ephemeral` is set.
    pub fn open(config: AppConfig, ephemeral: bool) -> InsureResult<Self> {
        let store: Arc<dyn BlobStore> = if ephemeral {
            tracing::info!("using in-memory event store");
            Arc::new(MemoryBlobStore::new())
        } else {
            std::fs::create_dir_all(&config.data_dir)
                .map_err(|e| InsureError::io("create data dir", e))?;
            let path = config.store_path();
            tracing::info!(path = %path.display(), "using sled event store");
            Arc::new(SledBlobStore::open(path)?)
        };
        Ok(Self::new(config, store))
    }
}
