//! Application state shared across handlers and timers.
//!
//! # Locks
//!
//! - **`store`** (Mutex): shared with the sync engine, which takes it once
//!   per batch so API reads interleave with a long backfill.
//! - **`config`** (RwLock): read by handlers and the scheduler.

use std::sync::Arc;

use sapwatch_core::{HttpTelemetryApi, RemoteDataClient};
use sapwatch_store::Store;
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;
use crate::sync::SyncEngine;

/// Shared application state.
pub struct AppState {
    /// The data store.
    pub store: Arc<Mutex<Store>>,
    /// Configuration.
    pub config: RwLock<Config>,
    /// Remote data client; clones share its cache.
    pub client: RemoteDataClient,
    /// The sync engine.
    pub sync: Arc<SyncEngine>,
}

impl AppState {
    /// Create state talking to the remote API described by `config`.
    pub fn new(store: Store, config: Config) -> sapwatch_core::Result<Arc<Self>> {
        let api = HttpTelemetryApi::new(config.http_config())?;
        let client = RemoteDataClient::with_options(Arc::new(api), config.fetch_options());
        Ok(Self::with_client(store, config, client))
    }

    /// Create state around an existing client.
    pub fn with_client(store: Store, config: Config, client: RemoteDataClient) -> Arc<Self> {
        let store = Arc::new(Mutex::new(store));
        let sync = Arc::new(SyncEngine::new(
            Arc::clone(&store),
            client.clone(),
            config.sensor_devices(),
            config.sync.settings(),
        ));

        Arc::new(Self {
            store,
            config: RwLock::new(config),
            client,
            sync,
        })
    }
}
