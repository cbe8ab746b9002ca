use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::hub::{Hub, SharedHub};
use crate::registry::{SessionRegistry, SharedRegistry};
use crate::store::memory::MemoryStore;
use crate::store::sled_store::SledStore;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub hub: SharedHub,
    pub registry: SharedRegistry,
    pub store: Arc<dyn Store>,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build application state. Returns the end-notification receiver the
    /// registry maintenance task must drain.
    pub fn new(config: ServerConfig) -> (Self, mpsc::UnboundedReceiver<String>) {
        let config = Arc::new(config);
        let store: Arc<dyn Store> = if config.data_dir.is_empty() {
            Arc::new(MemoryStore::new())
        } else {
            match SledStore::open(&config.data_dir) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::error!(dir = %config.data_dir, error = %e, "Failed to open store");
                    std::process::exit(1);
                }
            }
        };
        Self::with_store(config, store)
    }

    pub fn with_store(
        config: Arc<ServerConfig>,
        store: Arc<dyn Store>,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let hub: SharedHub = Arc::new(RwLock::new(Hub::new(config.limits.replay_tail)));
        let (registry, on_end_rx) = SessionRegistry::new(
            Arc::clone(&hub),
            Arc::clone(&store),
            Arc::clone(&config),
        );
        (
            Self {
                hub,
                registry: Arc::new(RwLock::new(registry)),
                store,
                config,
                ws_connection_count: Arc::new(AtomicUsize::new(0)),
                shutdown: CancellationToken::new(),
            },
            on_end_rx,
        )
    }
}

/// RAII guard that decrements a counter on drop.
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
