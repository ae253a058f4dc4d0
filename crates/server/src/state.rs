use crate::config::ServerConfig;
use crate::registry::Registry;
use crate::storage::Store;
use crate::verification::VerificationManager;
use std::sync::Arc;

/// Shared server context handed explicitly to every handler.
///
/// There is no process-wide mutable singleton; anything that needs the
/// registries receives this state.
pub struct ServerState {
    pub config: ServerConfig,
    pub registry: Registry,
    pub verifications: VerificationManager,
    pub store: Arc<dyn Store>,
}

impl ServerState {
    pub fn new(config: ServerConfig, store: Arc<dyn Store>) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry: Registry::new(),
            verifications: VerificationManager::new(),
            store,
        })
    }
}
