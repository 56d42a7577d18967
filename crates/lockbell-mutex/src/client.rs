// Lock client
// Bundles the injected store, bus, and configuration and hands out mutex handles

use std::sync::Arc;
use std::time::Duration;

use lockbell_bus::Bus;

use crate::config::LockConfig;
use crate::mutex::DistributedMutex;
use crate::store::LockStore;

/// Factory for [`DistributedMutex`] handles sharing one store and one bus
#[derive(Clone)]
pub struct LockClient {
    store: Arc<dyn LockStore>,
    bus: Arc<dyn Bus>,
    config: LockConfig,
}

impl LockClient {
    pub fn new(store: Arc<dyn LockStore>, bus: Arc<dyn Bus>, config: LockConfig) -> Self {
        Self { store, bus, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn LockStore> {
        self.store.clone()
    }

    pub fn bus(&self) -> Arc<dyn Bus> {
        self.bus.clone()
    }

    /// New handle on `key` using the configured TTL
    pub fn new_mutex(&self, key: impl Into<String>) -> DistributedMutex {
        self.new_mutex_with_ttl(key, self.config.ttl())
    }

    pub fn new_mutex_with_ttl(&self, key: impl Into<String>, ttl: Duration) -> DistributedMutex {
        DistributedMutex::new(key, ttl, self.store.clone(), self.bus.clone())
    }
}
