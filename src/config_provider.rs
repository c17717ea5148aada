use tokio::sync::RwLock;

use crate::domain::{AutoRecordConfig, CacheConfig};

/// Replaces shared-nothing per-process singletons with implicit reload:
/// an explicit provider exposing an immutable snapshot. Reload is an
/// explicit operation, invoked from the scheduler tick rather than a
/// background poll owned by this type.
pub struct ConfigProvider {
    auto_record: RwLock<AutoRecordConfig>,
    cache: RwLock<CacheConfig>,
}

impl ConfigProvider {
    pub fn new(auto_record: AutoRecordConfig, cache: CacheConfig) -> Self {
        Self {
            auto_record: RwLock::new(auto_record),
            cache: RwLock::new(cache),
        }
    }

    /// Consulted at the top of each queue consumer pass.
    pub async fn current_auto_record(&self) -> AutoRecordConfig {
        self.auto_record.read().await.clone()
    }

    /// Consulted on restart and on an explicit "reload" admin action.
    pub async fn current_cache(&self) -> CacheConfig {
        self.cache.read().await.clone()
    }

    pub async fn reload_auto_record(&self, cfg: AutoRecordConfig) {
        *self.auto_record.write().await = cfg;
    }

    pub async fn reload_cache(&self, cfg: CacheConfig) {
        *self.cache.write().await = cfg;
    }
}
