use std::sync::Arc;

pub use crawl_coordinator::store::fixtures::{InMemoryCache, InMemoryPersistence, InMemoryQueue};

pub fn harness() -> (Arc<InMemoryPersistence>, Arc<InMemoryCache>, Arc<InMemoryQueue>) {
    (
        Arc::new(InMemoryPersistence::new()),
        Arc::new(InMemoryCache::new()),
        Arc::new(InMemoryQueue::new()),
    )
}
