// Short-lived cache of dataflow existence, so request validation does not hit
// the store on every request. Both hits and misses are cached; errors are not.
use crate::metrics_defs::{DATAFLOW_CACHE_HIT, DATAFLOW_CACHE_MISS};
use crate::types::Dataflow;
use crate::{DataflowCatalog, StoreError};
use async_trait::async_trait;
use moka::sync::Cache;
use shared::counter;
use std::time::Duration;

pub const DEFAULT_CAPACITY: u64 = 1000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

pub struct CachedCatalog<C> {
    inner: C,
    cache: Cache<String, bool>,
}

impl<C: DataflowCatalog> CachedCatalog<C> {
    pub fn new(inner: C, max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        CachedCatalog { inner, cache }
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl<C: DataflowCatalog> DataflowCatalog for CachedCatalog<C> {
    async fn contains(&self, id: &str) -> Result<bool, StoreError> {
        if let Some(exists) = self.cache.get(id) {
            counter!(DATAFLOW_CACHE_HIT).increment(1);
            return Ok(exists);
        }
        counter!(DATAFLOW_CACHE_MISS).increment(1);

        let exists = self.inner.contains(id).await?;
        self.cache.insert(id.to_string(), exists);
        Ok(exists)
    }

    async fn list(&self) -> Result<Vec<Dataflow>, StoreError> {
        self.inner.list().await
    }
}
