pub mod cache;
pub mod db;
pub mod metrics_defs;
pub mod types;

use async_trait::async_trait;
use std::sync::Arc;

pub use cache::CachedCatalog;
pub use db::{Database, StoreError};
pub use types::{CpiObservation, Dataflow, Observation};

/// Read access to the set of known dataflows.
///
/// Request validation only depends on this trait, so the store can be wrapped
/// by a cache (or replaced in tests) without changing the validation contract.
#[async_trait]
pub trait DataflowCatalog: Send + Sync {
    /// Returns whether a dataflow with exactly this identifier is stored.
    async fn contains(&self, id: &str) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<Dataflow>, StoreError>;
}

#[async_trait]
impl DataflowCatalog for Database {
    // Reads the whole table and matches in memory; the identifier never
    // reaches the statement.
    async fn contains(&self, id: &str) -> Result<bool, StoreError> {
        let dataflows = self.list_dataflows().await?;
        Ok(dataflows.iter().any(|dataflow| dataflow.id == id))
    }

    async fn list(&self) -> Result<Vec<Dataflow>, StoreError> {
        self.list_dataflows().await
    }
}

#[async_trait]
impl<T: DataflowCatalog + ?Sized> DataflowCatalog for Arc<T> {
    async fn contains(&self, id: &str) -> Result<bool, StoreError> {
        (**self).contains(id).await
    }

    async fn list(&self) -> Result<Vec<Dataflow>, StoreError> {
        (**self).list().await
    }
}
