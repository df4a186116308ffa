//! Offline jobs that load statistics API data into the store.

use crate::upstream::{StatisticsApi, UpstreamError};
use catalog::types::ObservationError;
use catalog::{CpiObservation, Database, StoreError};
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum RefreshError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid observation: {0}")]
    InvalidObservation(#[from] ObservationError),
    #[error("failed to write snapshot {path}: {source}")]
    Snapshot {
        path: String,
        source: std::io::Error,
    },
}

/// Fetches every dataflow stub and upserts it, keyed by id and version.
///
/// The raw response is written to `snapshot` first, when given. Returns the
/// number of dataflows written.
pub async fn refresh_dataflows(
    api: &StatisticsApi,
    db: &Database,
    snapshot: Option<&Path>,
) -> Result<usize, RefreshError> {
    let (dataflows, raw) = api.dataflows().await?;
    tracing::info!(count = dataflows.len(), "fetched dataflows");

    if let Some(path) = snapshot {
        tokio::fs::write(path, &raw)
            .await
            .map_err(|source| RefreshError::Snapshot {
                path: path.display().to_string(),
                source,
            })?;
        tracing::debug!(path = %path.display(), "wrote dataflow snapshot");
    }

    let written = db.upsert_dataflows(&dataflows).await?;
    tracing::info!(written, "dataflows stored");
    Ok(written)
}

/// Imports the CPI series from the labelled CSV endpoint.
///
/// Every row is checked before anything is written; the batch then aborts on
/// the first failed upsert.
pub async fn import_cpi(
    api: &StatisticsApi,
    db: &Database,
    dataflow: &str,
    key: &str,
) -> Result<usize, RefreshError> {
    let observations = api.observations_csv(dataflow, key).await?;
    let cpi = observations
        .iter()
        .map(CpiObservation::try_from)
        .collect::<Result<Vec<_>, _>>()
        .inspect_err(|e| tracing::error!(error = %e, "rejecting CPI import"))?;

    let written = db.upsert_cpi_batch(&cpi).await?;
    tracing::info!(written, dataflow, key, "CPI observations stored");
    Ok(written)
}
