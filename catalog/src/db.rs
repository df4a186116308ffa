use crate::types::{CpiObservation, Dataflow};
use sqlx::any::{AnyPoolOptions, AnyRow, install_default_drivers};
use sqlx::{AnyPool, Row};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

const CREATE_DATAFLOW_TABLE: &str = "CREATE TABLE IF NOT EXISTS abs_static_dataflow (
    id TEXT NOT NULL,
    version TEXT NOT NULL,
    agency_id TEXT NOT NULL,
    is_external_reference SMALLINT NOT NULL,
    is_final SMALLINT NOT NULL,
    name TEXT NOT NULL,
    PRIMARY KEY (id, version)
)";

const CREATE_CPI_TABLE: &str = "CREATE TABLE IF NOT EXISTS abs_cpi (
    time_period TEXT PRIMARY KEY,
    value DOUBLE PRECISION NOT NULL
)";

const SELECT_DATAFLOWS: &str = "SELECT id, version, agency_id, is_external_reference, is_final, name
    FROM abs_static_dataflow
    ORDER BY id, version";

const UPSERT_DATAFLOW: &str = "INSERT INTO abs_static_dataflow
    (id, version, agency_id, is_external_reference, is_final, name)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (id, version)
    DO UPDATE SET agency_id = excluded.agency_id,
        is_external_reference = excluded.is_external_reference,
        is_final = excluded.is_final,
        name = excluded.name";

const UPSERT_CPI: &str = "INSERT INTO abs_cpi (time_period, value)
    VALUES ($1, $2)
    ON CONFLICT (time_period)
    DO UPDATE SET value = excluded.value";

/// Handle to the relational store. Cheap to clone; clones share the pool.
///
/// Backed by the sqlx `Any` driver so the same statements run against
/// Postgres in production and SQLite in tests.
#[derive(Clone)]
pub struct Database {
    pool: AnyPool,
}

impl Database {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        tracing::info!("connected to database");

        Ok(Database { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_DATAFLOW_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_CPI_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn list_dataflows(&self) -> Result<Vec<Dataflow>, StoreError> {
        tracing::debug!("fetching dataflow list");
        let rows = sqlx::query(SELECT_DATAFLOWS).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| dataflow_from_row(row).map_err(StoreError::from))
            .collect()
    }

    pub async fn upsert_dataflow(&self, dataflow: &Dataflow) -> Result<(), StoreError> {
        sqlx::query(UPSERT_DATAFLOW)
            .bind(dataflow.id.as_str())
            .bind(dataflow.version.as_str())
            .bind(dataflow.agency_id.as_str())
            .bind(i16::from(dataflow.is_external_reference))
            .bind(i16::from(dataflow.is_final))
            .bind(dataflow.name.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Upserts every dataflow in order. Stops at the first failure; rows
    /// written before the failure stay written.
    pub async fn upsert_dataflows(&self, dataflows: &[Dataflow]) -> Result<usize, StoreError> {
        for (written, dataflow) in dataflows.iter().enumerate() {
            if let Err(e) = self.upsert_dataflow(dataflow).await {
                tracing::error!(
                    dataflow_id = %dataflow.id,
                    written,
                    error = %e,
                    "dataflow upsert failed, aborting batch"
                );
                return Err(e);
            }
        }
        Ok(dataflows.len())
    }

    pub async fn upsert_cpi(&self, observation: &CpiObservation) -> Result<(), StoreError> {
        sqlx::query(UPSERT_CPI)
            .bind(observation.time_period.as_str())
            .bind(observation.value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Same abort-on-first-failure policy as [`Database::upsert_dataflows`].
    pub async fn upsert_cpi_batch(&self, observations: &[CpiObservation]) -> Result<usize, StoreError> {
        for (written, observation) in observations.iter().enumerate() {
            if let Err(e) = self.upsert_cpi(observation).await {
                tracing::error!(
                    time_period = %observation.time_period,
                    written,
                    error = %e,
                    "CPI upsert failed, aborting batch"
                );
                return Err(e);
            }
        }
        Ok(observations.len())
    }

    pub async fn cpi_observations(&self) -> Result<Vec<CpiObservation>, StoreError> {
        let rows = sqlx::query("SELECT time_period, value FROM abs_cpi ORDER BY time_period")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<CpiObservation, StoreError> {
                Ok(CpiObservation {
                    time_period: row.try_get("time_period")?,
                    value: row.try_get("value")?,
                })
            })
            .collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn dataflow_from_row(row: &AnyRow) -> Result<Dataflow, sqlx::Error> {
    Ok(Dataflow {
        id: row.try_get("id")?,
        version: row.try_get("version")?,
        agency_id: row.try_get("agency_id")?,
        is_external_reference: get_flag(row, "is_external_reference")?,
        is_final: get_flag(row, "is_final")?,
        name: row.try_get("name")?,
    })
}

// Flags are stored as SMALLINT 0/1: the `Any` driver cannot decode SQLite booleans.
fn get_flag(row: &AnyRow, column: &str) -> Result<bool, sqlx::Error> {
    row.try_get::<i16, _>(column).map(|flag| flag != 0)
}
