//! PostgreSQL telemetry sink.
//!
//! Every poll batch is written in one transaction as a sequence of upserts
//! into the `robots` table, keyed by device name:
//!
//! ```sql
//! INSERT INTO robots (name, is_active, mode, cycles_current, cycles_total, oee)
//! VALUES ($1, $2, $3, $4, $5, $6)
//! ON CONFLICT (name) DO UPDATE SET ...
//! ```
//!
//! The pool connects lazily, so an unreachable database shows up as a failed
//! batch rather than a startup error.

mod config;

use std::time::Duration;

use async_trait::async_trait;
use robolink_common::{PollBatch, SinkError, TelemetrySink};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::debug;

pub use config::DatabaseConfig;

/// Row upsert keyed by device name.
pub const UPSERT_ROBOT: &str = r#"
    INSERT INTO robots (name, is_active, mode, cycles_current, cycles_total, oee)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (name) DO UPDATE SET
        is_active = EXCLUDED.is_active,
        mode = EXCLUDED.mode,
        cycles_current = EXCLUDED.cycles_current,
        cycles_total = EXCLUDED.cycles_total,
        oee = EXCLUDED.oee
"#;

/// Store errors outside the sink path.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Telemetry sink backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgTelemetryStore {
    pool: PgPool,
}

impl PgTelemetryStore {
    /// Build a lazily connecting pool from configuration.
    pub fn new(config: &DatabaseConfig) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_lazy_with(config.connect_options());
        Self { pool }
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn write_batch(&self, batch: &PollBatch) -> Result<usize, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        for (_, record) in batch {
            sqlx::query(UPSERT_ROBOT)
                .bind(&record.device_name)
                .bind(record.is_active)
                .bind(record.mode.to_string())
                .bind(i64::from(record.cycles_current))
                .bind(i64::from(record.cycles_total))
                .bind(record.oee)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(batch.len())
    }
}

#[async_trait]
impl TelemetrySink for PgTelemetryStore {
    async fn upsert_telemetry(&self, batch: &PollBatch) -> Result<usize, SinkError> {
        let written = self.write_batch(batch).await.map_err(classify)?;
        debug!(rows = written, "Upserted robot telemetry");
        Ok(written)
    }
}

/// Database-side refusals reject the batch; anything else means the store
/// could not be reached.
fn classify(err: sqlx::Error) -> SinkError {
    match err {
        sqlx::Error::Database(e) => SinkError::Rejected(e.to_string()),
        other => SinkError::Unavailable(other.to_string()),
    }
}
