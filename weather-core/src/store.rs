//! Persistence of current observations and forecast windows.
//!
//! Two write strategies live here:
//! - current weather is upserted, one row per location name;
//! - forecasts are replaced per location for every row dated today or later,
//!   in a single transaction. Rows dated before today are never touched and
//!   form the only weather history kept.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::model::{CurrentRecord, ForecastBatch, ForecastRecord, Observation};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CURRENT_TABLE: &str = "current_weather";
pub const FORECAST_TABLE: &str = "forecast";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to connect to database: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("failed to create or verify schema: {0}")]
    Schema(#[source] sqlx::Error),

    #[error("failed to write {table} for {location}: {source}")]
    Write {
        table: &'static str,
        location: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to read {table} for {location}: {source}")]
    Read {
        table: &'static str,
        location: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("store is not connected")]
    NotConnected,
}

#[async_trait]
pub trait WeatherStore: Send + Debug {
    /// Acquire the underlying connection.
    async fn connect(&mut self) -> Result<(), StoreError>;

    /// Create both tables and their indexes if absent.
    async fn ensure_schema(&mut self) -> Result<(), StoreError>;

    /// Write or overwrite the single current-weather row for `location`.
    async fn upsert_current(
        &mut self,
        location: &str,
        observation: &Observation,
    ) -> Result<(), StoreError>;

    /// Atomically delete every forecast row for `location` dated at or after
    /// the start of today, then insert one row per batch entry. Returns the
    /// number of rows inserted. An empty batch still clears the window.
    async fn replace_forecast_window(
        &mut self,
        location: &str,
        batch: &ForecastBatch,
    ) -> Result<usize, StoreError>;

    async fn current(&mut self, location: &str) -> Result<Option<CurrentRecord>, StoreError>;

    /// All forecast rows for `location`, ordered by forecast time.
    async fn forecasts(&mut self, location: &str) -> Result<Vec<ForecastRecord>, StoreError>;

    /// Release the connection. Safe to call when never connected.
    async fn close(&mut self);
}
