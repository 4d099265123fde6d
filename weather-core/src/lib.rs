//! Core library for `meteo-sync`.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - The OpenWeather collector and its typed payloads
//! - The Postgres store with its upsert and forecast-window strategies
//! - Run orchestration with per-step failure isolation
//!
//! It is used by the `meteo-sync` binary, but can also be reused by other
//! binaries or services.

pub mod clock;
pub mod collector;
pub mod config;
pub mod model;
pub mod store;
pub mod summary;
pub mod sync;

pub use clock::Clock;
pub use collector::{Endpoint, FetchError, OpenWeatherCollector, WeatherCollector};
pub use config::{Config, ConfigError, DatabaseConfig, ProviderConfig};
pub use model::{
    Conditions, Coordinates, CurrentRecord, ForecastBatch, ForecastEntry, ForecastRecord,
    Location, Observation,
};
pub use store::{MemoryStore, PgStore, StoreError, WeatherStore};
pub use summary::{DailySummary, daily_summaries};
pub use sync::{LocationReport, RunPlan, RunReport, SUCCESS_MESSAGE, StepOutcome};
