//! Fetching weather payloads from the provider.
//!
//! A collector issues exactly one request per call and turns the response into
//! typed records. Failures come back as [`FetchError`] values; callers decide
//! whether to skip or abort.

use async_trait::async_trait;
use std::fmt::{self, Debug};

use crate::model::{ForecastBatch, Observation};

pub mod openweather;

pub use openweather::OpenWeatherCollector;

/// Which provider endpoint a request went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Current,
    Forecast,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Current => "current",
            Endpoint::Forecast => "forecast",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{endpoint} request failed: {source}")]
    Transport {
        endpoint: Endpoint,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} request failed with status {status}: {body}")]
    Status {
        endpoint: Endpoint,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to parse {endpoint} payload: {source}")]
    Payload {
        endpoint: Endpoint,
        #[source]
        source: serde_json::Error,
    },

    #[error("incomplete {endpoint} payload: {reason}")]
    Incomplete { endpoint: Endpoint, reason: String },
}

impl FetchError {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            FetchError::Transport { endpoint, .. }
            | FetchError::Status { endpoint, .. }
            | FetchError::Payload { endpoint, .. }
            | FetchError::Incomplete { endpoint, .. } => *endpoint,
        }
    }
}

#[async_trait]
pub trait WeatherCollector: Send + Sync + Debug {
    /// Current conditions at the given point.
    async fn fetch_current(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Observation, FetchError>;

    /// Forecast entries for the given point, in provider order.
    async fn fetch_forecast(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<ForecastBatch, FetchError>;
}
