use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named point the sync tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self { name: name.into(), latitude, longitude }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Weather metrics shared by current observations and forecast entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    pub temperature: f64,
    pub feels_like: f64,
    pub humidity: i32,
    pub pressure: i32,
    /// Zero when the provider omits the wind block.
    pub wind_speed: f64,
    /// Short category, e.g. "Rain".
    pub category: String,
    pub description: String,
}

/// Latest weather state as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub coordinates: Coordinates,
    pub conditions: Conditions,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastEntry {
    pub forecast_at: DateTime<Utc>,
    pub conditions: Conditions,
    pub temp_min: f64,
    pub temp_max: f64,
}

/// One forecast response: the provider's canonical coordinates plus its
/// entries in provider order. The number of entries is not fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastBatch {
    pub coordinates: Coordinates,
    pub entries: Vec<ForecastEntry>,
}

/// Row of the current-weather table. One per location name.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CurrentRecord {
    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature: f64,
    pub feels_like: f64,
    pub humidity: i32,
    pub pressure: i32,
    pub wind_speed: f64,
    pub weather_main: String,
    pub weather_description: String,
    pub observed_at: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
}

impl CurrentRecord {
    pub fn from_observation(
        location_name: &str,
        observation: &Observation,
        stored_at: DateTime<Utc>,
    ) -> Self {
        let c = &observation.conditions;
        Self {
            location_name: location_name.to_string(),
            latitude: observation.coordinates.latitude,
            longitude: observation.coordinates.longitude,
            temperature: c.temperature,
            feels_like: c.feels_like,
            humidity: c.humidity,
            pressure: c.pressure,
            wind_speed: c.wind_speed,
            weather_main: c.category.clone(),
            weather_description: c.description.clone(),
            observed_at: observation.observed_at,
            stored_at,
        }
    }
}

/// Row of the forecast table, keyed by (location name, forecast time).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ForecastRecord {
    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub forecast_at: DateTime<Utc>,
    pub temperature: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub humidity: i32,
    pub pressure: i32,
    pub wind_speed: f64,
    pub weather_main: String,
    pub weather_description: String,
    pub stored_at: DateTime<Utc>,
}

impl ForecastRecord {
    pub fn from_entry(
        location_name: &str,
        coordinates: Coordinates,
        entry: &ForecastEntry,
        stored_at: DateTime<Utc>,
    ) -> Self {
        let c = &entry.conditions;
        Self {
            location_name: location_name.to_string(),
            latitude: coordinates.latitude,
            longitude: coordinates.longitude,
            forecast_at: entry.forecast_at,
            temperature: c.temperature,
            feels_like: c.feels_like,
            temp_min: entry.temp_min,
            temp_max: entry.temp_max,
            humidity: c.humidity,
            pressure: c.pressure,
            wind_speed: c.wind_speed,
            weather_main: c.category.clone(),
            weather_description: c.description.clone(),
            stored_at,
        }
    }

    /// Rows for a whole batch, in batch order.
    pub fn from_batch(
        location_name: &str,
        batch: &ForecastBatch,
        stored_at: DateTime<Utc>,
    ) -> Vec<Self> {
        batch
            .entries
            .iter()
            .map(|e| Self::from_entry(location_name, batch.coordinates, e, stored_at))
            .collect()
    }
}
