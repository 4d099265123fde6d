use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::{
    config::ProviderConfig,
    model::{Conditions, Coordinates, ForecastBatch, ForecastEntry, Observation},
};

use super::{Endpoint, FetchError, WeatherCollector};

/// OpenWeather 2.5 API client for the `/weather` and `/forecast` endpoints.
#[derive(Debug, Clone)]
pub struct OpenWeatherCollector {
    api_key: String,
    base_url: String,
    units: String,
    lang: String,
    http: Client,
}

impl OpenWeatherCollector {
    pub fn new(api_key: String, config: &ProviderConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            units: config.units.clone(),
            lang: config.lang.clone(),
            http,
        })
    }

    fn url(&self, endpoint: Endpoint) -> String {
        let path = match endpoint {
            Endpoint::Current => "weather",
            Endpoint::Forecast => "forecast",
        };
        format!("{}/{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        latitude: f64,
        longitude: f64,
    ) -> Result<T, FetchError> {
        let res = self
            .http
            .get(self.url(endpoint))
            .query(&[
                ("lat", latitude.to_string().as_str()),
                ("lon", longitude.to_string().as_str()),
                ("appid", self.api_key.as_str()),
                ("units", self.units.as_str()),
                ("lang", self.lang.as_str()),
            ])
            .send()
            .await
            .map_err(|source| FetchError::Transport { endpoint, source })?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|source| FetchError::Transport { endpoint, source })?;

        if !status.is_success() {
            return Err(FetchError::Status { endpoint, status, body: truncate_body(&body) });
        }

        serde_json::from_str(&body).map_err(|source| FetchError::Payload { endpoint, source })
    }
}

#[derive(Debug, Deserialize)]
struct OwCoord {
    lat: f64,
    lon: f64,
}

impl From<OwCoord> for Coordinates {
    fn from(c: OwCoord) -> Self {
        Coordinates { latitude: c.lat, longitude: c.lon }
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: f64,
    humidity: f64,
    pressure: f64,
    temp_min: Option<f64>,
    temp_max: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    main: String,
    description: String,
}

#[derive(Debug, Default, Deserialize)]
struct OwWind {
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    coord: OwCoord,
    dt: i64,
    main: OwMain,
    weather: Vec<OwWeather>,
    #[serde(default)]
    wind: Option<OwWind>,
}

#[derive(Debug, Deserialize)]
struct OwCity {
    coord: OwCoord,
}

#[derive(Debug, Deserialize)]
struct OwForecastItem {
    dt: i64,
    main: OwMain,
    weather: Vec<OwWeather>,
    #[serde(default)]
    wind: Option<OwWind>,
}

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    city: OwCity,
    list: Vec<OwForecastItem>,
}

fn conditions(
    endpoint: Endpoint,
    main: &OwMain,
    weather: Vec<OwWeather>,
    wind: Option<OwWind>,
) -> Result<Conditions, FetchError> {
    let first = weather.into_iter().next().ok_or_else(|| FetchError::Incomplete {
        endpoint,
        reason: "empty weather list".to_string(),
    })?;

    Ok(Conditions {
        temperature: main.temp,
        feels_like: main.feels_like,
        humidity: main.humidity.round() as i32,
        pressure: main.pressure.round() as i32,
        wind_speed: wind.and_then(|w| w.speed).unwrap_or(0.0),
        category: first.main,
        description: first.description,
    })
}

fn unix_to_utc(endpoint: Endpoint, ts: i64) -> Result<DateTime<Utc>, FetchError> {
    DateTime::from_timestamp(ts, 0).ok_or_else(|| FetchError::Incomplete {
        endpoint,
        reason: format!("timestamp {ts} out of range"),
    })
}

fn observation_from(parsed: OwCurrentResponse) -> Result<Observation, FetchError> {
    let endpoint = Endpoint::Current;
    let observed_at = unix_to_utc(endpoint, parsed.dt)?;

    Ok(Observation {
        coordinates: parsed.coord.into(),
        conditions: conditions(endpoint, &parsed.main, parsed.weather, parsed.wind)?,
        observed_at,
    })
}

fn batch_from(parsed: OwForecastResponse) -> Result<ForecastBatch, FetchError> {
    let endpoint = Endpoint::Forecast;

    let entries = parsed
        .list
        .into_iter()
        .map(|item| -> Result<ForecastEntry, FetchError> {
            let missing = |field: &str| FetchError::Incomplete {
                endpoint,
                reason: format!("main.{field} missing for dt {}", item.dt),
            };
            let temp_min = item.main.temp_min.ok_or_else(|| missing("temp_min"))?;
            let temp_max = item.main.temp_max.ok_or_else(|| missing("temp_max"))?;

            Ok(ForecastEntry {
                forecast_at: unix_to_utc(endpoint, item.dt)?,
                conditions: conditions(endpoint, &item.main, item.weather, item.wind)?,
                temp_min,
                temp_max,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ForecastBatch { coordinates: parsed.city.coord.into(), entries })
}

#[async_trait]
impl WeatherCollector for OpenWeatherCollector {
    async fn fetch_current(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Observation, FetchError> {
        let parsed: OwCurrentResponse = self.get(Endpoint::Current, latitude, longitude).await?;
        observation_from(parsed)
    }

    async fn fetch_forecast(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<ForecastBatch, FetchError> {
        let parsed: OwForecastResponse = self.get(Endpoint::Forecast, latitude, longitude).await?;
        batch_from(parsed)
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
