//! One import run: every configured location, strictly in order.
//!
//! Per location there are four steps (fetch current, upsert it, fetch
//! forecast, replace the forecast window). Each step fails on its own: the
//! failure is logged, recorded in the [`RunReport`] and the run moves on.
//! Only connecting and schema setup can abort a run.

use anyhow::Context;
use std::{fmt, time::Duration};

use crate::{
    clock::Clock,
    collector::{OpenWeatherCollector, WeatherCollector},
    config::Config,
    model::Location,
    store::{PgStore, StoreError, WeatherStore},
};

/// Reply of the trigger on a completed run, partial or not.
pub const SUCCESS_MESSAGE: &str = "Import completed successfully!";

#[derive(Debug, Clone)]
pub struct RunPlan {
    pub locations: Vec<Location>,
    pub pause: Duration,
}

impl RunPlan {
    pub fn new(locations: Vec<Location>) -> Self {
        Self { locations, pause: Duration::ZERO }
    }

    pub fn from_config(config: &Config) -> Self {
        Self { locations: config.locations.clone(), pause: config.run.pause() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Synced { rows: usize },
    FetchFailed(String),
    WriteFailed(String),
}

impl StepOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, StepOutcome::Synced { .. })
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Synced { rows } => write!(f, "ok ({rows} rows)"),
            StepOutcome::FetchFailed(cause) => write!(f, "fetch failed: {cause}"),
            StepOutcome::WriteFailed(cause) => write!(f, "write failed: {cause}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationReport {
    pub location: String,
    pub current: StepOutcome,
    pub forecast: StepOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub locations: Vec<LocationReport>,
}

impl RunReport {
    /// True when every step of every location succeeded.
    pub fn is_complete(&self) -> bool {
        self.locations.iter().all(|l| l.current.is_ok() && l.forecast.is_ok())
    }

    pub fn failed_steps(&self) -> usize {
        self.locations
            .iter()
            .map(|l| usize::from(!l.current.is_ok()) + usize::from(!l.forecast.is_ok()))
            .sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for l in &self.locations {
            writeln!(f, "{}: current {}, forecast {}", l.location, l.current, l.forecast)?;
        }
        match self.failed_steps() {
            0 => write!(f, "{} locations synced", self.locations.len()),
            n => write!(f, "{} locations processed, {n} steps failed", self.locations.len()),
        }
    }
}

/// Run the plan against `store`, closing it afterwards whatever happened.
pub async fn run<C, S>(
    plan: &RunPlan,
    collector: &C,
    store: &mut S,
) -> Result<RunReport, StoreError>
where
    C: WeatherCollector + ?Sized,
    S: WeatherStore + ?Sized,
{
    let result = run_connected(plan, collector, store).await;
    store.close().await;
    result
}

async fn run_connected<C, S>(
    plan: &RunPlan,
    collector: &C,
    store: &mut S,
) -> Result<RunReport, StoreError>
where
    C: WeatherCollector + ?Sized,
    S: WeatherStore + ?Sized,
{
    store.connect().await?;
    store.ensure_schema().await?;

    let mut report = RunReport::default();
    for (i, location) in plan.locations.iter().enumerate() {
        if i > 0 && !plan.pause.is_zero() {
            tokio::time::sleep(plan.pause).await;
        }
        report.locations.push(sync_location(location, collector, store).await);
    }

    tracing::info!(
        locations = report.locations.len(),
        failed_steps = report.failed_steps(),
        "import finished"
    );
    Ok(report)
}

async fn sync_location<C, S>(location: &Location, collector: &C, store: &mut S) -> LocationReport
where
    C: WeatherCollector + ?Sized,
    S: WeatherStore + ?Sized,
{
    let name = location.name.as_str();
    tracing::info!(location = name, "collecting weather data");

    let current = match collector.fetch_current(location.latitude, location.longitude).await {
        Ok(observation) => match store.upsert_current(name, &observation).await {
            Ok(()) => {
                tracing::info!(location = name, "current weather updated");
                StepOutcome::Synced { rows: 1 }
            }
            Err(err) => {
                tracing::warn!(location = name, error = %err, "current weather not stored");
                StepOutcome::WriteFailed(err.to_string())
            }
        },
        Err(err) => {
            tracing::warn!(
                location = name,
                endpoint = %err.endpoint(),
                error = %err,
                "current weather fetch failed"
            );
            StepOutcome::FetchFailed(err.to_string())
        }
    };

    let forecast = match collector.fetch_forecast(location.latitude, location.longitude).await {
        Ok(batch) => match store.replace_forecast_window(name, &batch).await {
            Ok(rows) => {
                tracing::info!(location = name, entries = rows, "forecast window replaced");
                StepOutcome::Synced { rows }
            }
            Err(err) => {
                tracing::warn!(location = name, error = %err, "forecast not stored");
                StepOutcome::WriteFailed(err.to_string())
            }
        },
        Err(err) => {
            tracing::warn!(
                location = name,
                endpoint = %err.endpoint(),
                error = %err,
                "forecast fetch failed"
            );
            StepOutcome::FetchFailed(err.to_string())
        }
    };

    LocationReport { location: location.name.clone(), current, forecast }
}

/// Validate `config` and run `plan` against OpenWeather and Postgres.
pub async fn import(config: &Config, plan: &RunPlan) -> anyhow::Result<RunReport> {
    config.validate()?;

    let collector = OpenWeatherCollector::new(config.api_key()?.to_string(), &config.provider)
        .context("Failed to build HTTP client")?;
    let mut store = PgStore::new(&config.database, Clock::System);

    let report = run(plan, &collector, &mut store).await.context("Import aborted")?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collector::{Endpoint, FetchError},
        model::{
            Conditions, Coordinates, CurrentRecord, ForecastBatch, ForecastEntry, ForecastRecord,
            Observation,
        },
        store::MemoryStore,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap()
    }

    fn verona() -> Location {
        Location::new("Verona", 45.4384, 10.9916)
    }

    fn padova() -> Location {
        Location::new("Padova", 45.4064, 11.8768)
    }

    fn vicenza() -> Location {
        Location::new("Vicenza", 45.5477, 11.5448)
    }

    fn conditions(temperature: f64) -> Conditions {
        Conditions {
            temperature,
            feels_like: temperature - 0.4,
            humidity: 80,
            pressure: 1012,
            wind_speed: 0.0,
            category: "Clouds".into(),
            description: "nubi sparse".into(),
        }
    }

    fn observation(loc: &Location, temperature: f64) -> Observation {
        Observation {
            coordinates: Coordinates { latitude: loc.latitude, longitude: loc.longitude },
            conditions: conditions(temperature),
            observed_at: now() - ChronoDuration::minutes(5),
        }
    }

    fn batch(loc: &Location, start: DateTime<Utc>, temps: &[f64]) -> ForecastBatch {
        ForecastBatch {
            coordinates: Coordinates { latitude: loc.latitude, longitude: loc.longitude },
            entries: temps
                .iter()
                .enumerate()
                .map(|(i, t)| ForecastEntry {
                    forecast_at: start + ChronoDuration::hours(3 * i as i64),
                    conditions: conditions(*t),
                    temp_min: t - 1.0,
                    temp_max: t + 1.0,
                })
                .collect(),
        }
    }

    fn key(lat: f64, lon: f64) -> String {
        format!("{lat},{lon}")
    }

    /// Serves canned payloads per coordinate and records every call.
    #[derive(Debug, Default)]
    struct StubCollector {
        current: HashMap<String, Observation>,
        forecast: HashMap<String, ForecastBatch>,
        calls: Mutex<Vec<(Endpoint, String)>>,
    }

    impl StubCollector {
        fn with_current(mut self, loc: &Location, obs: Observation) -> Self {
            self.current.insert(key(loc.latitude, loc.longitude), obs);
            self
        }

        fn with_forecast(mut self, loc: &Location, batch: ForecastBatch) -> Self {
            self.forecast.insert(key(loc.latitude, loc.longitude), batch);
            self
        }

        fn calls(&self) -> Vec<(Endpoint, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WeatherCollector for StubCollector {
        async fn fetch_current(&self, lat: f64, lon: f64) -> Result<Observation, FetchError> {
            let k = key(lat, lon);
            self.calls.lock().unwrap().push((Endpoint::Current, k.clone()));
            self.current.get(&k).cloned().ok_or_else(|| FetchError::Incomplete {
                endpoint: Endpoint::Current,
                reason: "503 from stub".into(),
            })
        }

        async fn fetch_forecast(&self, lat: f64, lon: f64) -> Result<ForecastBatch, FetchError> {
            let k = key(lat, lon);
            self.calls.lock().unwrap().push((Endpoint::Forecast, k.clone()));
            self.forecast.get(&k).cloned().ok_or_else(|| FetchError::Incomplete {
                endpoint: Endpoint::Forecast,
                reason: "503 from stub".into(),
            })
        }
    }

    /// MemoryStore with injectable failures.
    #[derive(Debug, Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_connect: bool,
        fail_schema: bool,
        fail_writes_for: HashSet<String>,
        closed: bool,
    }

    fn boom() -> sqlx::Error {
        sqlx::Error::Protocol("simulated failure".into())
    }

    #[async_trait]
    impl WeatherStore for FlakyStore {
        async fn connect(&mut self) -> Result<(), StoreError> {
            if self.fail_connect {
                return Err(StoreError::Connection(boom()));
            }
            self.inner.connect().await
        }

        async fn ensure_schema(&mut self) -> Result<(), StoreError> {
            if self.fail_schema {
                return Err(StoreError::Schema(boom()));
            }
            self.inner.ensure_schema().await
        }

        async fn upsert_current(
            &mut self,
            location: &str,
            observation: &Observation,
        ) -> Result<(), StoreError> {
            if self.fail_writes_for.contains(location) {
                return Err(StoreError::Write {
                    table: "current_weather",
                    location: location.into(),
                    source: boom(),
                });
            }
            self.inner.upsert_current(location, observation).await
        }

        async fn replace_forecast_window(
            &mut self,
            location: &str,
            batch: &ForecastBatch,
        ) -> Result<usize, StoreError> {
            if self.fail_writes_for.contains(location) {
                return Err(StoreError::Write {
                    table: "forecast",
                    location: location.into(),
                    source: boom(),
                });
            }
            self.inner.replace_forecast_window(location, batch).await
        }

        async fn current(&mut self, location: &str) -> Result<Option<CurrentRecord>, StoreError> {
            self.inner.current(location).await
        }

        async fn forecasts(&mut self, location: &str) -> Result<Vec<ForecastRecord>, StoreError> {
            self.inner.forecasts(location).await
        }

        async fn close(&mut self) {
            self.closed = true;
            self.inner.close().await;
        }
    }

    fn flaky() -> FlakyStore {
        FlakyStore { inner: MemoryStore::new(Clock::Fixed(now())), ..FlakyStore::default() }
    }

    async fn reopen(store: &mut MemoryStore) {
        store.connect().await.expect("connect");
    }

    #[tokio::test]
    async fn verona_without_wind_stores_zero_speed() {
        let loc = verona();
        let mut obs = observation(&loc, 14.2);
        obs.conditions.wind_speed = 0.0;
        let collector = StubCollector::default().with_current(&loc, obs);
        let mut store = MemoryStore::new(Clock::Fixed(now()));

        let report = run(&RunPlan::new(vec![loc]), &collector, &mut store).await.expect("run");
        assert_eq!(report.locations[0].current, StepOutcome::Synced { rows: 1 });

        reopen(&mut store).await;
        let row = store.current("Verona").await.unwrap().expect("row");
        assert_eq!(row.wind_speed, 0.0);
        assert_eq!(row.temperature, 14.2);
        assert_eq!(row.humidity, 80);
        assert_eq!(store.current_rows().count(), 1);
    }

    #[tokio::test]
    async fn stored_current_row_matches_payload() {
        let loc = verona();
        let obs = observation(&loc, 11.0);
        let collector = StubCollector::default().with_current(&loc, obs.clone());
        let mut store = MemoryStore::new(Clock::Fixed(now()));

        run(&RunPlan::new(vec![loc]), &collector, &mut store).await.expect("run");

        reopen(&mut store).await;
        let row = store.current("Verona").await.unwrap().expect("row");
        assert_eq!(row, CurrentRecord::from_observation("Verona", &obs, now()));
    }

    #[tokio::test]
    async fn repeated_upsert_differs_only_in_stored_at() {
        let loc = verona();
        let collector = StubCollector::default().with_current(&loc, observation(&loc, 14.2));
        let plan = RunPlan::new(vec![loc]);
        let mut store = MemoryStore::new(Clock::Fixed(now()));

        run(&plan, &collector, &mut store).await.expect("first run");
        reopen(&mut store).await;
        let first = store.current("Verona").await.unwrap().expect("row");

        let later = now() + ChronoDuration::hours(1);
        store.set_clock(Clock::Fixed(later));
        run(&plan, &collector, &mut store).await.expect("second run");
        reopen(&mut store).await;
        let second = store.current("Verona").await.unwrap().expect("row");

        assert_eq!(store.current_rows().count(), 1);
        assert_eq!(second.stored_at, later);
        assert_eq!(CurrentRecord { stored_at: first.stored_at, ..second }, first);
    }

    #[tokio::test]
    async fn forecast_replacement_keeps_history_and_drops_stale_future() {
        let loc = verona();
        let mut store = MemoryStore::new(Clock::Fixed(now()));

        // A run two days ago left rows that are now partly history.
        let two_days_ago = now() - ChronoDuration::days(2);
        store.set_clock(Clock::Fixed(two_days_ago));
        let temps: Vec<f64> = (1..=20).map(f64::from).collect();
        let old = StubCollector::default().with_forecast(&loc, batch(&loc, two_days_ago, &temps));
        run(&RunPlan::new(vec![loc.clone()]), &old, &mut store).await.expect("old run");

        let cutoff = Clock::Fixed(now()).start_of_today();
        let history: Vec<_> =
            store.forecast_rows().iter().filter(|r| r.forecast_at < cutoff).cloned().collect();
        assert!(!history.is_empty());

        store.set_clock(Clock::Fixed(now()));
        let fresh = batch(&loc, now(), &[21.0, 22.0, 23.0]);
        let collector = StubCollector::default().with_forecast(&loc, fresh.clone());
        let report =
            run(&RunPlan::new(vec![loc.clone()]), &collector, &mut store).await.expect("run");
        assert_eq!(report.locations[0].forecast, StepOutcome::Synced { rows: 3 });

        reopen(&mut store).await;
        let rows = store.forecasts("Verona").await.unwrap();
        let (past, future): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|r| r.forecast_at < cutoff);

        assert_eq!(past, history);
        assert_eq!(future, ForecastRecord::from_batch("Verona", &fresh, now()));
    }

    #[tokio::test]
    async fn empty_forecast_clears_future_rows() {
        let loc = verona();
        let mut store = MemoryStore::new(Clock::Fixed(now()));

        let first = StubCollector::default().with_forecast(&loc, batch(&loc, now(), &[10.0, 11.0]));
        run(&RunPlan::new(vec![loc.clone()]), &first, &mut store).await.expect("first");

        let empty = StubCollector::default().with_forecast(&loc, batch(&loc, now(), &[]));
        let report = run(&RunPlan::new(vec![loc]), &empty, &mut store).await.expect("second");

        assert_eq!(report.locations[0].forecast, StepOutcome::Synced { rows: 0 });
        reopen(&mut store).await;
        assert!(store.forecasts("Verona").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_skips_only_that_step_and_keeps_old_data() {
        let (ve, pd) = (verona(), padova());
        let mut store = MemoryStore::new(Clock::Fixed(now()));

        let seed = StubCollector::default()
            .with_current(&ve, observation(&ve, 9.0))
            .with_forecast(&ve, batch(&ve, now(), &[9.0]));
        run(&RunPlan::new(vec![ve.clone()]), &seed, &mut store).await.expect("seed");

        // Verona's provider calls now fail; Padova's succeed.
        let collector = StubCollector::default()
            .with_current(&pd, observation(&pd, 15.0))
            .with_forecast(&pd, batch(&pd, now(), &[15.0, 16.0]));
        let report = run(&RunPlan::new(vec![ve.clone(), pd.clone()]), &collector, &mut store)
            .await
            .expect("run still succeeds");

        assert!(matches!(report.locations[0].current, StepOutcome::FetchFailed(_)));
        assert!(matches!(report.locations[0].forecast, StepOutcome::FetchFailed(_)));
        assert_eq!(report.locations[1].current, StepOutcome::Synced { rows: 1 });
        assert_eq!(report.locations[1].forecast, StepOutcome::Synced { rows: 2 });
        assert!(!report.is_complete());
        assert_eq!(report.failed_steps(), 2);

        reopen(&mut store).await;
        assert_eq!(store.current("Verona").await.unwrap().expect("kept").temperature, 9.0);
        assert_eq!(store.forecasts("Verona").await.unwrap().len(), 1);
        assert_eq!(store.forecasts("Padova").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn write_failure_is_isolated_to_its_location() {
        let (ve, pd) = (verona(), padova());
        let collector = StubCollector::default()
            .with_current(&ve, observation(&ve, 14.2))
            .with_forecast(&ve, batch(&ve, now(), &[14.0]))
            .with_current(&pd, observation(&pd, 15.0))
            .with_forecast(&pd, batch(&pd, now(), &[15.0]));
        let mut store = flaky();
        store.fail_writes_for.insert("Verona".into());

        let report =
            run(&RunPlan::new(vec![ve, pd]), &collector, &mut store).await.expect("run");

        assert!(matches!(report.locations[0].current, StepOutcome::WriteFailed(_)));
        assert!(matches!(report.locations[0].forecast, StepOutcome::WriteFailed(_)));
        assert!(report.locations[1].current.is_ok());
        assert!(report.locations[1].forecast.is_ok());
        assert!(store.closed);
        assert_eq!(store.inner.current_rows().count(), 1);
    }

    #[tokio::test]
    async fn schema_failure_aborts_before_any_fetch_and_still_closes() {
        let collector = StubCollector::default();
        let mut store = flaky();
        store.fail_schema = true;

        let err = run(&RunPlan::new(vec![verona()]), &collector, &mut store).await.unwrap_err();

        assert!(matches!(err, StoreError::Schema(_)));
        assert!(collector.calls().is_empty());
        assert!(store.closed);
    }

    #[tokio::test]
    async fn connection_failure_aborts_and_close_is_safe() {
        let collector = StubCollector::default();
        let mut store = flaky();
        store.fail_connect = true;

        let err = run(&RunPlan::new(vec![verona()]), &collector, &mut store).await.unwrap_err();

        assert!(matches!(err, StoreError::Connection(_)));
        assert!(collector.calls().is_empty());
        assert!(store.closed);
        assert!(!store.inner.is_connected());
    }

    #[tokio::test]
    async fn locations_are_processed_in_order_current_before_forecast() {
        let locs = vec![vicenza(), verona(), padova()];
        let collector = StubCollector::default();
        let mut store = MemoryStore::new(Clock::Fixed(now()));

        let report = run(&RunPlan::new(locs.clone()), &collector, &mut store).await.expect("run");

        let expected: Vec<_> = locs
            .iter()
            .flat_map(|l| {
                let k = key(l.latitude, l.longitude);
                [(Endpoint::Current, k.clone()), (Endpoint::Forecast, k)]
            })
            .collect();
        assert_eq!(collector.calls(), expected);
        let names: Vec<_> = report.locations.iter().map(|l| l.location.as_str()).collect();
        assert_eq!(names, vec!["Vicenza", "Verona", "Padova"]);
        assert!(!store.is_connected());
        assert!(store.schema_ready());
    }

    #[test]
    fn report_display_summarises_partial_runs() {
        let report = RunReport {
            locations: vec![
                LocationReport {
                    location: "Verona".into(),
                    current: StepOutcome::Synced { rows: 1 },
                    forecast: StepOutcome::Synced { rows: 40 },
                },
                LocationReport {
                    location: "Rovigo".into(),
                    current: StepOutcome::FetchFailed("timeout".into()),
                    forecast: StepOutcome::Synced { rows: 40 },
                },
            ],
        };

        let text = report.to_string();
        assert!(text.contains("Verona: current ok (1 rows), forecast ok (40 rows)"));
        assert!(text.contains("Rovigo: current fetch failed: timeout"));
        assert!(text.ends_with("2 locations processed, 1 steps failed"));

        assert!(RunReport::default().is_complete());
        assert_eq!(RunReport::default().to_string(), "0 locations synced");
    }

    #[test]
    fn plan_from_config_uses_configured_pause() {
        let mut cfg = Config::default();
        cfg.run.pause_ms = 500;
        let plan = RunPlan::from_config(&cfg);
        assert_eq!(plan.pause, Duration::from_millis(500));
        assert_eq!(plan.locations.len(), 7);
    }

    #[tokio::test]
    async fn import_rejects_invalid_config_before_connecting() {
        let cfg = Config::default();
        let err = import(&cfg, &RunPlan::from_config(&cfg)).await.unwrap_err();
        assert!(err.to_string().contains("No provider API key configured"));
    }
}
