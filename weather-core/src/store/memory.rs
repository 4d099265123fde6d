use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::{
    clock::Clock,
    model::{CurrentRecord, ForecastBatch, ForecastRecord, Observation},
};

use super::{StoreError, WeatherStore};

/// In-process store with the same write semantics as [`super::PgStore`].
/// Backs `--dry-run` and the orchestration tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    clock: Clock,
    connected: bool,
    schema_ready: bool,
    current: BTreeMap<String, CurrentRecord>,
    forecasts: Vec<ForecastRecord>,
}

impl MemoryStore {
    pub fn new(clock: Clock) -> Self {
        Self { clock, ..Self::default() }
    }

    #[cfg(test)]
    pub(crate) fn set_clock(&mut self, clock: Clock) {
        self.clock = clock;
    }

    /// Seed forecast rows directly, e.g. history from earlier days.
    #[cfg(test)]
    pub(crate) fn insert_forecast_rows(&mut self, rows: impl IntoIterator<Item = ForecastRecord>) {
        self.forecasts.extend(rows);
    }

    pub fn current_rows(&self) -> impl Iterator<Item = &CurrentRecord> {
        self.current.values()
    }

    pub fn forecast_rows(&self) -> &[ForecastRecord] {
        &self.forecasts
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn schema_ready(&self) -> bool {
        self.schema_ready
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.connected { Ok(()) } else { Err(StoreError::NotConnected) }
    }
}

#[async_trait]
impl WeatherStore for MemoryStore {
    async fn connect(&mut self) -> Result<(), StoreError> {
        self.connected = true;
        Ok(())
    }

    async fn ensure_schema(&mut self) -> Result<(), StoreError> {
        self.ensure_connected()?;
        self.schema_ready = true;
        Ok(())
    }

    async fn upsert_current(
        &mut self,
        location: &str,
        observation: &Observation,
    ) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let record = CurrentRecord::from_observation(location, observation, self.clock.now());
        self.current.insert(location.to_string(), record);
        Ok(())
    }

    async fn replace_forecast_window(
        &mut self,
        location: &str,
        batch: &ForecastBatch,
    ) -> Result<usize, StoreError> {
        self.ensure_connected()?;
        let cutoff = self.clock.start_of_today();
        let fresh = ForecastRecord::from_batch(location, batch, self.clock.now());
        let inserted = fresh.len();

        // New contents are built aside and swapped in whole.
        let mut next: Vec<ForecastRecord> = self
            .forecasts
            .iter()
            .filter(|r| r.location_name != location || r.forecast_at < cutoff)
            .cloned()
            .collect();
        next.extend(fresh);
        self.forecasts = next;

        Ok(inserted)
    }

    async fn current(&mut self, location: &str) -> Result<Option<CurrentRecord>, StoreError> {
        self.ensure_connected()?;
        Ok(self.current.get(location).cloned())
    }

    async fn forecasts(&mut self, location: &str) -> Result<Vec<ForecastRecord>, StoreError> {
        self.ensure_connected()?;
        let mut rows: Vec<_> =
            self.forecasts.iter().filter(|r| r.location_name == location).cloned().collect();
        rows.sort_by_key(|r| r.forecast_at);
        Ok(rows)
    }

    async fn close(&mut self) {
        self.connected = false;
    }
}
