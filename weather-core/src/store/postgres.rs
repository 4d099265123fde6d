use async_trait::async_trait;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder, postgres::PgConnectOptions};
use std::fmt;

use crate::{
    clock::Clock,
    config::{DatabaseConfig, MAX_LOCATION_NAME_CHARS},
    model::{CurrentRecord, ForecastBatch, ForecastRecord, Observation},
};

use super::{CURRENT_TABLE, FORECAST_TABLE, StoreError, WeatherStore};

/// Rows per INSERT statement. Keeps bind parameters well under the
/// Postgres limit of 65535.
const INSERT_CHUNK: usize = 1000;

const FORECAST_COLUMNS: &str = "location_name, latitude, longitude, forecast_at, temperature, \
     feels_like, temp_min, temp_max, humidity, pressure, wind_speed, weather_main, \
     weather_description, stored_at";

/// Postgres-backed store over a single connection held for one run.
pub struct PgStore {
    options: PgConnectOptions,
    schema: String,
    clock: Clock,
    conn: Option<PgConnection>,
}

impl fmt::Debug for PgStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgStore")
            .field("schema", &self.schema)
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

impl PgStore {
    /// `config.schema` must already be validated as a plain identifier; it is
    /// interpolated into SQL.
    pub fn new(config: &DatabaseConfig, clock: Clock) -> Self {
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .database(&config.name);
        if let Some(password) = &config.password {
            options = options.password(password);
        }

        Self { options, schema: config.schema.clone(), clock, conn: None }
    }
}

fn schema_statements(schema: &str) -> Vec<String> {
    vec![
        format!("CREATE SCHEMA IF NOT EXISTS {schema}"),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {schema}.{CURRENT_TABLE} (
                id                  BIGSERIAL PRIMARY KEY,
                location_name       VARCHAR({MAX_LOCATION_NAME_CHARS}) NOT NULL,
                latitude            DOUBLE PRECISION NOT NULL,
                longitude           DOUBLE PRECISION NOT NULL,
                temperature         DOUBLE PRECISION NOT NULL,
                feels_like          DOUBLE PRECISION NOT NULL,
                humidity            INTEGER          NOT NULL,
                pressure            INTEGER          NOT NULL,
                wind_speed          DOUBLE PRECISION NOT NULL DEFAULT 0,
                weather_main        VARCHAR(50)      NOT NULL,
                weather_description VARCHAR(200)     NOT NULL,
                observed_at         TIMESTAMPTZ      NOT NULL,
                stored_at           TIMESTAMPTZ      NOT NULL DEFAULT now()
            )
            "#
        ),
        // Separate from CREATE TABLE so it is asserted on pre-existing tables too.
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {CURRENT_TABLE}_location_name_key \
             ON {schema}.{CURRENT_TABLE} (location_name)"
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {schema}.{FORECAST_TABLE} (
                id                  BIGSERIAL PRIMARY KEY,
                location_name       VARCHAR({MAX_LOCATION_NAME_CHARS}) NOT NULL,
                latitude            DOUBLE PRECISION NOT NULL,
                longitude           DOUBLE PRECISION NOT NULL,
                forecast_at         TIMESTAMPTZ      NOT NULL,
                temperature         DOUBLE PRECISION NOT NULL,
                feels_like          DOUBLE PRECISION NOT NULL,
                temp_min            DOUBLE PRECISION NOT NULL,
                temp_max            DOUBLE PRECISION NOT NULL,
                humidity            INTEGER          NOT NULL,
                pressure            INTEGER          NOT NULL,
                wind_speed          DOUBLE PRECISION NOT NULL DEFAULT 0,
                weather_main        VARCHAR(50)      NOT NULL,
                weather_description VARCHAR(200)     NOT NULL,
                stored_at           TIMESTAMPTZ      NOT NULL DEFAULT now()
            )
            "#
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {FORECAST_TABLE}_location_forecast_at_idx \
             ON {schema}.{FORECAST_TABLE} (location_name, forecast_at)"
        ),
    ]
}

fn upsert_current_sql(schema: &str) -> String {
    format!(
        r#"
        INSERT INTO {schema}.{CURRENT_TABLE} (
            location_name, latitude, longitude, temperature, feels_like,
            humidity, pressure, wind_speed, weather_main, weather_description,
            observed_at, stored_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (location_name)
        DO UPDATE SET
            latitude = EXCLUDED.latitude,
            longitude = EXCLUDED.longitude,
            temperature = EXCLUDED.temperature,
            feels_like = EXCLUDED.feels_like,
            humidity = EXCLUDED.humidity,
            pressure = EXCLUDED.pressure,
            wind_speed = EXCLUDED.wind_speed,
            weather_main = EXCLUDED.weather_main,
            weather_description = EXCLUDED.weather_description,
            observed_at = EXCLUDED.observed_at,
            stored_at = EXCLUDED.stored_at
        "#
    )
}

fn delete_window_sql(schema: &str) -> String {
    format!(
        "DELETE FROM {schema}.{FORECAST_TABLE} WHERE location_name = $1 AND forecast_at >= $2"
    )
}

fn insert_forecast_prefix(schema: &str) -> String {
    format!("INSERT INTO {schema}.{FORECAST_TABLE} ({FORECAST_COLUMNS}) ")
}

fn select_current_sql(schema: &str) -> String {
    format!(
        "SELECT location_name, latitude, longitude, temperature, feels_like, humidity, \
         pressure, wind_speed, weather_main, weather_description, observed_at, stored_at \
         FROM {schema}.{CURRENT_TABLE} WHERE location_name = $1"
    )
}

fn select_forecasts_sql(schema: &str) -> String {
    format!(
        "SELECT {FORECAST_COLUMNS} FROM {schema}.{FORECAST_TABLE} \
         WHERE location_name = $1 ORDER BY forecast_at, id"
    )
}

#[async_trait]
impl WeatherStore for PgStore {
    async fn connect(&mut self) -> Result<(), StoreError> {
        let conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(StoreError::Connection)?;
        self.conn = Some(conn);
        tracing::info!(schema = %self.schema, "connected to database");
        Ok(())
    }

    async fn ensure_schema(&mut self) -> Result<(), StoreError> {
        let statements = schema_statements(&self.schema);
        let conn = self.conn.as_mut().ok_or(StoreError::NotConnected)?;

        let mut tx = conn.begin().await.map_err(StoreError::Schema)?;
        for statement in &statements {
            sqlx::query(statement).execute(&mut *tx).await.map_err(StoreError::Schema)?;
        }
        tx.commit().await.map_err(StoreError::Schema)?;

        tracing::info!(schema = %self.schema, "tables created or verified");
        Ok(())
    }

    async fn upsert_current(
        &mut self,
        location: &str,
        observation: &Observation,
    ) -> Result<(), StoreError> {
        let sql = upsert_current_sql(&self.schema);
        let row = CurrentRecord::from_observation(location, observation, self.clock.now());
        let conn = self.conn.as_mut().ok_or(StoreError::NotConnected)?;

        sqlx::query(&sql)
            .bind(&row.location_name)
            .bind(row.latitude)
            .bind(row.longitude)
            .bind(row.temperature)
            .bind(row.feels_like)
            .bind(row.humidity)
            .bind(row.pressure)
            .bind(row.wind_speed)
            .bind(&row.weather_main)
            .bind(&row.weather_description)
            .bind(row.observed_at)
            .bind(row.stored_at)
            .execute(&mut *conn)
            .await
            .map_err(|source| StoreError::Write {
                table: CURRENT_TABLE,
                location: location.to_string(),
                source,
            })?;

        Ok(())
    }

    async fn replace_forecast_window(
        &mut self,
        location: &str,
        batch: &ForecastBatch,
    ) -> Result<usize, StoreError> {
        let delete_sql = delete_window_sql(&self.schema);
        let insert_prefix = insert_forecast_prefix(&self.schema);
        let cutoff = self.clock.start_of_today();
        let rows = ForecastRecord::from_batch(location, batch, self.clock.now());
        let conn = self.conn.as_mut().ok_or(StoreError::NotConnected)?;

        let write_err = |source: sqlx::Error| StoreError::Write {
            table: FORECAST_TABLE,
            location: location.to_string(),
            source,
        };

        // Dropping `tx` on any early return rolls the whole window back.
        let mut tx = conn.begin().await.map_err(write_err)?;

        let deleted = sqlx::query(&delete_sql)
            .bind(location)
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(write_err)?
            .rows_affected();

        for chunk in rows.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(insert_prefix.as_str());
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(r.location_name.as_str())
                    .push_bind(r.latitude)
                    .push_bind(r.longitude)
                    .push_bind(r.forecast_at)
                    .push_bind(r.temperature)
                    .push_bind(r.feels_like)
                    .push_bind(r.temp_min)
                    .push_bind(r.temp_max)
                    .push_bind(r.humidity)
                    .push_bind(r.pressure)
                    .push_bind(r.wind_speed)
                    .push_bind(r.weather_main.as_str())
                    .push_bind(r.weather_description.as_str())
                    .push_bind(r.stored_at);
            });
            qb.build().execute(&mut *tx).await.map_err(write_err)?;
        }

        tx.commit().await.map_err(write_err)?;

        tracing::debug!(location, deleted, inserted = rows.len(), "forecast window replaced");
        Ok(rows.len())
    }

    async fn current(&mut self, location: &str) -> Result<Option<CurrentRecord>, StoreError> {
        let sql = select_current_sql(&self.schema);
        let conn = self.conn.as_mut().ok_or(StoreError::NotConnected)?;

        sqlx::query_as::<_, CurrentRecord>(&sql)
            .bind(location)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|source| StoreError::Read {
                table: CURRENT_TABLE,
                location: location.to_string(),
                source,
            })
    }

    async fn forecasts(&mut self, location: &str) -> Result<Vec<ForecastRecord>, StoreError> {
        let sql = select_forecasts_sql(&self.schema);
        let conn = self.conn.as_mut().ok_or(StoreError::NotConnected)?;

        sqlx::query_as::<_, ForecastRecord>(&sql)
            .bind(location)
            .fetch_all(&mut *conn)
            .await
            .map_err(|source| StoreError::Read {
                table: FORECAST_TABLE,
                location: location.to_string(),
                source,
            })
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            match conn.close().await {
                Ok(()) => tracing::info!("database connection closed"),
                Err(err) => tracing::warn!(error = %err, "error while closing database connection"),
            }
        }
    }
}
