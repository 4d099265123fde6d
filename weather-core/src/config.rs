use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fs, path::Path, path::PathBuf, time::Duration};

use crate::model::Location;

/// Weather provider access settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    /// Base URL; the `/weather` and `/forecast` endpoints hang off it.
    pub base_url: String,
    pub units: String,
    pub lang: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openweathermap.org/data/2.5".to_string(),
            units: "metric".to_string(),
            lang: "it".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Postgres connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: Option<String>,
    /// Postgres schema holding both tables.
    pub schema: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            name: "postgres".to_string(),
            user: "postgres".to_string(),
            password: None,
            schema: "analytics".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Pause between two locations, in milliseconds.
    pub pause_ms: u64,
}

impl RunConfig {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// [provider]
/// api_key = "..."
///
/// [database]
/// host = "db.internal"
/// name = "weather"
///
/// [[locations]]
/// name = "Verona"
/// latitude = 45.4384
/// longitude = 10.9916
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub database: DatabaseConfig,
    pub run: RunConfig,
    pub locations: Vec<Location>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            database: DatabaseConfig::default(),
            run: RunConfig::default(),
            locations: default_locations(),
        }
    }
}

/// The seven Veneto provincial capitals.
pub fn default_locations() -> Vec<Location> {
    vec![
        Location::new("Venezia", 45.4408, 12.3155),
        Location::new("Verona", 45.4384, 10.9916),
        Location::new("Padova", 45.4064, 11.8768),
        Location::new("Vicenza", 45.5477, 11.5448),
        Location::new("Treviso", 45.6669, 12.2433),
        Location::new("Rovigo", 45.0712, 11.7904),
        Location::new("Belluno", 46.1432, 12.2136),
    ]
}

/// Longest location name the tables accept, in characters.
pub const MAX_LOCATION_NAME_CHARS: usize = 100;

/// Problems that make a config unusable for a run.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "No provider API key configured.\n\
         Hint: run `meteo-sync configure` or set METEO_API_KEY."
    )]
    MissingApiKey,

    #[error("Invalid database schema name '{0}': expected a plain SQL identifier")]
    InvalidSchema(String),

    #[error("No locations configured")]
    NoLocations,

    #[error("Location '{0}' is configured more than once")]
    DuplicateLocation(String),

    #[error("Location name '{0}' is longer than {MAX_LOCATION_NAME_CHARS} characters")]
    LocationNameTooLong(String),

    #[error("Invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

impl Config {
    /// Read the config file as written, or defaults if it does not exist yet.
    /// No environment overrides are applied, so the result is safe to save back.
    pub fn read_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Read the config file, then apply environment overrides looked up
    /// through `var`.
    pub fn load_from<F>(path: &Path, var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::read_from(path)?;
        cfg.apply_env(var)?;
        Ok(cfg)
    }

    /// Save config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "meteo-sync", "meteo-sync")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Override settings from environment variables, looked up through `var`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = var("METEO_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(host) = var("METEO_DB_HOST") {
            self.database.host = host;
        }
        if let Some(port) = var("METEO_DB_PORT") {
            self.database.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { var: "METEO_DB_PORT", value: port })?;
        }
        if let Some(name) = var("METEO_DB_NAME") {
            self.database.name = name;
        }
        if let Some(user) = var("METEO_DB_USER") {
            self.database.user = user;
        }
        if let Some(password) = var("METEO_DB_PASSWORD") {
            self.database.password = Some(password);
        }
        if let Some(schema) = var("METEO_DB_SCHEMA") {
            self.database.schema = schema;
        }
        Ok(())
    }

    /// Check everything a run depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_key()?;
        self.validate_database()?;

        if self.locations.is_empty() {
            return Err(ConfigError::NoLocations);
        }

        // Names are matched case-insensitively everywhere else.
        let mut seen = HashSet::new();
        for location in &self.locations {
            if location.name.chars().count() > MAX_LOCATION_NAME_CHARS {
                return Err(ConfigError::LocationNameTooLong(location.name.clone()));
            }
            if !seen.insert(location.name.to_lowercase()) {
                return Err(ConfigError::DuplicateLocation(location.name.clone()));
            }
        }

        Ok(())
    }

    /// The schema name is interpolated into SQL, so it must be a plain identifier.
    pub fn validate_database(&self) -> Result<(), ConfigError> {
        if is_identifier(&self.database.schema) {
            Ok(())
        } else {
            Err(ConfigError::InvalidSchema(self.database.schema.clone()))
        }
    }

    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.provider
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    /// Case-insensitive lookup of a configured location.
    pub fn find_location(&self, name: &str) -> Option<&Location> {
        self.locations.iter().find(|l| l.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Resolve a list of names to configured locations, keeping config order.
    /// An empty list selects every location.
    pub fn select_locations(&self, names: &[String]) -> Result<Vec<Location>> {
        if names.is_empty() {
            return Ok(self.locations.clone());
        }

        for name in names {
            if self.find_location(name).is_none() {
                return Err(anyhow!(
                    "Location '{name}' not found. Available locations: {}",
                    self.location_names().join(", ")
                ));
            }
        }

        Ok(self
            .locations
            .iter()
            .filter(|l| names.iter().any(|n| l.name.eq_ignore_ascii_case(n.trim())))
            .cloned()
            .collect())
    }

    pub fn location_names(&self) -> Vec<&str> {
        self.locations.iter().map(|l| l.name.as_str()).collect()
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
