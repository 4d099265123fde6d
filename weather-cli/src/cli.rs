use anyhow::Context;
use clap::{Parser, Subcommand};
use inquire::{CustomType, Password, PasswordDisplayMode, Text};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use meteo_sync_core::{
    Clock, Config, CurrentRecord, ForecastRecord, MemoryStore, OpenWeatherCollector, PgStore,
    RunPlan, RunReport, SUCCESS_MESSAGE, WeatherStore, daily_summaries, sync,
};

use crate::server;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "meteo-sync",
    version,
    about = "Sync current weather and forecasts into Postgres"
)]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Prompt for the API key and database settings and save them.
    Configure,

    /// Run one import.
    Sync {
        /// Restrict the run to these locations (repeatable).
        #[arg(long = "city")]
        cities: Vec<String>,

        /// Fetch for real but keep results in memory instead of Postgres.
        #[arg(long)]
        dry_run: bool,
    },

    /// Listen for HTTP requests that trigger an import.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: SocketAddr,
    },

    /// List configured locations.
    Cities,

    /// Show stored weather for a location.
    Show {
        /// Location name.
        city: String,

        /// Number of forecast days to summarise.
        #[arg(long, default_value_t = 5)]
        days: usize,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let path = match self.config {
            Some(path) => path,
            None => Config::config_file_path()?,
        };
        let mut config = load_config(&self.command, &path, |key| std::env::var(key).ok())?;

        match self.command {
            Command::Configure => {
                configure(&mut config)?;
                config.save_to(&path)?;
                println!("Configuration saved to {}", path.display());
            }
            Command::Sync { cities, dry_run } => {
                let plan = RunPlan {
                    locations: config.select_locations(&cities)?,
                    pause: config.run.pause(),
                };
                let report = if dry_run {
                    dry_run_import(&config, &plan).await?
                } else {
                    sync::import(&config, &plan).await?
                };
                println!("{report}");
                println!("{SUCCESS_MESSAGE}");
            }
            Command::Serve { bind } => {
                config.validate()?;
                server::serve(config, bind).await?;
            }
            Command::Cities => {
                for l in &config.locations {
                    println!("{:<12} {:>9.4} {:>9.4}", l.name, l.latitude, l.longitude);
                }
            }
            Command::Show { city, days } => {
                show(&config, &city, days).await?;
            }
        }

        Ok(())
    }
}

/// `configure` edits the file as written; environment overrides only apply
/// to commands that run against the settings.
fn load_config<F>(command: &Command, path: &Path, var: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    match command {
        Command::Configure => Config::read_from(path),
        _ => Config::load_from(path, var),
    }
}

fn configure(config: &mut Config) -> anyhow::Result<()> {
    let api_key = Password::new("OpenWeather API key (leave empty to keep current):")
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .prompt()?;
    if !api_key.trim().is_empty() {
        config.provider.api_key = Some(api_key.trim().to_string());
    }

    let db = &mut config.database;
    db.host = Text::new("Database host:").with_default(&db.host).prompt()?;
    db.port = CustomType::<u16>::new("Database port:").with_default(db.port).prompt()?;
    db.name = Text::new("Database name:").with_default(&db.name).prompt()?;
    db.user = Text::new("Database user:").with_default(&db.user).prompt()?;

    let password = Password::new("Database password (leave empty to keep current):")
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .prompt()?;
    if !password.is_empty() {
        db.password = Some(password);
    }

    db.schema = Text::new("Database schema:").with_default(&db.schema).prompt()?;

    config.validate_database()?;
    Ok(())
}

async fn dry_run_import(config: &Config, plan: &RunPlan) -> anyhow::Result<RunReport> {
    let collector = OpenWeatherCollector::new(config.api_key()?.to_string(), &config.provider)
        .context("Failed to build HTTP client")?;
    let mut store = MemoryStore::new(Clock::System);

    let report = sync::run(plan, &collector, &mut store).await?;
    tracing::info!(
        current_rows = store.current_rows().count(),
        forecast_rows = store.forecast_rows().len(),
        "dry run: nothing written to the database"
    );
    Ok(report)
}

async fn show(config: &Config, city: &str, days: usize) -> anyhow::Result<()> {
    config.validate_database()?;
    let location = config.find_location(city).with_context(|| {
        format!(
            "Location '{city}' not found. Available locations: {}",
            config.location_names().join(", ")
        )
    })?;

    let mut store = PgStore::new(&config.database, Clock::System);
    let stored = read_stored(&mut store, &location.name).await;
    store.close().await;
    let (current, forecasts) = stored?;

    println!("=== {} ===", location.name.to_uppercase());
    match current {
        Some(c) => print_current(&c),
        None => println!("No current weather stored yet."),
    }

    let cutoff = Clock::System.start_of_today();
    let upcoming = forecasts
        .iter()
        .filter(|f| f.forecast_at >= cutoff)
        .map(|f| (f.forecast_at, f.temperature, f.weather_description.as_str()));

    println!();
    println!("Next days:");
    for day in daily_summaries(upcoming, days) {
        println!(
            "{}: {:.1}°C - {:.1}°C, {}",
            day.date, day.min_temp, day.max_temp, day.description
        );
    }

    Ok(())
}

async fn read_stored(
    store: &mut PgStore,
    location: &str,
) -> anyhow::Result<(Option<CurrentRecord>, Vec<ForecastRecord>)> {
    store.connect().await?;
    let current = store.current(location).await?;
    let forecasts = store.forecasts(location).await?;
    Ok((current, forecasts))
}

fn print_current(c: &CurrentRecord) {
    println!("Temperature: {}°C (feels like {}°C)", c.temperature, c.feels_like);
    println!("Conditions: {}", c.weather_description);
    println!("Humidity: {}%", c.humidity);
    println!("Wind speed: {} m/s", c.wind_speed);
    println!("Pressure: {} hPa", c.pressure);
    println!("Observed at: {} (stored {})", c.observed_at, c.stored_at);
}
