use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub dispatch: DispatchRules,
}

/// Tunables of the matching engine.
#[derive(Debug, Deserialize, Clone)]
pub struct DispatchRules {
    /// How long a reserved vehicle has to answer before re-dispatch.
    #[serde(default = "default_reservation_window")]
    pub reservation_window_secs: u64,
    /// Cadence of the background expiry sweeper.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Upper bound on seats per vehicle and per request.
    #[serde(default = "default_max_seats")]
    pub max_seats: u32,
}

fn default_reservation_window() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_max_seats() -> u32 {
    5
}

impl Default for DispatchRules {
    fn default() -> Self {
        Self {
            reservation_window_secs: default_reservation_window(),
            sweep_interval_secs: default_sweep_interval(),
            max_seats: default_max_seats(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `ECOCAB__SERVER__PORT=9000` overrides the file value
            .add_source(config::Environment::with_prefix("ECOCAB").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
