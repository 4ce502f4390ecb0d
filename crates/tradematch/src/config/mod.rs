use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::workflows::dispatch::{
    AreaTable, AreaTableError, EngineConfig, DEFAULT_PENDING_REQUEST_CAP,
};

/// Sweep cadence used when `DISPATCH_SWEEP_INTERVAL_SECS` is unset.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 900;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the dispatch service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub dispatch: DispatchConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            dispatch: DispatchConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Deployment-time engine knobs. Runtime policy lives in the settings document instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub pending_request_cap: usize,
    /// Seconds between scheduled sweeps; 0 turns the scheduler off.
    pub sweep_interval_secs: u64,
    pub area_table: AreaTable,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pending_request_cap: DEFAULT_PENDING_REQUEST_CAP,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            area_table: AreaTable::default(),
        }
    }
}

impl DispatchConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = env::var("DISPATCH_PENDING_REQUEST_CAP") {
            config.pending_request_cap = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|cap| *cap > 0)
                .ok_or(ConfigError::InvalidRequestCap)?;
        }

        if let Ok(raw) = env::var("DISPATCH_SWEEP_INTERVAL_SECS") {
            config.sweep_interval_secs = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidSweepInterval)?;
        }

        if let Ok(raw) = env::var("DISPATCH_AREA_TABLE") {
            if !raw.trim().is_empty() {
                config.area_table = AreaTable::parse(&raw)
                    .map_err(|source| ConfigError::InvalidAreaTable { source })?;
            }
        }

        Ok(config)
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            pending_request_cap: self.pending_request_cap,
            area_table: self.area_table.clone(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidRequestCap,
    InvalidSweepInterval,
    InvalidAreaTable { source: AreaTableError },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidRequestCap => {
                write!(f, "DISPATCH_PENDING_REQUEST_CAP must be a positive integer")
            }
            ConfigError::InvalidSweepInterval => {
                write!(f, "DISPATCH_SWEEP_INTERVAL_SECS must be a whole number of seconds")
            }
            ConfigError::InvalidAreaTable { source } => {
                write!(f, "DISPATCH_AREA_TABLE is invalid: {source}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidAreaTable { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidRequestCap
            | ConfigError::InvalidSweepInterval => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::env_lock;
    use std::env;

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "DISPATCH_PENDING_REQUEST_CAP",
            "DISPATCH_SWEEP_INTERVAL_SECS",
            "DISPATCH_AREA_TABLE",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_lock();
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.dispatch, DispatchConfig::default());
        assert_eq!(config.dispatch.sweep_interval_secs, 900);
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_lock();
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn dispatch_overrides_are_read_from_env() {
        let _lock = env_lock();
        reset_env();
        env::set_var("DISPATCH_PENDING_REQUEST_CAP", "8");
        env::set_var("DISPATCH_SWEEP_INTERVAL_SECS", "0");
        env::set_var("DISPATCH_AREA_TABLE", "LN=Lincoln|Sleaford");

        let config = AppConfig::load().expect("config loads");
        let engine = config.dispatch.engine();
        assert_eq!(engine.pending_request_cap, 8);
        assert_eq!(config.dispatch.sweep_interval_secs, 0);
        assert_eq!(
            engine.area_table.areas_for("ln"),
            Some(&["Lincoln".to_string(), "Sleaford".to_string()][..])
        );
        assert!(engine.area_table.areas_for("DN").is_none());
        reset_env();
    }

    #[test]
    fn rejects_zero_request_cap() {
        let _lock = env_lock();
        reset_env();
        env::set_var("DISPATCH_PENDING_REQUEST_CAP", "0");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidRequestCap)
        ));
        reset_env();
    }

    #[test]
    fn rejects_malformed_area_table() {
        let _lock = env_lock();
        reset_env();
        env::set_var("DISPATCH_AREA_TABLE", "LINCS=Lincoln");
        let err = AppConfig::load().expect_err("prefix too long");
        assert!(matches!(err, ConfigError::InvalidAreaTable { .. }));
        assert!(err.to_string().contains("DISPATCH_AREA_TABLE"));
        reset_env();
    }
}
