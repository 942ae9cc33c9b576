//! Configuration management for tunmitm.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::forward::DialerConfig;
use crate::intercept::{ForwarderConfig, TuningConfig};
use crate::link::{EndpointOptions, DEFAULT_BUFFER_SIZES, DEFAULT_MTU};

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Packet dispatcher configuration.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Socket tuning applied to intercepted endpoints.
    #[serde(default)]
    pub tuning: TuningConfig,

    /// Forwarder configuration.
    #[serde(default)]
    pub forwarder: ForwarderConfig,

    /// Outbound dial configuration.
    #[serde(default)]
    pub dialer: DialerConfig,

    /// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. `info` or
    /// `tunmitm::forward=debug`).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,

    /// Enable colored output (text format only).
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            color: default_color(),
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides `config.level`. Dispatcher threads are named, so
/// thread names are included in every line. Fails if the level directive
/// does not parse or a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            Error::InvalidConfig(format!("Invalid log level {:?}: {e}", config.level))
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_thread_names(true))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_ansi(config.color).with_thread_names(true))
            .try_init(),
    };

    installed.map_err(|e| Error::Config(format!("Failed to init logging: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.dispatcher.buffer_sizes, DEFAULT_BUFFER_SIZES.to_vec());
        assert_eq!(config.tuning.keepalive_count, 9);
        assert_eq!(config.tuning.keepalive_idle, Duration::from_secs(60));
        assert_eq!(config.tuning.keepalive_interval, Duration::from_secs(30));
        assert_eq!(config.forwarder.max_in_flight, 2048);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = Config::from_toml(
            r#"
            [dispatcher]
            buffer_sizes = [256, 1024, 65536]

            [tuning]
            keepalive_idle = "2m"

            [dialer]
            bind_interface = "eth1"
            connect_timeout = "3s"
            "#,
        )
        .unwrap();

        assert_eq!(config.dispatcher.buffer_sizes, vec![256, 1024, 65536]);
        assert_eq!(config.dispatcher.mtu, DEFAULT_MTU);
        assert_eq!(config.tuning.keepalive_idle, Duration::from_secs(120));
        assert_eq!(config.tuning.keepalive_interval, Duration::from_secs(30));
        assert_eq!(config.dialer.bind_interface.as_deref(), Some("eth1"));
        assert_eq!(config.dialer.connect_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.dispatcher.buffer_sizes.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.dispatcher.buffer_sizes = vec![128, 0];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tuning.keepalive_count = 0;
        assert!(config.validate().is_err());

        // Keepalive values are ignored when keepalive is disabled.
        config.tuning.keepalive = false;
        config.validate().unwrap();

        let mut config = Config::default();
        config.forwarder.copy_buffer_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunmitm.toml");

        let mut config = Config::default();
        config.dialer.fwmark = Some(0x1234);
        config.logging.format = LogFormat::Json;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_init_logging_installs_once() {
        let bad = LoggingConfig {
            level: "tunmitm=verbose".into(),
            ..LoggingConfig::default()
        };
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(matches!(init_logging(&bad), Err(Error::InvalidConfig(_))));
        }

        let config = LoggingConfig {
            level: "debug".into(),
            color: false,
            ..LoggingConfig::default()
        };
        // The first call installs the subscriber; any later one is rejected.
        let _ = init_logging(&config);
        assert!(matches!(init_logging(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_log_format_names() {
        let config = Config::from_toml("[logging]\nformat = \"json\"\n").unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(Config::from_toml("[logging]\nformat = \"xml\"\n").is_err());
    }
}
