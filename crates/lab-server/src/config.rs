//! Daemon configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use lab_core::{LabError, LabResult};

/// Default port of the instrument service.
pub const DEFAULT_INSTRUMENT_PORT: u16 = 42068;
/// Default port of the data service.
pub const DEFAULT_DATA_PORT: u16 = 42069;

/// Settings for the `labd` daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface both services bind to.
    pub host: String,
    /// Port of the instrument service.
    pub instrument_port: u16,
    /// Port of the data service.
    pub data_port: u16,
    /// Backing file of the data store; doubles as the server identity.
    pub data_file: PathBuf,
    /// Cadence of the background status loop.
    pub status_interval_ms: u64,
    /// Default cadence of user measurements.
    pub measure_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            instrument_port: DEFAULT_INSTRUMENT_PORT,
            data_port: DEFAULT_DATA_PORT,
            data_file: PathBuf::from("lab-data.jsonl"),
            status_interval_ms: 1000,
            measure_interval_ms: 100,
        }
    }
}

impl ServerConfig {
    /// Layered load: defaults, then an optional TOML file, then
    /// `LABD_`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("LABD_")).extract()
    }

    /// Bind address of the instrument service.
    pub fn instrument_addr(&self) -> LabResult<SocketAddr> {
        parse_addr(&self.host, self.instrument_port)
    }

    /// Bind address of the data service.
    pub fn data_addr(&self) -> LabResult<SocketAddr> {
        parse_addr(&self.host, self.data_port)
    }

    /// Status loop cadence.
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    /// Default user measurement cadence.
    pub fn measure_interval(&self) -> Duration {
        Duration::from_millis(self.measure_interval_ms)
    }
}

fn parse_addr(host: &str, port: u16) -> LabResult<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .map_err(|_| LabError::InvalidConfig(format!("invalid bind address '{host}:{port}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_the_well_known_ports() {
        let config = ServerConfig::default();
        assert_eq!(config.instrument_addr().unwrap().port(), 42068);
        assert_eq!(config.data_addr().unwrap().port(), 42069);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labd.toml");
        std::fs::write(&path, "instrument_port = 5000\ndata_file = \"run7.jsonl\"\n").unwrap();
        let config = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.instrument_port, 5000);
        assert_eq!(config.data_file, PathBuf::from("run7.jsonl"));
        // Untouched keys keep their defaults.
        assert_eq!(config.data_port, DEFAULT_DATA_PORT);
    }

    #[test]
    fn bad_host_is_an_invalid_config_error() {
        let config = ServerConfig {
            host: "not an address".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(
            config.instrument_addr(),
            Err(LabError::InvalidConfig(_))
        ));
    }
}
