//! Server address handling.
//!
//! Accepts anything from a bare hostname to a full URL and normalizes it
//! to an `http` URL with an explicit port, so the rest of the crate only
//! ever sees a dialable address.

use std::fmt;

use url::Url;

use crate::error::{GatewayError, GatewayResult};

/// Default port of the instrument service.
pub const DEFAULT_INSTRUMENT_PORT: u16 = 42068;
/// Default port of the data service.
pub const DEFAULT_DATA_PORT: u16 = 42069;

/// Environment variable consulted for the instrument service address.
pub const INSTRUMENT_URL_ENV: &str = "LAB_INSTRUMENT_URL";
/// Environment variable consulted for the data service address.
pub const DATA_URL_ENV: &str = "LAB_DATA_URL";

/// A normalized, dialable server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    url: Url,
}

impl ServerAddress {
    /// Normalize `input`, filling in `default_port` when none is given.
    pub fn parse(input: &str, default_port: u16) -> GatewayResult<Self> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(GatewayError::InvalidAddress("empty address".into()));
        }
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };
        let mut url = Url::parse(&with_scheme)?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(GatewayError::InvalidAddress(format!(
                    "unsupported scheme '{other}'"
                )))
            }
        }
        if url.host_str().is_none() {
            return Err(GatewayError::InvalidAddress(format!("missing host in '{input}'")));
        }
        if url.port().is_none() {
            url.set_port(Some(default_port))
                .map_err(|()| GatewayError::InvalidAddress(format!("cannot set port on '{input}'")))?;
        }
        Ok(ServerAddress { url })
    }

    /// An instrument service address.
    pub fn instrument(input: &str) -> GatewayResult<Self> {
        ServerAddress::parse(input, DEFAULT_INSTRUMENT_PORT)
    }

    /// A data service address.
    pub fn data(input: &str) -> GatewayResult<Self> {
        ServerAddress::parse(input, DEFAULT_DATA_PORT)
    }

    /// Resolve an instrument address: explicit input, then
    /// `LAB_INSTRUMENT_URL`, then localhost.
    pub fn resolve_instrument(input: Option<&str>) -> GatewayResult<Self> {
        resolve(input, INSTRUMENT_URL_ENV, DEFAULT_INSTRUMENT_PORT)
    }

    /// Resolve a data address: explicit input, then `LAB_DATA_URL`, then
    /// localhost.
    pub fn resolve_data(input: Option<&str>) -> GatewayResult<Self> {
        resolve(input, DATA_URL_ENV, DEFAULT_DATA_PORT)
    }

    /// The normalized URL as a string.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// The port the address dials.
    pub fn port(&self) -> u16 {
        // Normalization guarantees an explicit port.
        self.url.port().unwrap_or(0)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

fn resolve(input: Option<&str>, env_var: &str, default_port: u16) -> GatewayResult<ServerAddress> {
    if let Some(input) = input {
        return ServerAddress::parse(input, default_port);
    }
    if let Ok(from_env) = std::env::var(env_var) {
        if !from_env.trim().is_empty() {
            return ServerAddress::parse(&from_env, default_port);
        }
    }
    ServerAddress::parse("localhost", default_port)
}
