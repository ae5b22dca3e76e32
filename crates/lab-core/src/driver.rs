//! Driver seam between the instrument registry and device implementations.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::LabResult;

/// A running instrument.
///
/// Drivers are shared behind `Arc` so measurement loops can poll them
/// without holding registry locks; implementations must therefore be
/// internally synchronized.
#[async_trait]
pub trait InstrumentDriver: Send + Sync {
    /// Poll the instrument once, returning its current named readings.
    async fn read(&self) -> LabResult<BTreeMap<String, f64>>;

    /// Release the instrument. Called on removal and at server shutdown;
    /// a failing close is logged, never fatal.
    async fn close(&self) -> LabResult<()>;
}

impl std::fmt::Debug for dyn InstrumentDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn InstrumentDriver")
    }
}

/// Everything needed to (re)construct a device: its registry name, the
/// driver type to build, and the driver's own configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Unique registry name.
    pub name: String,
    /// Key into the factory set, e.g. `mock_thermometer`.
    pub driver_type: String,
    /// Driver-specific configuration, opaque to the registry.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl DeviceSpec {
    /// A spec with no driver configuration.
    pub fn new(name: &str, driver_type: &str) -> Self {
        DeviceSpec {
            name: name.to_string(),
            driver_type: driver_type.to_string(),
            config: serde_json::Value::Null,
        }
    }

    /// Attach a JSON configuration.
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// Builds drivers of one `driver_type` from their JSON configuration.
pub trait DriverFactory: Send + Sync {
    /// The key this factory answers to in `AddDevice` requests.
    fn driver_type(&self) -> &'static str;

    /// Reject malformed configuration before any hardware is touched.
    fn validate(&self, config: &serde_json::Value) -> anyhow::Result<()>;

    /// Construct a driver. Failures are wrapped by the registry with the
    /// device name and reported to the caller that requested the add.
    fn build(
        &self,
        config: serde_json::Value,
    ) -> BoxFuture<'static, anyhow::Result<Arc<dyn InstrumentDriver>>>;
}
