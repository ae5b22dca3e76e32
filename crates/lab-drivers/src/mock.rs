//! Mock drivers: a thermometer, a signal source, and a deliberately
//! unreliable driver for exercising failure paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::future::BoxFuture;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use lab_core::{DriverFactory, InstrumentDriver, LabError, LabResult};

fn parse_config<T: DeserializeOwned + Default>(config: serde_json::Value) -> anyhow::Result<T> {
    if config.is_null() {
        Ok(T::default())
    } else {
        serde_json::from_value(config).context("malformed driver configuration")
    }
}

/// Simulated thermometer: a base temperature with uniform noise.
pub struct MockThermometer {
    base: f64,
    noise: f64,
    closed: AtomicBool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ThermometerConfig {
    #[serde(default = "ThermometerConfig::default_base")]
    base: f64,
    #[serde(default = "ThermometerConfig::default_noise")]
    noise: f64,
}

impl ThermometerConfig {
    fn default_base() -> f64 {
        293.15
    }
    fn default_noise() -> f64 {
        0.1
    }
}

impl Default for ThermometerConfig {
    fn default() -> Self {
        ThermometerConfig {
            base: Self::default_base(),
            noise: Self::default_noise(),
        }
    }
}

#[async_trait]
impl InstrumentDriver for MockThermometer {
    async fn read(&self) -> LabResult<BTreeMap<String, f64>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LabError::DriverFault("thermometer is closed".into()));
        }
        let jitter = rand::thread_rng().gen_range(-self.noise..=self.noise);
        let mut fields = BTreeMap::new();
        fields.insert("temperature".to_string(), self.base + jitter);
        Ok(fields)
    }

    async fn close(&self) -> LabResult<()> {
        self.closed.store(true, Ordering::Release);
        debug!("mock thermometer closed");
        Ok(())
    }
}

/// Factory for [`MockThermometer`] (`mock_thermometer`).
pub struct MockThermometerFactory;

impl DriverFactory for MockThermometerFactory {
    fn driver_type(&self) -> &'static str {
        "mock_thermometer"
    }

    fn validate(&self, config: &serde_json::Value) -> anyhow::Result<()> {
        let config: ThermometerConfig = parse_config(config.clone())?;
        if config.noise < 0.0 {
            bail!("noise must be non-negative, got {}", config.noise);
        }
        Ok(())
    }

    fn build(
        &self,
        config: serde_json::Value,
    ) -> BoxFuture<'static, anyhow::Result<Arc<dyn InstrumentDriver>>> {
        Box::pin(async move {
            let config: ThermometerConfig = parse_config(config)?;
            Ok(Arc::new(MockThermometer {
                base: config.base,
                noise: config.noise,
                closed: AtomicBool::new(false),
            }) as Arc<dyn InstrumentDriver>)
        })
    }
}

/// Simulated signal source: a sine voltage into a fixed load.
pub struct MockSource {
    amplitude: f64,
    frequency_hz: f64,
    load_ohms: f64,
    started: Instant,
    closed: AtomicBool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceConfig {
    #[serde(default = "SourceConfig::default_amplitude")]
    amplitude: f64,
    #[serde(default = "SourceConfig::default_frequency")]
    frequency_hz: f64,
    #[serde(default = "SourceConfig::default_load")]
    load_ohms: f64,
}

impl SourceConfig {
    fn default_amplitude() -> f64 {
        1.0
    }
    fn default_frequency() -> f64 {
        1.0
    }
    fn default_load() -> f64 {
        50.0
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            amplitude: Self::default_amplitude(),
            frequency_hz: Self::default_frequency(),
            load_ohms: Self::default_load(),
        }
    }
}

#[async_trait]
impl InstrumentDriver for MockSource {
    async fn read(&self) -> LabResult<BTreeMap<String, f64>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LabError::DriverFault("source is closed".into()));
        }
        let t = self.started.elapsed().as_secs_f64();
        let voltage = self.amplitude * (std::f64::consts::TAU * self.frequency_hz * t).sin();
        let mut fields = BTreeMap::new();
        fields.insert("voltage".to_string(), voltage);
        fields.insert("current".to_string(), voltage / self.load_ohms);
        Ok(fields)
    }

    async fn close(&self) -> LabResult<()> {
        self.closed.store(true, Ordering::Release);
        debug!("mock source closed");
        Ok(())
    }
}

/// Factory for [`MockSource`] (`mock_source`).
pub struct MockSourceFactory;

impl DriverFactory for MockSourceFactory {
    fn driver_type(&self) -> &'static str {
        "mock_source"
    }

    fn validate(&self, config: &serde_json::Value) -> anyhow::Result<()> {
        let config: SourceConfig = parse_config(config.clone())?;
        if !config.amplitude.is_finite() {
            bail!("amplitude must be finite");
        }
        if config.frequency_hz <= 0.0 {
            bail!("frequency_hz must be positive, got {}", config.frequency_hz);
        }
        if config.load_ohms <= 0.0 {
            bail!("load_ohms must be positive, got {}", config.load_ohms);
        }
        Ok(())
    }

    fn build(
        &self,
        config: serde_json::Value,
    ) -> BoxFuture<'static, anyhow::Result<Arc<dyn InstrumentDriver>>> {
        Box::pin(async move {
            let config: SourceConfig = parse_config(config)?;
            Ok(Arc::new(MockSource {
                amplitude: config.amplitude,
                frequency_hz: config.frequency_hz,
                load_ohms: config.load_ohms,
                started: Instant::now(),
                closed: AtomicBool::new(false),
            }) as Arc<dyn InstrumentDriver>)
        })
    }
}

/// Deliberately unreliable driver for exercising failure handling.
pub struct MockFlaky {
    fail_after_reads: Option<u64>,
    reads: AtomicU64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FlakyConfig {
    /// Make construction itself fail, as absent hardware would.
    #[serde(default)]
    fail_on_build: bool,
    /// Start failing reads after this many successes.
    #[serde(default)]
    fail_after_reads: Option<u64>,
}

#[async_trait]
impl InstrumentDriver for MockFlaky {
    async fn read(&self) -> LabResult<BTreeMap<String, f64>> {
        let count = self.reads.fetch_add(1, Ordering::AcqRel);
        if let Some(limit) = self.fail_after_reads {
            if count >= limit {
                return Err(LabError::DriverFault(format!(
                    "simulated fault after {limit} reads"
                )));
            }
        }
        let mut fields = BTreeMap::new();
        fields.insert("reads".to_string(), count as f64);
        Ok(fields)
    }

    async fn close(&self) -> LabResult<()> {
        Ok(())
    }
}

/// Factory for [`MockFlaky`] (`mock_flaky`).
pub struct MockFlakyFactory;

impl DriverFactory for MockFlakyFactory {
    fn driver_type(&self) -> &'static str {
        "mock_flaky"
    }

    fn validate(&self, config: &serde_json::Value) -> anyhow::Result<()> {
        parse_config::<FlakyConfig>(config.clone()).map(|_| ())
    }

    fn build(
        &self,
        config: serde_json::Value,
    ) -> BoxFuture<'static, anyhow::Result<Arc<dyn InstrumentDriver>>> {
        Box::pin(async move {
            let config: FlakyConfig = parse_config(config)?;
            if config.fail_on_build {
                bail!("simulated hardware absent");
            }
            Ok(Arc::new(MockFlaky {
                fail_after_reads: config.fail_after_reads,
                reads: AtomicU64::new(0),
            }) as Arc<dyn InstrumentDriver>)
        })
    }
}
