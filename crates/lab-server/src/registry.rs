//! Device registry: the single source of truth for what hardware exists.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use lab_core::{DeviceSpec, DriverFactory, InstrumentDriver, LabError, LabResult};

struct Entry {
    spec: DeviceSpec,
    driver: Arc<dyn InstrumentDriver>,
}

/// Registry of live devices.
///
/// All mutation goes through [`add`](Self::add), [`remove`](Self::remove)
/// and [`restart`](Self::restart); add and restart hold the write lock
/// for their whole critical section, so destructive operations never
/// interleave and a failed driver build never leaves a partial entry.
pub struct DeviceRegistry {
    factories: HashMap<&'static str, Arc<dyn DriverFactory>>,
    devices: RwLock<HashMap<String, Entry>>,
}

impl DeviceRegistry {
    /// A registry accepting the given driver factories.
    pub fn new(factories: Vec<Arc<dyn DriverFactory>>) -> Self {
        DeviceRegistry {
            factories: factories.into_iter().map(|f| (f.driver_type(), f)).collect(),
            devices: RwLock::new(HashMap::new()),
        }
    }

    fn factory(&self, driver_type: &str) -> LabResult<Arc<dyn DriverFactory>> {
        self.factories
            .get(driver_type)
            .cloned()
            .ok_or_else(|| LabError::InvalidConfig(format!("unknown driver type '{driver_type}'")))
    }

    /// Register a new device, constructing its driver.
    ///
    /// A duplicate name is rejected before any construction happens; a
    /// failing build is reported to the caller and leaves the registry
    /// untouched.
    pub async fn add(&self, spec: DeviceSpec) -> LabResult<()> {
        let factory = self.factory(&spec.driver_type)?;
        let mut devices = self.devices.write().await;
        if devices.contains_key(&spec.name) {
            return Err(LabError::DeviceExists(spec.name));
        }
        factory
            .validate(&spec.config)
            .map_err(|err| LabError::driver_init(&spec.name, &err))?;
        let driver = factory
            .build(spec.config.clone())
            .await
            .map_err(|err| LabError::driver_init(&spec.name, &err))?;
        info!(device = %spec.name, driver = %spec.driver_type, "device registered");
        devices.insert(spec.name.clone(), Entry { spec, driver });
        Ok(())
    }

    /// Remove a device, closing its driver best-effort.
    pub async fn remove(&self, name: &str) -> LabResult<()> {
        let entry = self
            .devices
            .write()
            .await
            .remove(name)
            .ok_or_else(|| LabError::DeviceUnknown(name.to_string()))?;
        if let Err(err) = entry.driver.close().await {
            warn!(device = name, %err, "driver close failed during removal");
        }
        info!(device = name, "device removed");
        Ok(())
    }

    /// Tear a device down and rebuild it from its stored spec.
    ///
    /// Atomic under the write lock. When the rebuild fails the device is
    /// absent afterwards and the error goes to the caller.
    pub async fn restart(&self, name: &str) -> LabResult<()> {
        let mut devices = self.devices.write().await;
        let entry = devices
            .remove(name)
            .ok_or_else(|| LabError::DeviceUnknown(name.to_string()))?;
        if let Err(err) = entry.driver.close().await {
            warn!(device = name, %err, "driver close failed during restart");
        }
        let factory = self.factory(&entry.spec.driver_type)?;
        match factory.build(entry.spec.config.clone()).await {
            Ok(driver) => {
                info!(device = name, "device restarted");
                devices.insert(name.to_string(), Entry { spec: entry.spec, driver });
                Ok(())
            }
            Err(err) => {
                warn!(device = name, "device absent after failed restart");
                Err(LabError::driver_init(name, &err))
            }
        }
    }

    /// Poll a device once.
    pub async fn read(&self, name: &str) -> LabResult<BTreeMap<String, f64>> {
        let driver = self
            .devices
            .read()
            .await
            .get(name)
            .map(|e| e.driver.clone())
            .ok_or_else(|| LabError::DeviceUnknown(name.to_string()))?;
        driver.read().await
    }

    /// Specs of all registered devices, sorted by name.
    pub async fn list(&self) -> Vec<DeviceSpec> {
        let devices = self.devices.read().await;
        let mut specs: Vec<DeviceSpec> = devices.values().map(|e| e.spec.clone()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Names of all registered devices, sorted.
    pub async fn names(&self) -> Vec<String> {
        let devices = self.devices.read().await;
        let mut names: Vec<String> = devices.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a device with this name is registered.
    pub async fn contains(&self, name: &str) -> bool {
        self.devices.read().await.contains_key(name)
    }

    /// Close every driver and empty the registry. Used at shutdown.
    pub async fn close_all(&self) {
        let entries: Vec<(String, Entry)> = self.devices.write().await.drain().collect();
        for (name, entry) in entries {
            if let Err(err) = entry.driver.close().await {
                warn!(device = %name, %err, "driver close failed at shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use lab_drivers::driver_registry;

    use super::*;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(driver_registry())
    }

    #[tokio::test]
    async fn add_and_read_round_trip() {
        let registry = registry();
        registry
            .add(DeviceSpec::new("probe", "mock_thermometer"))
            .await
            .unwrap();
        let fields = registry.read("probe").await.unwrap();
        assert!(fields.contains_key("temperature"));
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected_synchronously() {
        let registry = registry();
        registry
            .add(DeviceSpec::new("probe", "mock_thermometer"))
            .await
            .unwrap();
        let err = registry
            .add(DeviceSpec::new("probe", "mock_source"))
            .await
            .unwrap_err();
        assert!(matches!(err, LabError::DeviceExists(_)));
        // The original registration survives.
        assert!(registry.read("probe").await.unwrap().contains_key("temperature"));
    }

    #[tokio::test]
    async fn unknown_driver_type_is_a_config_error() {
        let registry = registry();
        let err = registry
            .add(DeviceSpec::new("x", "dilution_fridge"))
            .await
            .unwrap_err();
        assert!(matches!(err, LabError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn failed_build_leaves_nothing_registered() {
        let registry = registry();
        let err = registry
            .add(
                DeviceSpec::new("ghost", "mock_flaky")
                    .with_config(json!({ "fail_on_build": true })),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LabError::DriverInit { .. }));
        assert!(!registry.contains("ghost").await);
    }

    #[tokio::test]
    async fn remove_then_read_is_unknown() {
        let registry = registry();
        registry
            .add(DeviceSpec::new("probe", "mock_thermometer"))
            .await
            .unwrap();
        registry.remove("probe").await.unwrap();
        assert!(matches!(
            registry.read("probe").await,
            Err(LabError::DeviceUnknown(_))
        ));
        assert!(matches!(
            registry.remove("probe").await,
            Err(LabError::DeviceUnknown(_))
        ));
    }

    #[tokio::test]
    async fn restart_replaces_the_driver_instance() {
        let registry = registry();
        registry
            .add(
                DeviceSpec::new("flaky", "mock_flaky")
                    .with_config(json!({ "fail_after_reads": 1 })),
            )
            .await
            .unwrap();
        registry.read("flaky").await.unwrap();
        assert!(registry.read("flaky").await.is_err());
        // A restart rebuilds from the spec; the read counter starts over.
        registry.restart("flaky").await.unwrap();
        assert!(registry.read("flaky").await.is_ok());
    }

    /// Factory whose first build succeeds and every later one fails,
    /// standing in for hardware that wedges after power-up.
    struct OneShotFactory {
        builds: std::sync::atomic::AtomicU64,
    }

    struct NullDriver;

    #[async_trait::async_trait]
    impl lab_core::InstrumentDriver for NullDriver {
        async fn read(&self) -> LabResult<BTreeMap<String, f64>> {
            Ok(BTreeMap::new())
        }
        async fn close(&self) -> LabResult<()> {
            Ok(())
        }
    }

    impl DriverFactory for OneShotFactory {
        fn driver_type(&self) -> &'static str {
            "one_shot"
        }
        fn validate(&self, _config: &serde_json::Value) -> anyhow::Result<()> {
            Ok(())
        }
        fn build(
            &self,
            _config: serde_json::Value,
        ) -> futures::future::BoxFuture<'static, anyhow::Result<Arc<dyn InstrumentDriver>>>
        {
            let first = self
                .builds
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
                == 0;
            Box::pin(async move {
                if first {
                    Ok(Arc::new(NullDriver) as Arc<dyn InstrumentDriver>)
                } else {
                    anyhow::bail!("device did not come back")
                }
            })
        }
    }

    #[tokio::test]
    async fn failed_restart_leaves_the_device_absent() {
        let registry = DeviceRegistry::new(vec![Arc::new(OneShotFactory {
            builds: std::sync::atomic::AtomicU64::new(0),
        })]);
        registry.add(DeviceSpec::new("probe", "one_shot")).await.unwrap();
        let err = registry.restart("probe").await.unwrap_err();
        assert!(matches!(err, LabError::DriverInit { .. }));
        assert!(!registry.contains("probe").await);
    }

    #[tokio::test]
    async fn restart_of_an_unknown_device_errors() {
        let registry = registry();
        assert!(matches!(
            registry.restart("missing").await,
            Err(LabError::DeviceUnknown(_))
        ));
    }

    #[tokio::test]
    async fn list_is_sorted_and_complete() {
        let registry = registry();
        registry.add(DeviceSpec::new("b", "mock_source")).await.unwrap();
        registry
            .add(DeviceSpec::new("a", "mock_thermometer"))
            .await
            .unwrap();
        let names: Vec<String> = registry.list().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
