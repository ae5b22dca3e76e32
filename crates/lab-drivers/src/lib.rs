//! Simulated instrument drivers.
//!
//! Real hardware lives behind the same [`lab_core::DriverFactory`] seam;
//! these mocks produce plausible readings for development and tests.

pub mod mock;

use std::sync::Arc;

use lab_core::DriverFactory;

/// The factory set handed to the daemon's registry.
pub fn driver_registry() -> Vec<Arc<dyn DriverFactory>> {
    vec![
        Arc::new(mock::MockThermometerFactory),
        Arc::new(mock::MockSourceFactory),
        Arc::new(mock::MockFlakyFactory),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_all_mock_types() {
        let types: Vec<&str> = driver_registry().iter().map(|f| f.driver_type()).collect();
        assert!(types.contains(&"mock_thermometer"));
        assert!(types.contains(&"mock_source"));
        assert!(types.contains(&"mock_flaky"));
    }
}
