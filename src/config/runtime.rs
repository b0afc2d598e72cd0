// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::sync::Arc;

use tracing::info;

use crate::config::{AllocatorKind, RuntimeConfig};
use crate::engine::{PredictorRegistry, RuntimeContext};
use crate::errors::ConfigError;
use crate::memory::{heap_allocator, DeviceAllocator};
use crate::traits::{Allocator, Driver};

/// Builds the [`RuntimeContext`] networks are created with.
///
/// # Examples
///
/// ```
/// use npu_runtime::config::{RuntimeBuilder, RuntimeConfig};
///
/// let context = RuntimeBuilder::from_config(&RuntimeConfig::default(), None).unwrap();
/// assert_eq!(context.allocator().name(), "heap");
/// assert!(context.registry().contains("bundle"));
/// ```
pub struct RuntimeBuilder;

impl RuntimeBuilder {
    /// Build a context with the built-in predictors.
    ///
    /// The `device` allocator needs `driver`, and the driver must be
    /// available.
    pub fn from_config(
        cfg: &RuntimeConfig,
        driver: Option<Arc<dyn Driver>>,
    ) -> Result<Arc<RuntimeContext>, ConfigError> {
        Self::with_registry(cfg, driver, PredictorRegistry::with_builtins())
    }

    /// Same as [`from_config`](Self::from_config) with a custom registry.
    pub fn with_registry(
        cfg: &RuntimeConfig,
        driver: Option<Arc<dyn Driver>>,
        registry: PredictorRegistry,
    ) -> Result<Arc<RuntimeContext>, ConfigError> {
        let allocator: Arc<dyn Allocator> = match cfg.allocator {
            AllocatorKind::Heap => heap_allocator(),
            AllocatorKind::Device => {
                let driver = driver
                    .filter(|driver| driver.available())
                    .ok_or(ConfigError::DriverRequired(AllocatorKind::Device.as_str()))?;
                Arc::new(DeviceAllocator::new(driver))
            }
        };

        info!(
            allocator = allocator.name(),
            parallel_limit = ?cfg.parallel_limit,
            delegates = ?registry.delegates(),
            "runtime context built"
        );
        Ok(Arc::new(
            RuntimeContext::new(registry, allocator).with_parallel_limit(cfg.parallel_limit),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::EmulatedDevice;

    #[test]
    fn test_device_allocator_requires_driver() {
        let cfg = RuntimeConfig {
            allocator: AllocatorKind::Device,
            ..RuntimeConfig::default()
        };
        assert!(matches!(
            RuntimeBuilder::from_config(&cfg, None),
            Err(ConfigError::DriverRequired("device"))
        ));

        let device = EmulatedDevice::new();
        device.set_online(false);
        let offline: Arc<dyn Driver> = Arc::new(device.open());
        assert!(RuntimeBuilder::from_config(&cfg, Some(offline)).is_err());
    }

    #[test]
    fn test_device_allocator_with_driver() {
        let cfg = RuntimeConfig {
            allocator: AllocatorKind::Device,
            parallel_limit: Some(1),
            ..RuntimeConfig::default()
        };
        let device = EmulatedDevice::new();
        let context = RuntimeBuilder::from_config(&cfg, Some(Arc::new(device.open()))).unwrap();

        assert_eq!(context.allocator().name(), "device");
        assert_eq!(context.parallel_limit(), Some(1));
    }
}
