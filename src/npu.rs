// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Exclusive reservation of the NPU.

use std::sync::Arc;

use tracing::{error, info};

use crate::errors::DriverError;
use crate::traits::Driver;

/// Scoped reservation of the NPU for this process.
///
/// While locked, other processes cannot run inference on the NPU. The lock
/// is released when [`Npu::unlock`] is called or when the value is dropped.
/// [`Npu::is_locked`] only reports this instance's own reservation.
#[derive(Debug)]
pub struct Npu {
    driver: Arc<dyn Driver>,
    locked: bool,
}

impl Npu {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            locked: false,
        }
    }

    /// Whether the NPU driver can be reached.
    pub fn available(&self) -> bool {
        self.driver.available()
    }

    /// Reserve the NPU. Locking an already locked instance succeeds.
    pub fn lock(&mut self) -> Result<(), DriverError> {
        if self.locked {
            return Ok(());
        }
        if !self.available() {
            error!("NPU not available");
            return Err(DriverError::Unavailable);
        }
        if let Err(e) = self.driver.lock_npu() {
            error!(error = %e, "failed to lock NPU");
            return Err(e);
        }
        self.locked = true;
        info!("NPU locked");
        Ok(())
    }

    /// Release the reservation. Unlocking an unlocked instance succeeds.
    pub fn unlock(&mut self) -> Result<(), DriverError> {
        if !self.locked {
            return Ok(());
        }
        if let Err(e) = self.driver.unlock_npu() {
            error!(error = %e, "failed to unlock NPU");
            return Err(e);
        }
        self.locked = false;
        info!("NPU unlocked");
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl Drop for Npu {
    fn drop(&mut self) {
        // Failure is already logged by unlock.
        let _ = self.unlock();
    }
}
