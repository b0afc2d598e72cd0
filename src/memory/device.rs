// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::sync::Arc;

use crate::errors::MemoryError;
use crate::memory::{align_to, Memory};
use crate::traits::{Allocator, Driver};

/// Allocator handing out driver io buffers.
///
/// Blocks carry a block id, a reference id and a sharable descriptor, so they
/// can be attached to hardware predictors and shared with other contexts
/// without copying. Cache maintenance goes through the driver.
#[derive(Debug, Clone)]
pub struct DeviceAllocator {
    driver: Arc<dyn Driver>,
}

impl DeviceAllocator {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver }
    }
}

impl Allocator for DeviceAllocator {
    fn name(&self) -> &'static str {
        "device"
    }

    fn available(&self) -> bool {
        self.driver.available()
    }

    fn alloc_aligned(&self, size: usize, alignment: usize) -> Result<Memory, MemoryError> {
        if size == 0 {
            return Err(MemoryError::AllocationFailed {
                allocator: self.name(),
                size,
            });
        }
        Ok(self.driver.allocate_io_buffer(align_to(size, alignment))?)
    }

    fn dealloc(&self, memory: &Memory) {
        if memory.block_id() == 0 {
            return;
        }
        if let Err(e) = self.driver.destroy_io_buffer(memory.block_id()) {
            tracing::error!(block_id = memory.block_id(), error = %e, "failed to release io buffer");
        }
    }

    fn cache_flush(&self, memory: &Memory, size: usize) -> Result<(), MemoryError> {
        if memory.block_id() == 0 {
            return Ok(());
        }
        self.driver
            .end_cpu_access(memory, size)
            .map_err(|e| MemoryError::CacheFlush(e.to_string()))
    }

    fn cache_invalidate(&self, memory: &Memory, size: usize) -> Result<(), MemoryError> {
        if memory.block_id() == 0 {
            return Ok(());
        }
        self.driver
            .begin_cpu_access(memory, size)
            .map_err(|e| MemoryError::CacheInvalidate(e.to_string()))
    }

    fn driver(&self) -> Option<Arc<dyn Driver>> {
        Some(self.driver.clone())
    }
}
