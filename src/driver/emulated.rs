// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! In-process NPU device.
//!
//! [`EmulatedDevice`] keeps io buffers in heap memory and tracks block
//! registrations, sharable descriptors and the NPU reservation the way the
//! kernel driver does. Every [`EmulatedDriver`] opened on a device is a
//! separate session, which stands in for a separate process when contending
//! for the NPU lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::errors::DriverError;
use crate::memory::{HeapAllocator, Memory};
use crate::traits::{Allocator, Driver};

struct Region {
    memory: Memory,
    fd: i32,
    blocks: usize,
}

#[derive(Default)]
struct DeviceState {
    next_block: u32,
    next_reference: u32,
    next_fd: i32,
    regions: HashMap<u32, Region>,
    descriptors: HashMap<i32, u32>,
    blocks: HashMap<u32, u32>,
    npu_owner: Option<u64>,
    flushes: usize,
    invalidates: usize,
}

impl DeviceState {
    fn register_block(&mut self, reference_id: u32) -> u32 {
        self.next_block += 1;
        let block_id = self.next_block;
        self.blocks.insert(block_id, reference_id);
        if let Some(region) = self.regions.get_mut(&reference_id) {
            region.blocks += 1;
        }
        block_id
    }

    fn window(
        &mut self,
        reference_id: u32,
        offset: usize,
        size: usize,
    ) -> Result<Memory, DriverError> {
        let region = self
            .regions
            .get(&reference_id)
            .ok_or(DriverError::UnknownReference(reference_id))?;
        let capacity = region.memory.size();
        if offset.checked_add(size).map_or(true, |end| end > capacity) {
            return Err(DriverError::OutOfRange {
                offset,
                size,
                capacity,
            });
        }
        let fd = region.fd;
        let block_id = self.register_block(reference_id);
        Ok(Memory::new(size)
            .with_block_id(block_id)
            .with_reference_id(reference_id)
            .with_fd(Some(fd)))
    }
}

/// Shared state of one emulated NPU.
pub struct EmulatedDevice {
    state: Mutex<DeviceState>,
    online: AtomicBool,
    sessions: AtomicU64,
    heap: HeapAllocator,
}

impl std::fmt::Debug for EmulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatedDevice")
            .field("online", &self.online.load(Ordering::Relaxed))
            .field("blocks", &self.block_count())
            .finish()
    }
}

impl EmulatedDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DeviceState {
                next_fd: 100,
                ..DeviceState::default()
            }),
            online: AtomicBool::new(true),
            sessions: AtomicU64::new(0),
            heap: HeapAllocator::new(),
        })
    }

    /// Open a new driver session on this device.
    pub fn open(self: &Arc<Self>) -> EmulatedDriver {
        EmulatedDriver {
            device: self.clone(),
            session: self.sessions.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }

    /// Simulate the device node appearing or disappearing.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    /// Number of live block registrations.
    pub fn block_count(&self) -> usize {
        self.state().blocks.len()
    }

    /// Number of live io buffers.
    pub fn region_count(&self) -> usize {
        self.state().regions.len()
    }

    pub fn cache_flushes(&self) -> usize {
        self.state().flushes
    }

    pub fn cache_invalidates(&self) -> usize {
        self.state().invalidates
    }

    pub fn is_npu_reserved(&self) -> bool {
        self.state().npu_owner.is_some()
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_online(&self) -> Result<(), DriverError> {
        if self.online.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(DriverError::Unavailable)
        }
    }
}

impl Drop for EmulatedDevice {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, region) in state.regions.drain() {
            self.heap.dealloc(&region.memory);
        }
    }
}

/// One session with an [`EmulatedDevice`].
#[derive(Debug, Clone)]
pub struct EmulatedDriver {
    device: Arc<EmulatedDevice>,
    session: u64,
}

impl EmulatedDriver {
    /// Session on a fresh private device.
    pub fn new() -> Self {
        EmulatedDevice::new().open()
    }

    pub fn device(&self) -> &Arc<EmulatedDevice> {
        &self.device
    }

    fn known_block(state: &DeviceState, memory: &Memory) -> Result<(), DriverError> {
        if state.blocks.contains_key(&memory.block_id()) {
            Ok(())
        } else {
            Err(DriverError::UnknownBlock(memory.block_id()))
        }
    }
}

impl Default for EmulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for EmulatedDriver {
    fn available(&self) -> bool {
        self.device.online.load(Ordering::Relaxed)
    }

    fn lock_npu(&self) -> Result<(), DriverError> {
        self.device.ensure_online()?;
        let mut state = self.device.state();
        match state.npu_owner {
            Some(owner) if owner != self.session => Err(DriverError::NpuBusy),
            _ => {
                state.npu_owner = Some(self.session);
                Ok(())
            }
        }
    }

    fn unlock_npu(&self) -> Result<(), DriverError> {
        let mut state = self.device.state();
        if state.npu_owner != Some(self.session) {
            return Err(DriverError::NotLocked);
        }
        state.npu_owner = None;
        Ok(())
    }

    fn allocate_io_buffer(&self, size: usize) -> Result<Memory, DriverError> {
        self.device.ensure_online()?;
        let backing = self
            .device
            .heap
            .alloc(size)
            .map_err(|_| DriverError::AllocationFailed { size })?;

        let mut state = self.device.state();
        state.next_reference += 1;
        state.next_fd += 1;
        let reference_id = state.next_reference;
        let fd = state.next_fd;
        let address = backing.address();
        let capacity = backing.size();
        state.regions.insert(
            reference_id,
            Region {
                memory: backing,
                fd,
                blocks: 0,
            },
        );
        state.descriptors.insert(fd, reference_id);
        let block_id = state.register_block(reference_id);
        debug!(block_id, reference_id, fd, size = capacity, "io buffer allocated");

        Ok(Memory::new(capacity)
            .with_address(address)
            .with_block_id(block_id)
            .with_reference_id(reference_id)
            .with_fd(Some(fd)))
    }

    fn create_io_buffer_from_reference(
        &self,
        reference_id: u32,
        offset: usize,
        size: usize,
    ) -> Result<Memory, DriverError> {
        self.device.ensure_online()?;
        self.device.state().window(reference_id, offset, size)
    }

    fn create_io_buffer_from_fd(
        &self,
        fd: i32,
        offset: usize,
        size: usize,
    ) -> Result<Memory, DriverError> {
        self.device.ensure_online()?;
        let mut state = self.device.state();
        let reference_id = *state
            .descriptors
            .get(&fd)
            .ok_or(DriverError::UnknownDescriptor(fd))?;
        state.window(reference_id, offset, size)
    }

    fn destroy_io_buffer(&self, block_id: u32) -> Result<(), DriverError> {
        let released = {
            let mut state = self.device.state();
            let reference_id = state
                .blocks
                .remove(&block_id)
                .ok_or(DriverError::UnknownBlock(block_id))?;
            let drained = match state.regions.get_mut(&reference_id) {
                Some(region) => {
                    region.blocks = region.blocks.saturating_sub(1);
                    region.blocks == 0
                }
                None => false,
            };
            if drained {
                let region = state.regions.remove(&reference_id);
                if let Some(region) = &region {
                    state.descriptors.remove(&region.fd);
                }
                region
            } else {
                None
            }
        };

        if let Some(region) = released {
            debug!(reference_id = region.memory.reference_id(), "io buffer released");
            self.device.heap.dealloc(&region.memory);
        }
        Ok(())
    }

    fn begin_cpu_access(&self, memory: &Memory, _size: usize) -> Result<(), DriverError> {
        let mut state = self.device.state();
        Self::known_block(&state, memory)?;
        state.invalidates += 1;
        Ok(())
    }

    fn end_cpu_access(&self, memory: &Memory, _size: usize) -> Result<(), DriverError> {
        let mut state = self.device.state();
        Self::known_block(&state, memory)?;
        state.flushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_registration_keeps_region_alive() {
        let device = EmulatedDevice::new();
        let driver = device.open();

        let block = driver.allocate_io_buffer(4096).unwrap();
        let window = driver
            .create_io_buffer_from_reference(block.reference_id(), 1024, 256)
            .unwrap();
        assert!(window.address().is_none());
        assert_ne!(window.block_id(), block.block_id());
        assert_eq!(device.block_count(), 2);

        driver.destroy_io_buffer(block.block_id()).unwrap();
        assert_eq!(device.region_count(), 1);

        driver.destroy_io_buffer(window.block_id()).unwrap();
        assert_eq!(device.region_count(), 0);
        assert_eq!(device.block_count(), 0);
    }

    #[test]
    fn test_window_outside_region_is_rejected() {
        let driver = EmulatedDriver::new();
        let block = driver.allocate_io_buffer(100).unwrap();
        let result = driver.create_io_buffer_from_reference(block.reference_id(), 4000, 200);
        assert!(matches!(result, Err(DriverError::OutOfRange { .. })));
    }

    #[test]
    fn test_descriptor_lookup() {
        let driver = EmulatedDriver::new();
        let block = driver.allocate_io_buffer(64).unwrap();
        let fd = block.fd().unwrap();

        let window = driver.create_io_buffer_from_fd(fd, 0, 64).unwrap();
        assert_eq!(window.reference_id(), block.reference_id());
        assert_eq!(
            driver.create_io_buffer_from_fd(fd + 1000, 0, 64),
            Err(DriverError::UnknownDescriptor(fd + 1000))
        );
    }

    #[test]
    fn test_npu_lock_is_exclusive_between_sessions() {
        let device = EmulatedDevice::new();
        let first = device.open();
        let second = device.open();

        first.lock_npu().unwrap();
        first.lock_npu().unwrap();
        assert_eq!(second.lock_npu(), Err(DriverError::NpuBusy));
        assert_eq!(second.unlock_npu(), Err(DriverError::NotLocked));

        first.unlock_npu().unwrap();
        second.lock_npu().unwrap();
        assert!(device.is_npu_reserved());
    }

    #[test]
    fn test_offline_device_refuses_work() {
        let device = EmulatedDevice::new();
        let driver = device.open();
        device.set_online(false);

        assert!(!driver.available());
        assert_eq!(driver.lock_npu(), Err(DriverError::Unavailable));
        assert!(driver.allocate_io_buffer(64).is_err());
    }
}
