// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt::Debug;

use crate::errors::DriverError;
use crate::memory::Memory;

/// Contract of the NPU kernel driver as seen by the runtime.
///
/// One `Driver` value corresponds to one open session with the device.
/// Reservation of the NPU is tracked per session: a session that locked the
/// NPU may unlock it from any thread.
pub trait Driver: Send + Sync + Debug {
    /// Whether the device can be reached at all.
    fn available(&self) -> bool;

    fn lock_npu(&self) -> Result<(), DriverError>;

    fn unlock_npu(&self) -> Result<(), DriverError>;

    /// Allocate a device io buffer, mapped for CPU access.
    fn allocate_io_buffer(&self, size: usize) -> Result<Memory, DriverError>;

    /// Register a window of an existing io buffer identified by `reference_id`.
    ///
    /// The returned descriptor carries a fresh block id and no CPU mapping.
    fn create_io_buffer_from_reference(
        &self,
        reference_id: u32,
        offset: usize,
        size: usize,
    ) -> Result<Memory, DriverError>;

    /// Register a window of an io buffer identified by an OS descriptor.
    fn create_io_buffer_from_fd(
        &self,
        fd: i32,
        offset: usize,
        size: usize,
    ) -> Result<Memory, DriverError>;

    /// Release a block registration. Memory owned by other blocks of the
    /// same io buffer stays valid.
    fn destroy_io_buffer(&self, block_id: u32) -> Result<(), DriverError>;

    /// Hand the block back to the CPU after hardware writes (invalidate).
    fn begin_cpu_access(&self, memory: &Memory, size: usize) -> Result<(), DriverError>;

    /// Publish CPU writes to the hardware (flush).
    fn end_cpu_access(&self, memory: &Memory, size: usize) -> Result<(), DriverError>;
}
