// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors raised by allocators, buffers and the NPU driver.

/// Failures reported by an NPU driver implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("NPU driver is not available")]
    Unavailable,

    #[error("NPU is reserved by another process")]
    NpuBusy,

    #[error("NPU is not reserved by this session")]
    NotLocked,

    #[error("unknown io buffer reference id {0}")]
    UnknownReference(u32),

    #[error("unknown io buffer block id {0}")]
    UnknownBlock(u32),

    #[error("unknown memory descriptor {0}")]
    UnknownDescriptor(i32),

    #[error("range at offset {offset} with size {size} exceeds io buffer of {capacity} bytes")]
    OutOfRange {
        offset: usize,
        size: usize,
        capacity: usize,
    },

    #[error("io buffer allocation of {size} bytes failed")]
    AllocationFailed { size: usize },
}

/// Failures reported by allocators and [`Buffer`](crate::memory::Buffer) operations.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("allocator '{allocator}' is not available")]
    AllocatorUnavailable { allocator: &'static str },

    #[error("allocator '{allocator}' failed to allocate {size} bytes")]
    AllocationFailed { allocator: &'static str, size: usize },

    #[error("buffer has no allocator")]
    NoAllocator,

    #[error("buffer wraps memory it does not own")]
    NotOwned,

    #[error("buffer is attached to {networks} network(s)")]
    InUse { networks: usize },

    #[error("buffer is referenced by {views} sub-range view(s)")]
    HasViews { views: usize },

    #[error("buffer already holds {size} bytes")]
    NotEmpty { size: usize },

    #[error("range at offset {offset} with size {size} exceeds buffer of {available} bytes")]
    InvalidRange {
        offset: usize,
        size: usize,
        available: usize,
    },

    #[error("buffer memory is not mapped for CPU access")]
    NotMapped,

    #[error("cache flush failed: {0}")]
    CacheFlush(String),

    #[error("cache invalidate failed: {0}")]
    CacheInvalidate(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}
