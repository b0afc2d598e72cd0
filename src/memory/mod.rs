// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Memory blocks, allocators and the [`Buffer`] type.
//!
//! Allocators produce [`Memory`] descriptors. A [`Buffer`] owns or borrows
//! one descriptor, tracks which networks currently use it and keeps the CPU
//! cache coherent with hardware access through its allocator.

pub mod buffer;
pub mod cache;
pub mod device;
pub mod heap;

pub use buffer::{Buffer, BufferData, BufferId, WeakBuffer};
pub use cache::BufferCache;
pub use device::DeviceAllocator;
pub use heap::{heap_allocator, HeapAllocator};

use std::ptr::NonNull;

/// Hardware page size; default alignment of every allocation.
pub const PAGE_ALIGNMENT: usize = 4096;

/// Round `value` up to the hardware page size.
pub fn align(value: usize) -> usize {
    align_to(value, PAGE_ALIGNMENT)
}

/// Round `value` up to a multiple of `alignment`.
pub fn align_to(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Descriptor of a memory block produced by an [`Allocator`](crate::traits::Allocator).
///
/// The descriptor does not own the block; the allocator that produced it
/// releases it through [`Allocator::dealloc`](crate::traits::Allocator::dealloc).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    address: Option<NonNull<u8>>,
    handle: u64,
    fd: Option<i32>,
    block_id: u32,
    reference_id: u32,
    size: usize,
}

// SAFETY: the descriptor only carries the address; every access to the
// pointed-to bytes goes through a `Buffer`, which serializes it.
unsafe impl Send for Memory {}
unsafe impl Sync for Memory {}

impl Memory {
    /// Descriptor for `size` bytes with no mapping and no identifiers.
    pub fn new(size: usize) -> Self {
        Self {
            address: None,
            handle: 0,
            fd: None,
            block_id: 0,
            reference_id: 0,
            size,
        }
    }

    pub fn with_address(mut self, address: Option<NonNull<u8>>) -> Self {
        self.address = address;
        self
    }

    pub fn with_handle(mut self, handle: u64) -> Self {
        self.handle = handle;
        self
    }

    pub fn with_fd(mut self, fd: Option<i32>) -> Self {
        self.fd = fd;
        self
    }

    pub fn with_block_id(mut self, block_id: u32) -> Self {
        self.block_id = block_id;
        self
    }

    pub fn with_reference_id(mut self, reference_id: u32) -> Self {
        self.reference_id = reference_id;
        self
    }

    /// CPU address, or `None` when the block is not mapped in this process.
    pub fn address(&self) -> Option<NonNull<u8>> {
        self.address
    }

    /// Allocator-specific handle.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// OS-level sharable descriptor.
    pub fn fd(&self) -> Option<i32> {
        self.fd
    }

    /// Identifier used to attach the block to a predictor (0 if none).
    pub fn block_id(&self) -> u32 {
        self.block_id
    }

    /// Identifier used to hand the block to an isolated context (0 if none).
    pub fn reference_id(&self) -> u32 {
        self.reference_id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Descriptor for `size` bytes starting `offset` bytes into this block.
    pub(crate) fn view(&self, offset: usize, size: usize) -> Memory {
        Memory {
            address: self
                .address
                .and_then(|base| NonNull::new(base.as_ptr().wrapping_add(offset))),
            size,
            ..self.clone()
        }
    }
}
