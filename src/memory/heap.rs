// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

use crate::errors::MemoryError;
use crate::memory::{align_to, Memory};
use crate::traits::Allocator;

/// Allocator backed by the process heap.
///
/// Blocks are zero-initialized and aligned; the alignment is stored in the
/// descriptor handle so the block can be released with the same layout.
/// Cache maintenance is a no-op since only the CPU touches this memory.
#[derive(Debug, Default)]
pub struct HeapAllocator;

impl HeapAllocator {
    pub fn new() -> Self {
        Self
    }

    fn layout(size: usize, alignment: usize) -> Option<Layout> {
        let alignment = alignment.max(1);
        Layout::from_size_align(align_to(size, alignment), alignment).ok()
    }
}

impl Allocator for HeapAllocator {
    fn name(&self) -> &'static str {
        "heap"
    }

    fn alloc_aligned(&self, size: usize, alignment: usize) -> Result<Memory, MemoryError> {
        let failed = MemoryError::AllocationFailed {
            allocator: self.name(),
            size,
        };
        if size == 0 {
            return Err(failed);
        }
        let layout = Self::layout(size, alignment).ok_or(failed)?;

        // SAFETY: layout has a non-zero size.
        let address = NonNull::new(unsafe { alloc::alloc_zeroed(layout) });
        if address.is_none() {
            return Err(MemoryError::AllocationFailed {
                allocator: self.name(),
                size,
            });
        }

        Ok(Memory::new(layout.size())
            .with_address(address)
            .with_handle(layout.align() as u64))
    }

    fn dealloc(&self, memory: &Memory) {
        let Some(address) = memory.address() else {
            return;
        };
        let Some(layout) = Self::layout(memory.size(), memory.handle() as usize) else {
            tracing::error!(size = memory.size(), "heap block has an invalid layout, leaking it");
            return;
        };
        // SAFETY: the block was produced by `alloc_aligned` with this layout.
        unsafe { alloc::dealloc(address.as_ptr(), layout) };
    }

    fn cache_flush(&self, _memory: &Memory, _size: usize) -> Result<(), MemoryError> {
        Ok(())
    }

    fn cache_invalidate(&self, _memory: &Memory, _size: usize) -> Result<(), MemoryError> {
        Ok(())
    }
}

/// Process-wide heap allocator used when no allocator is specified.
pub fn heap_allocator() -> Arc<dyn Allocator> {
    static HEAP: OnceLock<Arc<HeapAllocator>> = OnceLock::new();
    HEAP.get_or_init(|| Arc::new(HeapAllocator::new())).clone()
}
