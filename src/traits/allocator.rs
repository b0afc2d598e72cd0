// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt::Debug;
use std::sync::Arc;

use crate::errors::MemoryError;
use crate::memory::{Memory, PAGE_ALIGNMENT};
use crate::traits::Driver;

/// Pluggable provider of page-aligned memory blocks.
///
/// Implementations hand out [`Memory`] descriptors and keep the cache of the
/// blocks they produced coherent with hardware readers and writers. An
/// allocator whose backing resource cannot currently be used reports
/// `available() == false`; callers treat that as a hard failure.
pub trait Allocator: Send + Sync + Debug {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &'static str;

    fn available(&self) -> bool {
        true
    }

    /// Allocate at least `size` bytes aligned to `alignment`.
    fn alloc_aligned(&self, size: usize, alignment: usize) -> Result<Memory, MemoryError>;

    /// Allocate at least `size` bytes aligned to the hardware page size.
    fn alloc(&self, size: usize) -> Result<Memory, MemoryError> {
        self.alloc_aligned(size, PAGE_ALIGNMENT)
    }

    /// Release a block previously returned by this allocator.
    fn dealloc(&self, memory: &Memory);

    /// Make CPU writes to the first `size` bytes visible to hardware readers.
    fn cache_flush(&self, memory: &Memory, size: usize) -> Result<(), MemoryError>;

    /// Make hardware writes to the first `size` bytes visible to CPU reads.
    fn cache_invalidate(&self, memory: &Memory, size: usize) -> Result<(), MemoryError>;

    /// Driver able to register views of blocks from this allocator, if any.
    fn driver(&self) -> Option<Arc<dyn Driver>> {
        None
    }
}
