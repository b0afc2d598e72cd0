// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Data buffers shared between the CPU, tensors and predictors.
//!
//! A [`Buffer`] is a cheap, clonable handle; clones refer to the same
//! buffer. The buffer either owns memory obtained from its allocator or
//! wraps memory owned elsewhere (a driver io buffer known by reference id or
//! descriptor, or a window of another buffer). Wrapped memory is never
//! released by the buffer, only the registration it created for it.
//!
//! A buffer records every network it is attached to. While attached it
//! cannot be resized or given another allocator, and dropping the last
//! handle detaches it from those networks first.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, warn};

use crate::errors::MemoryError;
use crate::memory::{heap_allocator, Memory};
use crate::network::{NetworkId, NetworkShared};
use crate::observability::messages::memory::{
    BufferResized, CacheMaintenanceFailed, ResizeRejected,
};
use crate::observability::messages::StructuredLog;
use crate::traits::{Allocator, AttachmentHandle, Driver};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

#[derive(Clone, Copy)]
enum CacheOp {
    Flush,
    Invalidate,
}

/// Driver registration created when wrapping external memory.
struct Registration {
    driver: Arc<dyn Driver>,
    block_id: u32,
}

struct Attachment {
    network: Weak<NetworkShared>,
    handle: AttachmentHandle,
}

struct BufferState {
    memory: Option<Memory>,
    size: usize,
    offset: usize,
    cpu_access: bool,
    allocator: Option<Arc<dyn Allocator>>,
    owns_memory: bool,
    registration: Option<Registration>,
    parent: Option<Buffer>,
    views: usize,
    networks: HashMap<NetworkId, Attachment>,
}

impl BufferState {
    fn new(allocator: Option<Arc<dyn Allocator>>) -> Self {
        Self {
            memory: None,
            size: 0,
            offset: 0,
            cpu_access: true,
            allocator,
            owns_memory: true,
            registration: None,
            parent: None,
            views: 0,
            networks: HashMap::new(),
        }
    }

    fn wraps_external(&self) -> bool {
        self.registration.is_some() || self.parent.is_some()
    }

    fn sync_cache(&self, op: CacheOp) -> Result<(), MemoryError> {
        if !self.cpu_access {
            return Ok(());
        }
        let Some(memory) = self.memory.as_ref() else {
            return Ok(());
        };

        match (&self.allocator, &self.registration, op) {
            (Some(allocator), _, CacheOp::Flush) => allocator.cache_flush(memory, self.size),
            (Some(allocator), _, CacheOp::Invalidate) => {
                allocator.cache_invalidate(memory, self.size)
            }
            (None, Some(registration), CacheOp::Flush) => registration
                .driver
                .end_cpu_access(memory, self.size)
                .map_err(|e| MemoryError::CacheFlush(e.to_string())),
            (None, Some(registration), CacheOp::Invalidate) => registration
                .driver
                .begin_cpu_access(memory, self.size)
                .map_err(|e| MemoryError::CacheInvalidate(e.to_string())),
            (None, None, _) => Err(MemoryError::NoAllocator),
        }
    }
}

struct BufferInner {
    id: BufferId,
    state: Mutex<BufferState>,
}

impl BufferInner {
    fn state(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        let id = self.id;
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);

        for (_, attachment) in state.networks.drain() {
            if let Some(network) = attachment.network.upgrade() {
                network.release_buffer(id, attachment.handle);
            }
        }

        if let Some(memory) = state.memory.take() {
            if state.owns_memory {
                if let Some(allocator) = &state.allocator {
                    allocator.dealloc(&memory);
                }
            }
        }

        if let Some(registration) = state.registration.take() {
            if let Err(e) = registration.driver.destroy_io_buffer(registration.block_id) {
                warn!(buffer = %id, block_id = registration.block_id, error = %e, "failed to release block registration");
            }
        }

        if let Some(parent) = state.parent.take() {
            let mut parent_state = parent.inner.state();
            parent_state.views = parent_state.views.saturating_sub(1);
        }
    }
}

/// Handle to a data buffer. See the [module documentation](self).
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    /// Empty buffer using the process heap allocator.
    pub fn new() -> Self {
        Self::with_allocator(heap_allocator())
    }

    /// Empty buffer using `allocator` for its memory.
    pub fn with_allocator(allocator: Arc<dyn Allocator>) -> Self {
        Self::from_state(BufferState::new(Some(allocator)))
    }

    /// Buffer holding `size` bytes from `allocator`, or the heap when `None`.
    pub fn with_size(
        size: usize,
        allocator: Option<Arc<dyn Allocator>>,
    ) -> Result<Self, MemoryError> {
        let buffer = Self::with_allocator(allocator.unwrap_or_else(heap_allocator));
        buffer.resize(size)?;
        Ok(buffer)
    }

    /// Wrap `size` bytes at `offset` of the io buffer known as `reference_id`.
    ///
    /// The io buffer itself must outlive the returned buffer. CPU access is
    /// disabled since the memory is not mapped in this process.
    pub fn from_reference_id(
        driver: Arc<dyn Driver>,
        reference_id: u32,
        offset: usize,
        size: usize,
    ) -> Result<Self, MemoryError> {
        let memory = driver.create_io_buffer_from_reference(reference_id, offset, size)?;
        Ok(Self::wrap(driver, memory, offset, size))
    }

    /// Wrap `size` bytes at `offset` of the io buffer behind descriptor `fd`.
    pub fn from_fd(
        driver: Arc<dyn Driver>,
        fd: i32,
        offset: usize,
        size: usize,
    ) -> Result<Self, MemoryError> {
        let memory = driver.create_io_buffer_from_fd(fd, offset, size)?;
        Ok(Self::wrap(driver, memory, offset, size))
    }

    /// Window of `size` bytes starting `offset` bytes into `parent`.
    ///
    /// The window shares the parent's memory. While it exists the parent
    /// cannot be resized. When the parent memory is a driver io buffer the
    /// window gets its own block registration, so predictors can attach it.
    pub fn sub_range(parent: &Buffer, offset: usize, size: usize) -> Result<Self, MemoryError> {
        let mut parent_state = parent.inner.state();
        let available = parent_state.size;
        if offset.checked_add(size).map_or(true, |end| end > available) {
            warn!(parent = %parent.id(), offset, size, available, "invalid sub-range");
            return Err(MemoryError::InvalidRange {
                offset,
                size,
                available,
            });
        }

        let absolute = parent_state.offset + offset;
        let view = parent_state.memory.as_ref().map(|m| m.view(offset, size));
        let driver = parent_state
            .registration
            .as_ref()
            .map(|r| r.driver.clone())
            .or_else(|| parent_state.allocator.as_ref().and_then(|a| a.driver()));

        let mut state = BufferState::new(parent_state.allocator.clone());
        state.size = size;
        state.offset = absolute;
        state.owns_memory = false;
        state.parent = Some(parent.clone());

        match (view, driver) {
            (Some(view), Some(driver)) if view.reference_id() != 0 && size > 0 => {
                let block =
                    driver.create_io_buffer_from_reference(view.reference_id(), absolute, size)?;
                state.registration = Some(Registration {
                    driver,
                    block_id: block.block_id(),
                });
                state.cpu_access = parent_state.cpu_access && view.address().is_some();
                state.memory = Some(block.with_address(view.address()));
            }
            (view, _) => {
                state.cpu_access = parent_state.cpu_access
                    && view.as_ref().is_some_and(|v| v.address().is_some());
                state.memory = view;
            }
        }

        parent_state.views += 1;
        drop(parent_state);
        Ok(Self::from_state(state))
    }

    fn wrap(driver: Arc<dyn Driver>, memory: Memory, offset: usize, size: usize) -> Self {
        let mut state = BufferState::new(None);
        state.registration = Some(Registration {
            driver,
            block_id: memory.block_id(),
        });
        state.cpu_access = memory.address().is_some();
        state.memory = Some(memory);
        state.size = size;
        state.offset = offset;
        state.owns_memory = false;
        Self::from_state(state)
    }

    fn from_state(state: BufferState) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                id: BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed)),
                state: Mutex::new(state),
            }),
        }
    }

    pub fn id(&self) -> BufferId {
        self.inner.id
    }

    /// Whether both handles refer to the same buffer.
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn size(&self) -> usize {
        self.inner.state().size
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Byte offset inside the referenced memory (non-zero for windows).
    pub fn offset(&self) -> usize {
        self.inner.state().offset
    }

    pub fn cpu_access(&self) -> bool {
        self.inner.state().cpu_access
    }

    /// CPU address of the first byte, `None` when not mapped.
    pub fn address(&self) -> Option<NonNull<u8>> {
        self.inner.state().memory.as_ref().and_then(Memory::address)
    }

    /// Reference id usable by other contexts, 0 when the memory has none.
    pub fn reference_id(&self) -> u32 {
        self.memory_field(Memory::reference_id)
    }

    /// Block id usable by hardware predictors, 0 when the memory has none.
    pub fn block_id(&self) -> u32 {
        self.memory_field(Memory::block_id)
    }

    /// Sharable OS descriptor of the memory.
    pub fn fd(&self) -> Option<i32> {
        self.inner.state().memory.as_ref().and_then(Memory::fd)
    }

    pub fn allocator(&self) -> Option<Arc<dyn Allocator>> {
        self.inner.state().allocator.clone()
    }

    /// Number of networks this buffer is attached to.
    pub fn network_count(&self) -> usize {
        self.inner.state().networks.len()
    }

    fn memory_field(&self, field: fn(&Memory) -> u32) -> u32 {
        self.inner.state().memory.as_ref().map_or(0, field)
    }

    /// Resize the buffer, discarding its content.
    ///
    /// Afterwards the size is either `size` or, on failure, 0. Rejected while
    /// the buffer is attached to a network or has sub-range views, and for
    /// buffers wrapping memory they do not own.
    pub fn resize(&self, size: usize) -> Result<(), MemoryError> {
        let mut state = self.inner.state();
        if size == state.size {
            return Ok(());
        }

        let rejection = if !state.networks.is_empty() {
            Some(MemoryError::InUse {
                networks: state.networks.len(),
            })
        } else if state.views > 0 {
            Some(MemoryError::HasViews { views: state.views })
        } else if state.wraps_external() {
            Some(MemoryError::NotOwned)
        } else {
            None
        };
        if let Some(error) = rejection {
            ResizeRejected {
                buffer: self.id(),
                current: state.size,
                requested: size,
                error: &error,
            }
            .log();
            return Err(error);
        }

        let allocator = state.allocator.clone().ok_or(MemoryError::NoAllocator)?;
        if !allocator.available() {
            return Err(MemoryError::AllocatorUnavailable {
                allocator: allocator.name(),
            });
        }

        if let Some(memory) = state.memory.take() {
            allocator.dealloc(&memory);
        }
        let previous = state.size;
        state.size = 0;

        if size > 0 {
            state.memory = Some(allocator.alloc(size)?);
            state.size = size;
        }

        BufferResized {
            buffer: self.id(),
            allocator: allocator.name(),
            previous,
            size,
        }
        .log();
        Ok(())
    }

    /// Replace the content with `data`, resizing first if needed.
    pub fn assign(&self, data: &[u8]) -> Result<(), MemoryError> {
        self.resize(data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        let mut bytes = self.data().ok_or(MemoryError::NotMapped)?;
        bytes.copy_from_slice(data);
        Ok(())
    }

    /// Mapped content of the buffer.
    ///
    /// The buffer stays locked while the returned guard lives, so calling
    /// other methods on the same buffer from the same thread must wait until
    /// the guard is dropped. Returns `None` for empty or unmapped buffers.
    pub fn data(&self) -> Option<BufferData<'_>> {
        let state = self.inner.state();
        let address = state.memory.as_ref().and_then(Memory::address)?;
        let len = state.size;
        if len == 0 {
            return None;
        }
        Some(BufferData {
            _state: state,
            address,
            len,
        })
    }

    /// Copy of the mapped content.
    pub fn to_vec(&self) -> Option<Vec<u8>> {
        self.data().map(|bytes| bytes.to_vec())
    }

    /// Enable or disable CPU access, returning the previous setting.
    ///
    /// Disabling flushes pending CPU writes before the flag changes;
    /// enabling invalidates the cache after it changes. Setting the current
    /// value again does nothing.
    pub fn allow_cpu_access(&self, allow: bool) -> bool {
        let mut state = self.inner.state();
        let previous = state.cpu_access;
        if previous && !allow {
            if let Err(e) = state.sync_cache(CacheOp::Flush) {
                CacheMaintenanceFailed {
                    buffer: self.id(),
                    operation: "flush",
                    error: &e,
                }
                .log();
            }
            state.cpu_access = false;
        } else if !previous && allow {
            state.cpu_access = true;
            if let Err(e) = state.sync_cache(CacheOp::Invalidate) {
                CacheMaintenanceFailed {
                    buffer: self.id(),
                    operation: "invalidate",
                    error: &e,
                }
                .log();
            }
        }
        previous
    }

    /// Use `allocator` for future allocations. Only valid while empty.
    pub fn set_allocator(&self, allocator: Arc<dyn Allocator>) -> Result<(), MemoryError> {
        let mut state = self.inner.state();
        if state.size != 0 {
            return Err(MemoryError::NotEmpty { size: state.size });
        }
        if !state.networks.is_empty() {
            return Err(MemoryError::InUse {
                networks: state.networks.len(),
            });
        }
        if state.wraps_external() {
            return Err(MemoryError::NotOwned);
        }
        state.allocator = Some(allocator);
        Ok(())
    }

    /// Publish CPU writes to hardware. No-op while CPU access is disabled.
    pub fn cache_flush(&self) -> Result<(), MemoryError> {
        self.inner.state().sync_cache(CacheOp::Flush)
    }

    /// Discard cached data so CPU reads observe hardware writes.
    /// No-op while CPU access is disabled.
    pub fn cache_invalidate(&self) -> Result<(), MemoryError> {
        self.inner.state().sync_cache(CacheOp::Invalidate)
    }

    pub(crate) fn attachment(&self, network: NetworkId) -> Option<AttachmentHandle> {
        self.inner
            .state()
            .networks
            .get(&network)
            .map(|attachment| attachment.handle)
    }

    pub(crate) fn register_network(&self, network: &Arc<NetworkShared>, handle: AttachmentHandle) {
        let mut state = self.inner.state();
        let id = network.id();
        if state.networks.contains_key(&id) {
            warn!(buffer = %self.id(), network = %id, "buffer already registered with network");
            return;
        }
        state.networks.insert(
            id,
            Attachment {
                network: Arc::downgrade(network),
                handle,
            },
        );
        debug!(buffer = %self.id(), network = %id, handle = %handle, "buffer registered");
    }

    pub(crate) fn unregister_network(&self, network: NetworkId) -> Option<AttachmentHandle> {
        self.inner
            .state()
            .networks
            .remove(&network)
            .map(|attachment| attachment.handle)
    }

    /// Non-owning handle that does not keep the buffer alive.
    pub fn downgrade(&self) -> WeakBuffer {
        WeakBuffer {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning handle to a [`Buffer`].
///
/// Backends keep the buffers set on their ports this way, so dropping the
/// last [`Buffer`] handle still detaches it from every network.
#[derive(Clone)]
pub struct WeakBuffer {
    inner: Weak<BufferInner>,
}

impl WeakBuffer {
    pub fn upgrade(&self) -> Option<Buffer> {
        self.inner.upgrade().map(|inner| Buffer { inner })
    }

    pub fn ptr_eq(&self, buffer: &Buffer) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Arc::as_ptr(&buffer.inner))
    }
}

impl fmt::Debug for WeakBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(buffer) => write!(f, "WeakBuffer({})", buffer.id()),
            None => f.write_str("WeakBuffer(dropped)"),
        }
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Buffer {}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("Buffer")
            .field("id", &self.inner.id)
            .field("size", &state.size)
            .field("offset", &state.offset)
            .field("cpu_access", &state.cpu_access)
            .field("networks", &state.networks.len())
            .finish()
    }
}

/// Locked view of a buffer's bytes. See [`Buffer::data`].
pub struct BufferData<'a> {
    _state: MutexGuard<'a, BufferState>,
    address: NonNull<u8>,
    len: usize,
}

impl Deref for BufferData<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the memory is at least `len` bytes and cannot be released
        // or resized while the state lock is held.
        unsafe { std::slice::from_raw_parts(self.address.as_ptr(), self.len) }
    }
}

impl DerefMut for BufferData<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; the lock gives this guard exclusive access
        // through this buffer handle.
        unsafe { std::slice::from_raw_parts_mut(self.address.as_ptr(), self.len) }
    }
}
