// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::errors::MemoryError;
use crate::memory::Buffer;
use crate::traits::Driver;

/// Buffers wrapping externally owned io buffers, keyed by a caller id.
///
/// Used when frames arrive in a small rotating set of io buffers (for
/// example from a video decoder): each distinct (id, offset) is wrapped once
/// and the same [`Buffer`] is handed out afterwards, so it stays attached to
/// the network instead of being attached and detached on every frame.
pub struct BufferCache<Id> {
    driver: Arc<dyn Driver>,
    buffers: HashMap<(Id, usize), Buffer>,
}

impl<Id: Eq + Hash + Clone> BufferCache<Id> {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            buffers: HashMap::new(),
        }
    }

    pub fn get(&self, id: &Id, offset: usize) -> Option<&Buffer> {
        self.buffers.get(&(id.clone(), offset))
    }

    /// Wrap `size` bytes at `offset` of the io buffer `reference_id`,
    /// replacing any buffer cached for the same key.
    pub fn add(
        &mut self,
        id: Id,
        reference_id: u32,
        size: usize,
        offset: usize,
    ) -> Result<&Buffer, MemoryError> {
        let buffer = Buffer::from_reference_id(self.driver.clone(), reference_id, offset, size)?;
        match self.buffers.entry((id, offset)) {
            Entry::Occupied(mut entry) => {
                entry.insert(buffer);
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => Ok(entry.insert(buffer)),
        }
    }

    /// Cached buffer for (id, offset), wrapping it first if needed.
    pub fn get_or_add(
        &mut self,
        id: Id,
        reference_id: u32,
        size: usize,
        offset: usize,
    ) -> Result<&Buffer, MemoryError> {
        match self.buffers.entry((id, offset)) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let buffer =
                    Buffer::from_reference_id(self.driver.clone(), reference_id, offset, size)?;
                Ok(entry.insert(buffer))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Id, usize, &Buffer)> {
        self.buffers
            .iter()
            .map(|((id, offset), buffer)| (id, *offset, buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::EmulatedDevice;

    #[test]
    fn test_get_or_add_wraps_each_key_once() {
        let device = EmulatedDevice::new();
        let driver: Arc<dyn Driver> = Arc::new(device.open());
        let frame = driver.allocate_io_buffer(8192).unwrap();

        let mut cache = BufferCache::new(driver.clone());
        assert!(cache.get(&"frame0", 0).is_none());

        let first = cache
            .get_or_add("frame0", frame.reference_id(), 4096, 0)
            .unwrap()
            .clone();
        let again = cache
            .get_or_add("frame0", frame.reference_id(), 4096, 0)
            .unwrap()
            .clone();
        assert!(first.ptr_eq(&again));

        cache
            .get_or_add("frame0", frame.reference_id(), 4096, 4096)
            .unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(device.block_count(), 3);

        drop((first, again));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(device.block_count(), 1);
    }

    #[test]
    fn test_add_replaces_existing_entry() {
        let driver: Arc<dyn Driver> = Arc::new(EmulatedDevice::new().open());
        let frame = driver.allocate_io_buffer(4096).unwrap();
        let mut cache = BufferCache::new(driver);

        let first = cache.add(1u32, frame.reference_id(), 256, 0).unwrap().clone();
        let second = cache.add(1u32, frame.reference_id(), 512, 0).unwrap().clone();
        assert!(!first.ptr_eq(&second));
        assert_eq!(cache.get(&1, 0).map(Buffer::size), Some(512));
        assert_eq!(cache.iter().count(), 1);
    }

    #[test]
    fn test_unknown_reference_is_reported() {
        let driver: Arc<dyn Driver> = Arc::new(EmulatedDevice::new().open());
        let mut cache = BufferCache::<u32>::new(driver);
        assert!(cache.get_or_add(1, 999, 64, 0).is_err());
        assert!(cache.is_empty());
    }
}
