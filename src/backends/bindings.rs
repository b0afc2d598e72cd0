// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Attachment bookkeeping shared by CPU backends.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::errors::PredictorError;
use crate::memory::{Buffer, WeakBuffer};
use crate::tensor::Direction;
use crate::traits::AttachmentHandle;

struct Bound {
    handle: AttachmentHandle,
    buffer: WeakBuffer,
}

#[derive(Default)]
struct Slots {
    attached: HashSet<AttachmentHandle>,
    inputs: Vec<Option<Bound>>,
    outputs: Vec<Option<Bound>>,
}

impl Slots {
    fn ports(&mut self, direction: Direction) -> &mut Vec<Option<Bound>> {
        match direction {
            Direction::Input => &mut self.inputs,
            Direction::Output => &mut self.outputs,
        }
    }
}

/// Handles issued to a predictor and the buffer currently set on each port.
///
/// Ports hold buffers weakly: a predictor never keeps a buffer alive, so
/// dropping the last handle still detaches it from the network.
pub struct BufferBindings {
    next_handle: AtomicU32,
    slots: Mutex<Slots>,
}

impl BufferBindings {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU32::new(1),
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Reset to `inputs` and `outputs` empty ports.
    pub fn reset(&self, inputs: usize, outputs: usize) {
        *self.slots() = Slots {
            attached: HashSet::new(),
            inputs: (0..inputs).map(|_| None).collect(),
            outputs: (0..outputs).map(|_| None).collect(),
        };
    }

    pub fn port_count(&self, direction: Direction) -> usize {
        self.slots().ports(direction).len()
    }

    pub fn attach(&self, index: usize, direction: Direction) -> Result<AttachmentHandle, PredictorError> {
        let mut slots = self.slots();
        if index >= slots.ports(direction).len() {
            return Err(PredictorError::InvalidPort {
                direction: direction.as_str(),
                index,
            });
        }
        let handle = loop {
            if let Some(handle) = AttachmentHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed)) {
                break handle;
            }
        };
        slots.attached.insert(handle);
        Ok(handle)
    }

    pub fn set(
        &self,
        buffer: &Buffer,
        index: usize,
        direction: Direction,
        handle: AttachmentHandle,
    ) -> Result<(), PredictorError> {
        let mut slots = self.slots();
        if !slots.attached.contains(&handle) {
            return Err(PredictorError::UnknownAttachment(handle.get()));
        }
        let slot = slots
            .ports(direction)
            .get_mut(index)
            .ok_or(PredictorError::InvalidPort {
                direction: direction.as_str(),
                index,
            })?;
        *slot = Some(Bound {
            handle,
            buffer: buffer.downgrade(),
        });
        Ok(())
    }

    pub fn detach(&self, handle: AttachmentHandle) -> Result<(), PredictorError> {
        let mut slots = self.slots();
        if !slots.attached.remove(&handle) {
            return Err(PredictorError::UnknownAttachment(handle.get()));
        }
        let Slots { inputs, outputs, .. } = &mut *slots;
        for slot in inputs.iter_mut().chain(outputs.iter_mut()) {
            if slot.as_ref().is_some_and(|bound| bound.handle == handle) {
                *slot = None;
            }
        }
        Ok(())
    }

    /// Buffer set on a port, if it is still alive.
    pub fn buffer(&self, index: usize, direction: Direction) -> Option<Buffer> {
        self.slots()
            .ports(direction)
            .get(index)
            .and_then(|slot| slot.as_ref())
            .and_then(|bound| bound.buffer.upgrade())
    }

    pub fn attached_count(&self) -> usize {
        self.slots().attached.len()
    }

    /// Concatenation of all input buffers in port order.
    pub fn read_inputs(&self) -> Result<Vec<u8>, PredictorError> {
        let mut stream = Vec::new();
        for index in 0..self.port_count(Direction::Input) {
            let buffer = self.required(index, Direction::Input)?;
            let bytes = buffer
                .to_vec()
                .ok_or_else(|| PredictorError::Execution(format!("input {index} is not mapped")))?;
            stream.extend_from_slice(&bytes);
        }
        Ok(stream)
    }

    /// Spread `bytes` over the output buffers in port order, zero filling
    /// whatever the stream does not cover.
    pub fn write_outputs(&self, bytes: &[u8]) -> Result<(), PredictorError> {
        let mut rest = bytes;
        for index in 0..self.port_count(Direction::Output) {
            let buffer = self.required(index, Direction::Output)?;
            let mut data = buffer
                .data()
                .ok_or_else(|| PredictorError::Execution(format!("output {index} is not mapped")))?;
            let n = rest.len().min(data.len());
            data[..n].copy_from_slice(&rest[..n]);
            data[n..].fill(0);
            rest = &rest[n..];
        }
        Ok(())
    }

    fn required(&self, index: usize, direction: Direction) -> Result<Buffer, PredictorError> {
        self.buffer(index, direction)
            .ok_or(PredictorError::MissingBuffer {
                direction: direction.as_str(),
                index,
            })
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BufferBindings {
    fn default() -> Self {
        Self::new()
    }
}
