// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;
use std::num::NonZeroU32;

use async_trait::async_trait;

use crate::errors::PredictorError;
use crate::memory::Buffer;
use crate::tensor::{Direction, NetworkMetadata, Tensor};

/// Opaque token a backend returns when a buffer is first used on a network.
///
/// Handles are never zero; a backend that cannot attach a buffer reports an
/// error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentHandle(NonZeroU32);

impl AttachmentHandle {
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for AttachmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contract every inference backend implements.
///
/// A [`Network`](crate::network::Network) owns exactly one predictor per
/// loaded model. `load_model` runs while the network still owns the predictor
/// exclusively; afterwards the predictor is shared and all calls take `&self`.
///
/// Call order guaranteed by the network:
/// * `attach_buffer` once per (buffer, network) pair, on first use
/// * `set_buffer` every time the current buffer of a tensor changes,
///   including right after `attach_buffer`
/// * `detach_buffer` once, when either the buffer or the network goes away
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Parse and prepare the model. May fill in defaults in `metadata`.
    fn load_model(
        &mut self,
        model: &[u8],
        metadata: &mut NetworkMetadata,
    ) -> Result<(), PredictorError>;

    /// Run one inference with the currently set buffers.
    async fn predict(&self) -> Result<(), PredictorError>;

    fn attach_buffer(
        &self,
        buffer: &Buffer,
        index: usize,
        direction: Direction,
    ) -> Result<AttachmentHandle, PredictorError>;

    fn set_buffer(
        &self,
        buffer: &Buffer,
        index: usize,
        direction: Direction,
        handle: AttachmentHandle,
    ) -> Result<(), PredictorError>;

    fn detach_buffer(&self, handle: AttachmentHandle) -> Result<(), PredictorError>;

    /// Supply a backend-specific tensor for a port instead of the default one.
    fn get_tensor(&self, _index: usize, _direction: Direction) -> Option<Tensor> {
        None
    }

    /// Whether the backend reads or writes buffers through the CPU.
    ///
    /// Buffers exchanged only between backends that return `false` can skip
    /// cache maintenance.
    fn requires_cpu_access(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}
