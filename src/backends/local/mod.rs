// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! In-process reference predictor.
//!
//! Runs a byte-level [`Kernel`] over the concatenation of all inputs and
//! spreads the result over the outputs. Useful to exercise the whole
//! buffer and network contract without NPU hardware.

pub mod kernels;

pub use kernels::Kernel;

use async_trait::async_trait;
use std::time::Instant;
use tracing::debug;

use crate::backends::BufferBindings;
use crate::errors::PredictorError;
use crate::memory::Buffer;
use crate::tensor::{Direction, NetworkMetadata};
use crate::traits::{AttachmentHandle, Predictor};

/// Delegate name the local predictor is registered under.
pub const LOCAL_DELEGATE: &str = "local";

pub struct LocalPredictor {
    kernel: Option<Kernel>,
    bindings: BufferBindings,
}

impl LocalPredictor {
    pub fn new() -> Self {
        Self {
            kernel: None,
            bindings: BufferBindings::new(),
        }
    }

    /// Kernel of the loaded model.
    pub fn kernel(&self) -> Option<Kernel> {
        self.kernel
    }
}

impl Default for LocalPredictor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Predictor for LocalPredictor {
    fn load_model(
        &mut self,
        model: &[u8],
        metadata: &mut NetworkMetadata,
    ) -> Result<(), PredictorError> {
        let program = std::str::from_utf8(model)
            .map_err(|e| PredictorError::InvalidModel(format!("local model is not text: {e}")))?;
        let kernel = Kernel::parse(program)?;
        if metadata.inputs.is_empty() || metadata.outputs.is_empty() {
            return Err(PredictorError::InvalidModel(
                "local model needs at least one input and one output".to_string(),
            ));
        }

        self.bindings.reset(metadata.inputs.len(), metadata.outputs.len());
        self.kernel = Some(kernel);
        debug!(kernel = kernel.name(), "local model loaded");
        Ok(())
    }

    async fn predict(&self) -> Result<(), PredictorError> {
        let kernel = self.kernel().ok_or(PredictorError::NotLoaded)?;
        let start = Instant::now();

        let mut stream = self.bindings.read_inputs()?;
        kernel.apply(&mut stream)?;
        self.bindings.write_outputs(&stream)?;

        debug!(
            kernel = kernel.name(),
            bytes = stream.len(),
            duration_us = start.elapsed().as_micros() as u64,
            "local kernel executed"
        );
        Ok(())
    }

    fn attach_buffer(
        &self,
        _buffer: &Buffer,
        index: usize,
        direction: Direction,
    ) -> Result<AttachmentHandle, PredictorError> {
        self.bindings.attach(index, direction)
    }

    fn set_buffer(
        &self,
        buffer: &Buffer,
        index: usize,
        direction: Direction,
        handle: AttachmentHandle,
    ) -> Result<(), PredictorError> {
        self.bindings.set(buffer, index, direction, handle)
    }

    fn detach_buffer(&self, handle: AttachmentHandle) -> Result<(), PredictorError> {
        self.bindings.detach(handle)
    }

    fn name(&self) -> &'static str {
        LOCAL_DELEGATE
    }
}
