// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for model loading and inference on a single network.

use crate::network::NetworkId;
use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::Span;

/// Model loaded and tensors created.
///
/// # Log Level
/// `info!` - Important operational event
pub struct ModelLoaded<'a> {
    pub network: NetworkId,
    pub delegate: &'a str,
    pub predictor: &'static str,
    pub inputs: usize,
    pub outputs: usize,
}

impl Display for ModelLoaded<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Loaded model on {} with {} predictor (delegate '{}'): {} inputs, {} outputs",
            self.network, self.predictor, self.delegate, self.inputs, self.outputs
        )
    }
}

impl StructuredLog for ModelLoaded<'_> {
    fn log(&self) {
        tracing::info!(
            network = %self.network,
            delegate = self.delegate,
            predictor = self.predictor,
            inputs = self.inputs,
            outputs = self.outputs,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "model_loaded",
            span_name = name,
            network = %self.network,
            predictor = self.predictor,
        )
    }
}

/// Model could not be loaded; the network is left without a model.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct ModelLoadFailed<'a> {
    pub network: NetworkId,
    pub delegate: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for ModelLoadFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Failed to load model on {} (delegate '{}'): {}",
            self.network, self.delegate, self.error
        )
    }
}

impl StructuredLog for ModelLoadFailed<'_> {
    fn log(&self) {
        tracing::error!(
            network = %self.network,
            delegate = self.delegate,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "model_load_failed",
            span_name = name,
            network = %self.network,
            error = %self.error,
        )
    }
}

/// Inference requested on a loaded network.
///
/// # Log Level
/// `trace!` - Emitted on every inference
pub struct InferenceStarted<'a> {
    pub network: NetworkId,
    pub delegate: &'a str,
}

impl Display for InferenceStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Inference on {} with delegate '{}'", self.network, self.delegate)
    }
}

impl StructuredLog for InferenceStarted<'_> {
    fn log(&self) {
        tracing::trace!(network = %self.network, delegate = self.delegate, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "inference",
            span_name = name,
            network = %self.network,
            delegate = self.delegate,
        )
    }
}

/// One inference finished, including cache maintenance.
///
/// # Log Level
/// `debug!` - Emitted on every inference
pub struct InferenceCompleted {
    pub network: NetworkId,
    pub duration: Duration,
}

impl Display for InferenceCompleted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Inference on {} completed in {:?}", self.network, self.duration)
    }
}

impl StructuredLog for InferenceCompleted {
    fn log(&self) {
        tracing::debug!(
            network = %self.network,
            duration_ms = self.duration.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "inference",
            span_name = name,
            network = %self.network,
            duration = ?self.duration,
        )
    }
}

/// Inference failed in the predictor or while preparing buffers.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct InferenceFailed<'a> {
    pub network: NetworkId,
    pub error: &'a dyn std::error::Error,
}

impl Display for InferenceFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Inference on {} failed: {}", self.network, self.error)
    }
}

impl StructuredLog for InferenceFailed<'_> {
    fn log(&self) {
        tracing::error!(
            network = %self.network,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "inference_failed",
            span_name = name,
            network = %self.network,
            error = %self.error,
        )
    }
}
