// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for bundle loading and subgraph scheduling.
//!
//! This module contains message types for logging events related to:
//! * Bundle loading and subgraph interconnection
//! * Inference start and completion for the whole bundle
//! * Per-subgraph outcome (completed, failed, skipped)

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::Span;

/// Bundle loaded and its subgraphs connected.
///
/// # Log Level
/// `info!` - Important operational event
///
/// # Example
/// ```
/// use npu_runtime::observability::messages::bundle::BundleLoaded;
///
/// let msg = BundleLoaded {
///     subgraph_count: 3,
///     inputs: 1,
///     outputs: 2,
///     parallel_limit: 2,
/// };
///
/// tracing::info!("{}", msg);
/// ```
pub struct BundleLoaded {
    pub subgraph_count: usize,
    pub inputs: usize,
    pub outputs: usize,
    pub parallel_limit: usize,
}

impl Display for BundleLoaded {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Loaded bundle with {} subgraphs: {} inputs, {} outputs, parallel_limit={}",
            self.subgraph_count, self.inputs, self.outputs, self.parallel_limit
        )
    }
}

impl StructuredLog for BundleLoaded {
    fn log(&self) {
        tracing::info!(
            subgraph_count = self.subgraph_count,
            inputs = self.inputs,
            outputs = self.outputs,
            parallel_limit = self.parallel_limit,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "bundle_loaded",
            span_name = name,
            subgraph_count = self.subgraph_count,
            parallel_limit = self.parallel_limit,
        )
    }
}

/// Bundle inference started.
///
/// # Log Level
/// `debug!` - Emitted on every inference
///
/// # Example
/// ```
/// use npu_runtime::observability::messages::bundle::BundleInferenceStarted;
///
/// let msg = BundleInferenceStarted {
///     mode: "sequential",
///     subgraph_count: 4,
///     parallel_limit: 1,
/// };
///
/// assert!(msg.to_string().contains("sequential"));
/// ```
pub struct BundleInferenceStarted<'a> {
    pub mode: &'a str,
    pub subgraph_count: usize,
    pub parallel_limit: usize,
}

impl Display for BundleInferenceStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Starting bundle {} inference: {} subgraphs, parallel_limit={}",
            self.mode, self.subgraph_count, self.parallel_limit
        )
    }
}

impl StructuredLog for BundleInferenceStarted<'_> {
    fn log(&self) {
        tracing::debug!(
            mode = self.mode,
            subgraph_count = self.subgraph_count,
            parallel_limit = self.parallel_limit,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "bundle_inference",
            span_name = name,
            mode = self.mode,
            subgraph_count = self.subgraph_count,
            parallel_limit = self.parallel_limit,
        )
    }
}

/// Bundle inference finished, successfully or not.
///
/// # Log Level
/// `debug!` on success, `error!` when any subgraph failed
pub struct BundleInferenceCompleted<'a> {
    pub duration: Duration,
    pub failed: &'a [usize],
}

impl Display for BundleInferenceCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if self.failed.is_empty() {
            write!(f, "Bundle inference completed in {:?}", self.duration)
        } else {
            write!(
                f,
                "Bundle inference completed in {:?} with failed subgraphs {:?}",
                self.duration, self.failed
            )
        }
    }
}

impl StructuredLog for BundleInferenceCompleted<'_> {
    fn log(&self) {
        if self.failed.is_empty() {
            tracing::debug!(duration_ms = self.duration.as_millis() as u64, "{}", self);
        } else {
            tracing::error!(
                duration_ms = self.duration.as_millis() as u64,
                failed = ?self.failed,
                "{}", self
            );
        }
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "bundle_inference_completed",
            span_name = name,
            duration = ?self.duration,
            failed = ?self.failed,
        )
    }
}

/// One subgraph is about to run its predictor.
///
/// # Log Level
/// `debug!` - Emitted for every subgraph on every inference
pub struct SubgraphStarted<'a> {
    pub index: usize,
    pub dependencies: &'a [usize],
}

impl Display for SubgraphStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Running subgraph {} (dependencies: {:?})",
            self.index, self.dependencies
        )
    }
}

impl StructuredLog for SubgraphStarted<'_> {
    fn log(&self) {
        tracing::debug!(
            subgraph = self.index,
            dependencies = ?self.dependencies,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "subgraph",
            span_name = name,
            subgraph = self.index,
            dependencies = ?self.dependencies,
        )
    }
}

/// One subgraph finished its inference.
///
/// # Log Level
/// `debug!` - Emitted for every subgraph on every inference
pub struct SubgraphCompleted {
    pub index: usize,
    pub duration: Duration,
}

impl Display for SubgraphCompleted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Subgraph {} completed in {:?}", self.index, self.duration)
    }
}

impl StructuredLog for SubgraphCompleted {
    fn log(&self) {
        tracing::debug!(
            subgraph = self.index,
            duration_ms = self.duration.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("subgraph_completed", span_name = name, subgraph = self.index)
    }
}

/// One subgraph's inference failed.
///
/// # Log Level
/// `error!` - Failure requiring attention
///
/// # Example
/// ```
/// use npu_runtime::observability::messages::bundle::SubgraphFailed;
///
/// let error = std::io::Error::new(std::io::ErrorKind::Other, "test error");
/// let msg = SubgraphFailed { index: 1, error: &error };
///
/// tracing::error!("{}", msg);
/// ```
pub struct SubgraphFailed<'a> {
    pub index: usize,
    pub error: &'a dyn std::error::Error,
}

impl Display for SubgraphFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Inference for subgraph {} failed: {}", self.index, self.error)
    }
}

impl StructuredLog for SubgraphFailed<'_> {
    fn log(&self) {
        tracing::error!(
            subgraph = self.index,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "subgraph_failed",
            span_name = name,
            subgraph = self.index,
            error = %self.error,
        )
    }
}

/// A subgraph did not run because a dependency failed.
///
/// # Log Level
/// `warn!` - Consequence of an earlier failure
pub struct SubgraphSkipped {
    pub index: usize,
    pub dependency: usize,
}

impl Display for SubgraphSkipped {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Skipping subgraph {}: dependency {} did not succeed",
            self.index, self.dependency
        )
    }
}

impl StructuredLog for SubgraphSkipped {
    fn log(&self) {
        tracing::warn!(subgraph = self.index, dependency = self.dependency, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "subgraph_skipped",
            span_name = name,
            subgraph = self.index,
            dependency = self.dependency,
        )
    }
}
