// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for structured logging.
//!
//! # Organization
//!
//! * `memory` - buffer allocation and cache maintenance events
//! * `network` - model loading and inference on a single network
//! * `bundle` - bundle loading and subgraph scheduling events
//!
//! # Usage Pattern
//!
//! ```rust
//! use npu_runtime::observability::messages::bundle::BundleInferenceStarted;
//!
//! let msg = BundleInferenceStarted {
//!     mode: "parallel",
//!     subgraph_count: 3,
//!     parallel_limit: 2,
//! };
//!
//! tracing::info!("{}", msg);
//! ```

pub mod bundle;
pub mod memory;
pub mod network;

use tracing::Span;

/// A message that knows its own log level and structured fields.
pub trait StructuredLog: std::fmt::Display {
    /// Emit the message as an event with its fields attached.
    fn log(&self);

    /// Span carrying the same fields, for wrapping the work the message describes.
    fn span(&self, name: &str) -> Span;
}
