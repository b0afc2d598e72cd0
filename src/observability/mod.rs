// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Structured logging for the runtime.
//!
//! Every operational event is a small struct implementing `Display` and
//! [`StructuredLog`](messages::StructuredLog). Call sites build the message
//! and call `log()`, which emits it at the right level with its fields
//! attached, so wording lives in one place.
//!
//! # Architecture
//!
//! Messages are organized by subsystem:
//! * `messages::memory` - buffer allocation and cache maintenance
//! * `messages::network` - model loading and single network inference
//! * `messages::bundle` - bundle loading and subgraph scheduling
//!
//! # Usage
//!
//! ```rust
//! use npu_runtime::observability::messages::bundle::SubgraphFailed;
//! use npu_runtime::observability::messages::StructuredLog;
//!
//! let error = std::io::Error::new(std::io::ErrorKind::Other, "device lost");
//! SubgraphFailed {
//!     index: 2,
//!     error: &error,
//! }
//! .log();
//! ```
//!
//! The subscriber is installed by the binary; the library only emits events.

pub mod messages;
