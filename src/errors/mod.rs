// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Error types for every layer of the runtime.
//!
//! Each fallible operation reports the innermost failure through one of these
//! enums and emits a log record at the point of failure. Nothing is rolled
//! back: a failed bind or inference leaves whatever partial state it reached.

mod config;
mod memory;
mod network;

pub use config::{ConfigError, ValidationError};
pub use memory::{DriverError, MemoryError};
pub use network::{NetworkError, PredictorError, TensorError};
