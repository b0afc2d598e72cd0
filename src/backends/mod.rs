// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Predictor backends.
//!
//! A backend implements [`Predictor`](crate::traits::Predictor) and is
//! registered under a delegate name in the
//! [`PredictorRegistry`](crate::engine::PredictorRegistry). The delegate
//! string of a model's metadata selects the backend; extra `key=value`
//! words in it are backend options.
//!
//! # Available Backends
//!
//! ## Local Backend
//! In-process byte kernels (`identity`, `add N`, `xor N`, `fail`) that
//! exercise the full buffer contract without hardware.
//!
//! ## Bundle
//! The bundle predictor lives in [`engine::bundle`](crate::engine::bundle)
//! since it drives other networks rather than hardware.
//!
//! ## Stub Backend (Test-Only)
//! Configurable predictor recording call order and concurrency, only
//! available in test builds.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use npu_runtime::engine::RuntimeContext;
//! use npu_runtime::network::Network;
//!
//! let network = Network::new(Arc::new(RuntimeContext::default()));
//! let meta = r#"{
//!     "delegate": "local",
//!     "inputs": [{"name": "in", "dtype": "uint8", "shape": [4]}],
//!     "outputs": [{"name": "out", "dtype": "uint8", "shape": [4]}]
//! }"#;
//! network.load_model(b"xor 255", Some(meta))?;
//! # Ok::<(), npu_runtime::errors::NetworkError>(())
//! ```

pub mod bindings;
pub mod local;
#[cfg(test)]
pub mod stub;

pub use bindings::BufferBindings;
