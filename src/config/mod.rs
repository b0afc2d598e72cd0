// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod bundle;
mod loader;
mod runtime;
mod validation;

pub mod consts;

pub use bundle::{BundleDescription, SubgraphDescription, TensorRef};
pub use loader::{load_config, AllocatorKind, RuntimeConfig};
pub use runtime::RuntimeBuilder;
pub use validation::validate_bundle;
