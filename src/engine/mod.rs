// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Runtime services: the predictor registry, the shared runtime context
//! and the bundle predictor running dependency graphs of models.

pub mod bundle;
pub mod context;
pub mod registry;
#[cfg(test)]
mod integration_tests;

pub use bundle::{BundlePredictor, SubgraphState, BUNDLE_DELEGATE};
pub use context::RuntimeContext;
pub use registry::{PredictorFactory, PredictorRegistry};
