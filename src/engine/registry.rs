// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::sync::Arc;

use crate::backends::local::{LocalPredictor, LOCAL_DELEGATE};
use crate::engine::bundle::{BundlePredictor, BUNDLE_DELEGATE};
use crate::engine::RuntimeContext;
use crate::errors::NetworkError;
use crate::traits::Predictor;

/// Builds a fresh predictor for one model load.
pub type PredictorFactory =
    Arc<dyn Fn(&Arc<RuntimeContext>) -> Box<dyn Predictor> + Send + Sync>;

/// Maps delegate types to predictor factories.
///
/// The first word of a model's delegate selector picks the factory; a new
/// predictor is created for every model load.
#[derive(Clone, Default)]
pub struct PredictorRegistry {
    factories: HashMap<String, PredictorFactory>,
}

impl PredictorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `bundle` and `local` predictors.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register(BUNDLE_DELEGATE, |context| {
                Box::new(BundlePredictor::new(context.clone()))
            })
            .register(LOCAL_DELEGATE, |_| Box::new(LocalPredictor::new()));
        registry
    }

    /// Add or replace the factory for `delegate`.
    pub fn register<F>(&mut self, delegate: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Arc<RuntimeContext>) -> Box<dyn Predictor> + Send + Sync + 'static,
    {
        self.factories.insert(delegate.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, delegate: &str) -> bool {
        self.factories.contains_key(delegate)
    }

    /// Registered delegate types, sorted.
    pub fn delegates(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn create(
        &self,
        delegate: &str,
        context: &Arc<RuntimeContext>,
    ) -> Result<Box<dyn Predictor>, NetworkError> {
        let factory = self
            .factories
            .get(delegate)
            .ok_or_else(|| NetworkError::UnknownDelegate(delegate.to_string()))?;
        Ok(factory(context))
    }
}
