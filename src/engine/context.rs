// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;
use std::sync::Arc;

use crate::engine::PredictorRegistry;
use crate::memory::heap_allocator;
use crate::traits::Allocator;

/// Services shared by every [`Network`](crate::network::Network) built from it.
///
/// Holds the predictor registry, the allocator used for tensor default
/// buffers and optional overrides of bundle scheduling. Built by
/// [`RuntimeBuilder`](crate::config::RuntimeBuilder) or with [`Default`],
/// which uses the built-in predictors and the heap allocator.
pub struct RuntimeContext {
    registry: PredictorRegistry,
    allocator: Arc<dyn Allocator>,
    parallel_limit: Option<usize>,
}

impl RuntimeContext {
    pub fn new(registry: PredictorRegistry, allocator: Arc<dyn Allocator>) -> Self {
        Self {
            registry,
            allocator,
            parallel_limit: None,
        }
    }

    /// Override the `parallel_limit` declared by bundles.
    pub fn with_parallel_limit(mut self, limit: Option<usize>) -> Self {
        self.parallel_limit = limit;
        self
    }

    pub fn registry(&self) -> &PredictorRegistry {
        &self.registry
    }

    /// Allocator for tensor default buffers.
    pub fn allocator(&self) -> Arc<dyn Allocator> {
        self.allocator.clone()
    }

    pub fn parallel_limit(&self) -> Option<usize> {
        self.parallel_limit
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new(PredictorRegistry::with_builtins(), heap_allocator())
    }
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("delegates", &self.registry.delegates())
            .field("allocator", &self.allocator.name())
            .field("parallel_limit", &self.parallel_limit)
            .finish()
    }
}
