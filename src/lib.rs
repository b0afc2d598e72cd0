// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod backends;   // predictor backends
pub mod config;     // bundle descriptions + runtime config
pub mod driver;     // NPU driver implementations
pub mod engine;     // registry, context, bundle execution
pub mod errors;     // error handling
pub mod memory;     // allocators + buffers
pub mod network;
pub mod npu;
pub mod observability;
pub mod tensor;
pub mod traits;     // unified abstractions
pub mod utils;
