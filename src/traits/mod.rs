// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod allocator;
pub mod driver;
pub mod predictor;

pub use allocator::Allocator;
pub use driver::Driver;
pub use predictor::{AttachmentHandle, Predictor};
