// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Implementations of the [`Driver`](crate::traits::Driver) contract.

pub mod emulated;

pub use emulated::{EmulatedDevice, EmulatedDriver};
