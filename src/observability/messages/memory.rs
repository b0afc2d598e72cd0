// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for buffer allocation and cache maintenance.

use crate::memory::BufferId;
use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// Buffer memory was (re)allocated.
///
/// # Log Level
/// `debug!` - Happens on every first tensor access
pub struct BufferResized {
    pub buffer: BufferId,
    pub allocator: &'static str,
    pub previous: usize,
    pub size: usize,
}

impl Display for BufferResized {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Resized {} from {} to {} bytes using {} allocator",
            self.buffer, self.previous, self.size, self.allocator
        )
    }
}

impl StructuredLog for BufferResized {
    fn log(&self) {
        tracing::debug!(
            buffer = %self.buffer,
            allocator = self.allocator,
            previous = self.previous,
            size = self.size,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "buffer_resized",
            span_name = name,
            buffer = %self.buffer,
            allocator = self.allocator,
            size = self.size,
        )
    }
}

/// A resize request was refused.
///
/// # Log Level
/// `error!` - The caller's tensor or buffer setup is wrong
pub struct ResizeRejected<'a> {
    pub buffer: BufferId,
    pub current: usize,
    pub requested: usize,
    pub error: &'a dyn std::error::Error,
}

impl Display for ResizeRejected<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Cannot resize {} from {} to {} bytes: {}",
            self.buffer, self.current, self.requested, self.error
        )
    }
}

impl StructuredLog for ResizeRejected<'_> {
    fn log(&self) {
        tracing::error!(
            buffer = %self.buffer,
            current = self.current,
            requested = self.requested,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "resize_rejected",
            span_name = name,
            buffer = %self.buffer,
            requested = self.requested,
            error = %self.error,
        )
    }
}

/// A cache flush or invalidate failed while toggling CPU access.
///
/// # Log Level
/// `warn!` - Data may be stale but the toggle still takes effect
pub struct CacheMaintenanceFailed<'a> {
    pub buffer: BufferId,
    pub operation: &'static str,
    pub error: &'a dyn std::error::Error,
}

impl Display for CacheMaintenanceFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Cache {} failed for {}: {}",
            self.operation, self.buffer, self.error
        )
    }
}

impl StructuredLog for CacheMaintenanceFailed<'_> {
    fn log(&self) {
        tracing::warn!(
            buffer = %self.buffer,
            operation = self.operation,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "cache_maintenance_failed",
            span_name = name,
            buffer = %self.buffer,
            operation = self.operation,
        )
    }
}
