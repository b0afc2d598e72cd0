// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors raised while binding tensors, loading models and running inference.

use std::path::PathBuf;

use crate::errors::{MemoryError, ValidationError};
use crate::tensor::DataType;

/// Failures while binding buffers to tensors or reading tensor data.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    #[error("tensor '{tensor}' expects {expected} bytes, buffer holds {actual}")]
    SizeMismatch {
        tensor: String,
        expected: usize,
        actual: usize,
    },

    #[error("tensor '{tensor}' holds {actual:?} data, {requested:?} was requested")]
    TypeMismatch {
        tensor: String,
        actual: DataType,
        requested: DataType,
    },

    #[error("tensor '{tensor}' no longer belongs to a loaded network")]
    Detached { tensor: String },

    #[error("tensor '{tensor}' has no buffer")]
    NoBuffer { tensor: String },

    #[error("tensor '{tensor}' data needs normalization before direct access")]
    NormalizationRequired { tensor: String },

    #[error("tensor '{tensor}' data is not aligned for {requested:?} access")]
    Misaligned {
        tensor: String,
        requested: DataType,
    },

    #[error("predictor rejected buffer for tensor '{tensor}': {source}")]
    AttachFailed {
        tensor: String,
        source: PredictorError,
    },

    #[error("buffer propagation to {failed} sibling(s) of tensor '{tensor}' failed")]
    SiblingFailed { tensor: String, failed: usize },

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Failures reported by a [`Predictor`](crate::traits::Predictor) backend.
#[derive(Debug, thiserror::Error)]
pub enum PredictorError {
    #[error("predictor '{predictor}' does not support {operation}")]
    Unsupported {
        predictor: &'static str,
        operation: &'static str,
    },

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("invalid bundle description: {0}")]
    InvalidBundle(String),

    #[error("bundle validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("subgraph {index} failed to load: {source}")]
    Subgraph {
        index: usize,
        source: Box<NetworkError>,
    },

    #[error("predictor has no model loaded")]
    NotLoaded,

    #[error("{direction} {index} does not exist")]
    InvalidPort {
        direction: &'static str,
        index: usize,
    },

    #[error("unknown attachment handle {0}")]
    UnknownAttachment(u32),

    #[error("no buffer set for {direction} {index}")]
    MissingBuffer {
        direction: &'static str,
        index: usize,
    },

    #[error("inference failed: {0}")]
    Execution(String),

    #[error("subgraph(s) {failed:?} failed")]
    SubgraphsFailed { failed: Vec<usize> },

    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failures reported by [`Network`](crate::network::Network) operations.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("no model loaded")]
    NotLoaded,

    #[error("no predictor registered for delegate '{0}'")]
    UnknownDelegate(String),

    #[error("metadata is required for delegate '{0}'")]
    MissingMetadata(String),

    #[error("invalid network metadata: {0}")]
    InvalidMetadata(#[from] serde_json::Error),

    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("input tensor '{tensor}' has no data")]
    InputNotSet { tensor: String },

    #[error("output tensor '{tensor}' has no buffer")]
    OutputNotSet { tensor: String },

    #[error("buffer is not registered with this network")]
    NotRegistered,

    #[error(transparent)]
    Predictor(#[from] PredictorError),

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
