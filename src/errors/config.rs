// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;
use std::path::PathBuf;

/// Errors that can occur while validating a bundle description
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A subgraph input references a subgraph that does not exist
    UnknownSubgraph {
        /// Index of the subgraph declaring the input
        subgraph: usize,
        /// The referenced subgraph index
        reference: i32,
    },
    /// A subgraph input references itself or a later subgraph
    ForwardReference {
        /// Index of the subgraph declaring the input
        subgraph: usize,
        /// The referenced subgraph index
        reference: i32,
    },
    /// A tensor reference lacks the tensor index its source requires
    MissingTensorIndex {
        /// Human readable location of the reference
        location: String,
        /// The key that was expected
        key: &'static str,
    },
    /// A subgraph names neither a model path nor embedded model data
    MissingModel {
        /// Index of the offending subgraph
        subgraph: usize,
    },
    /// An exposed bundle output does not point at a subgraph output
    InvalidOutputSource {
        /// Index of the exposed output
        output: usize,
        /// The referenced subgraph index
        reference: i32,
    },
    /// The bundle declares no subgraphs at all
    EmptyBundle,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::UnknownSubgraph {
                subgraph,
                reference,
            } => {
                write!(
                    f,
                    "Subgraph {} reads from subgraph {} which does not exist",
                    subgraph, reference
                )
            }
            ValidationError::ForwardReference {
                subgraph,
                reference,
            } => {
                write!(
                    f,
                    "Subgraph {} reads from subgraph {}; inputs may only come from earlier subgraphs",
                    subgraph, reference
                )
            }
            ValidationError::MissingTensorIndex { location, key } => {
                write!(f, "{} is missing the '{}' tensor index", location, key)
            }
            ValidationError::MissingModel { subgraph } => {
                write!(f, "Subgraph {} has no model source", subgraph)
            }
            ValidationError::InvalidOutputSource { output, reference } => {
                write!(
                    f,
                    "Bundle output {} references subgraph {} which is not a subgraph of this bundle",
                    output, reference
                )
            }
            ValidationError::EmptyBundle => write!(f, "Bundle contains no subgraphs"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors raised while loading runtime configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("allocator '{0}' requires an available NPU driver")]
    DriverRequired(&'static str),
}
