// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Bundle description, the `bundle.json` of a bundle directory or the model
/// data of a network loaded with the `bundle` delegate.
///
/// # Example
/// ```json
/// {
///   "inputs": [ { "subgraph": -1, "in": 0 } ],
///   "outputs": [ { "subgraph": 1, "out": 0 } ],
///   "parallel_limit": 0,
///   "graph": [
///     { "inputs": [ { "subgraph": -1, "in": 0 } ], "model": "detect.model", "meta": "detect.json" },
///     { "inputs": [ { "subgraph": 0, "out": 0 } ], "model": "classify.model", "meta": "classify.json" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleDescription {
    /// External inputs; only their number is checked.
    pub inputs: Vec<TensorRef>,
    /// Subgraph outputs exposed as bundle outputs, in order.
    pub outputs: Vec<TensorRef>,
    /// Subgraphs in declaration order.
    pub graph: Vec<SubgraphDescription>,
    /// Maximum subgraphs running at once: 0 is unbounded, 1 is sequential.
    pub parallel_limit: usize,
}

impl BundleDescription {
    pub fn from_json(json: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(json)
    }
}

/// Address of a tensor: subgraph `-1` is the bundle itself.
///
/// Either `in` or `out` names the tensor index; `out` wins when both are
/// present and a subgraph reference with neither reads index 0. `offset` shares only part of a producer output, starting that
/// many bytes in.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TensorRef {
    #[serde(default)]
    pub subgraph: i32,
    #[serde(rename = "in", default, skip_serializing_if = "Option::is_none")]
    pub input: Option<usize>,
    #[serde(rename = "out", default, skip_serializing_if = "Option::is_none")]
    pub output: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl TensorRef {
    pub fn external(input: usize) -> Self {
        Self {
            subgraph: -1,
            input: Some(input),
            ..Self::default()
        }
    }

    pub fn subgraph_output(subgraph: usize, output: usize) -> Self {
        Self {
            subgraph: i32::try_from(subgraph).unwrap_or(i32::MAX),
            output: Some(output),
            ..Self::default()
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Tensor index within the source: `out`, then `in`, then 0.
    pub fn tensor_index(&self) -> usize {
        self.output.or(self.input).unwrap_or(0)
    }

    /// Producing subgraph, `None` for an external input.
    pub fn source_subgraph(&self) -> Option<usize> {
        usize::try_from(self.subgraph).ok()
    }
}

/// One subgraph: where its model comes from and where its inputs come from.
///
/// The model is either a file (`model`, `meta`; relative to the bundle
/// directory) or embedded (`model_data` as base64, `meta_data` as JSON text).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubgraphDescription {
    pub inputs: Vec<TensorRef>,
    pub model: String,
    pub meta: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<String>,
}

impl SubgraphDescription {
    pub fn has_model(&self) -> bool {
        !self.model.is_empty() || self.model_data.is_some()
    }

    /// Decoded embedded model, if any.
    pub fn decode_model_data(&self) -> Result<Option<Vec<u8>>, base64::DecodeError> {
        self.model_data
            .as_deref()
            .map(|data| STANDARD.decode(data))
            .transpose()
    }

    /// Embed `model` as base64.
    pub fn with_model_data(mut self, model: &[u8], meta: impl Into<String>) -> Self {
        self.model_data = Some(STANDARD.encode(model));
        self.meta_data = Some(meta.into());
        self
    }
}
