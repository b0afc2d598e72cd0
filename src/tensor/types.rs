// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Tensor attributes and network metadata.
//!
//! Metadata describes the ports of a compiled model and which predictor
//! runs it. It is usually stored as JSON next to the model:
//!
//! ```json
//! {
//!   "delegate": "local",
//!   "inputs": [
//!     { "name": "image", "dtype": "uint8", "layout": "nhwc", "shape": [1, 224, 224, 3],
//!       "quantization": { "scheme": "affine_asymmetric", "zero_point": 128, "scale": 0.0078 } }
//!   ],
//!   "outputs": [ { "name": "scores", "dtype": "float32", "shape": [1, 1000] } ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Invalid,
    Byte,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float16,
    Float32,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::Invalid => 0,
            DataType::Byte | DataType::Int8 | DataType::Uint8 => 1,
            DataType::Int16 | DataType::Uint16 | DataType::Float16 => 2,
            DataType::Int32 | DataType::Uint32 | DataType::Float32 => 4,
        }
    }
}

/// Memory layout of a 4D tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    #[default]
    None,
    Nchw,
    Nhwc,
}

/// Security domain a tensor's buffer is expected to live in. Hint only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Security {
    #[default]
    None,
    Any,
    Secure,
    NonSecure,
    SecureIfInputSecure,
}

/// Port direction of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantizationScheme {
    #[default]
    None,
    DynamicFixedPoint,
    AffineAsymmetric,
}

/// Parameters needed to turn quantized values back into real numbers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizationInfo {
    pub scheme: QuantizationScheme,
    pub zero_point: i32,
    #[serde(alias = "scale_factor")]
    pub scale: f32,
    pub fractional_length: i32,
}

/// Ordered dimension sizes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape(pub Vec<i32>);

impl Shape {
    pub fn new(dims: Vec<i32>) -> Self {
        Self(dims)
    }

    /// Number of elements; 0 for an empty shape or a non-positive dimension.
    pub fn item_count(&self) -> usize {
        if self.0.is_empty() {
            return 0;
        }
        self.0
            .iter()
            .map(|&d| usize::try_from(d).unwrap_or(0))
            .product()
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[i32] {
        &self.0
    }
}

impl From<Vec<i32>> for Shape {
    fn from(dims: Vec<i32>) -> Self {
        Self(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", dims.join(", "))
    }
}

/// Static description of one model port.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TensorAttributes {
    pub name: String,
    #[serde(rename = "dtype")]
    pub data_type: DataType,
    pub layout: Layout,
    pub security: Security,
    pub shape: Shape,
    /// Free-form format tags, e.g. `rgb` or `y8 tensor_dim=320`.
    pub format: String,
    pub quantization: QuantizationInfo,
    /// Normalization scale applied before quantization (0 = none).
    pub scale: f32,
    /// Normalization mean, one value or one per channel.
    pub mean: Vec<i32>,
}

impl TensorAttributes {
    pub fn new(name: impl Into<String>, data_type: DataType, shape: impl Into<Shape>) -> Self {
        Self {
            name: name.into(),
            data_type,
            shape: shape.into(),
            ..Self::default()
        }
    }

    /// Size of the tensor data in bytes.
    pub fn size(&self) -> usize {
        self.shape.item_count() * self.data_type.size()
    }
}

/// Description of a compiled model: its ports and the predictor to use.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkMetadata {
    /// Delegate selector, `"<type> [key=value ...]"`.
    pub delegate: String,
    pub secure: bool,
    pub inputs: Vec<TensorAttributes>,
    pub outputs: Vec<TensorAttributes>,
    /// Directory relative model paths are resolved against. Set when a
    /// model is loaded from the filesystem.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl NetworkMetadata {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_delegate(delegate: impl Into<String>) -> Self {
        Self {
            delegate: delegate.into(),
            ..Self::default()
        }
    }
}
