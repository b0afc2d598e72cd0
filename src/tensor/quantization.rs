// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Minimal dequantization used by [`Tensor::as_float`](crate::tensor::Tensor::as_float).
//!
//! Normalizing and quantizing input data is left to external codecs; this
//! module only answers whether raw data can be used as-is and converts
//! quantized outputs to `f32`.

use half::f16;

use crate::tensor::{DataType, Layout, QuantizationScheme, TensorAttributes};

/// Element types that can be accessed directly in tensor data.
pub trait Element: bytemuck::Pod + Send {
    const DATA_TYPE: DataType;
}

macro_rules! element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(impl Element for $ty {
            const DATA_TYPE: DataType = DataType::$dtype;
        })*
    };
}

element! {
    i8 => Int8,
    u8 => Uint8,
    i16 => Int16,
    u16 => Uint16,
    i32 => Int32,
    u32 => Uint32,
    f32 => Float32,
    f16 => Float16,
}

struct MeanInfo {
    per_channel: bool,
}

/// Number of channels of a 4D tensor, 1 otherwise.
fn channel_count(attrs: &TensorAttributes) -> usize {
    let dims = attrs.shape.dims();
    let channels = match (dims.len(), attrs.layout) {
        (4, Layout::Nchw) => dims[1],
        (4, Layout::Nhwc) => dims[3],
        _ => 1,
    };
    usize::try_from(channels).unwrap_or(1)
}

fn mean_info(attrs: &TensorAttributes) -> Option<MeanInfo> {
    let mean = &attrs.mean;
    if mean.len() > 1 && mean.len() != channel_count(attrs) {
        tracing::error!(
            tensor = %attrs.name,
            expected = channel_count(attrs),
            actual = mean.len(),
            "mean does not match channel count"
        );
        return None;
    }
    let has_mean = mean.iter().any(|&v| v != 0);
    let per_channel = has_mean && mean.iter().any(|&v| v != mean[0]);
    Some(MeanInfo { per_channel })
}

/// Whether normalizing and quantizing data for this tensor is an identity.
pub fn is_copy(attrs: &TensorAttributes) -> bool {
    match mean_info(attrs) {
        Some(info) if !info.per_channel => {}
        _ => return false,
    }

    let qi = &attrs.quantization;
    let normalization = if attrs.scale != 0.0 { attrs.scale } else { 1.0 };
    let quantization = if qi.scale != 0.0 { qi.scale } else { 1.0 };
    let scale = normalization * quantization;
    let epsilon = 1.0 / 256.0;
    let scale_is_one = scale > 1.0 - epsilon && scale < 1.0 + epsilon;
    let bias = attrs.mean.first().copied().unwrap_or(0) - qi.zero_point;

    scale_is_one && bias == 0 && qi.fractional_length == 0
}

fn quantized_to_f32(value: i32, attrs: &TensorAttributes) -> f32 {
    let qi = &attrs.quantization;
    match qi.scheme {
        QuantizationScheme::None => value as f32,
        QuantizationScheme::DynamicFixedPoint => {
            value as f32 * 2f32.powi(-qi.fractional_length)
        }
        QuantizationScheme::AffineAsymmetric => (value - qi.zero_point) as f32 * qi.scale,
    }
}

/// Convert raw tensor data to `f32` values.
///
/// Elements of types without a conversion become 0 and the returned flag
/// is false.
pub fn dequantize(bytes: &[u8], attrs: &TensorAttributes) -> (Vec<f32>, bool) {
    let dtype = attrs.data_type;
    let stride = dtype.size();
    if stride == 0 {
        return (Vec::new(), false);
    }

    let mut complete = true;
    let values: Vec<f32> = bytes
        .chunks_exact(stride)
        .map(|chunk| match dtype {
            DataType::Float32 => f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            DataType::Float16 => f16::from_ne_bytes([chunk[0], chunk[1]]).to_f32(),
            DataType::Int8 => quantized_to_f32(i32::from(chunk[0] as i8), attrs),
            DataType::Uint8 => quantized_to_f32(i32::from(chunk[0]), attrs),
            DataType::Int16 => {
                quantized_to_f32(i32::from(i16::from_ne_bytes([chunk[0], chunk[1]])), attrs)
            }
            DataType::Int32 => quantized_to_f32(
                i32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                attrs,
            ),
            DataType::Invalid | DataType::Byte | DataType::Uint16 | DataType::Uint32 => {
                complete = false;
                0.0
            }
        })
        .collect();

    if !complete {
        tracing::error!(tensor = %attrs.name, dtype = ?dtype, "conversion to float not implemented");
    }
    (values, complete)
}
