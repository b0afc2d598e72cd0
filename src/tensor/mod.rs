// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Named, typed ports of a loaded model.
//!
//! Tensors are created by a [`Network`](crate::network::Network) when a
//! model is loaded. A [`Tensor`] is a handle to shared tensor state, so a
//! clone is an alias of the same port rather than a copy. A tensor may carry
//! siblings: ports of other networks that receive every buffer bound to it.

pub mod quantization;
pub mod types;

pub use quantization::Element;
pub use types::{
    DataType, Direction, Layout, NetworkMetadata, QuantizationInfo, QuantizationScheme, Security,
    Shape, TensorAttributes,
};

use std::fmt;
use std::ops::Index;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, error, info};

use crate::errors::{MemoryError, TensorError};
use crate::memory::Buffer;
use crate::network::NetworkShared;
use crate::traits::Allocator;

struct TensorState {
    default_buffer: Buffer,
    current: Option<Buffer>,
    bound: Option<Buffer>,
    dequantized: Option<Arc<[f32]>>,
    siblings: Vec<Weak<TensorInner>>,
}

pub(crate) struct TensorInner {
    network: Weak<NetworkShared>,
    generation: u64,
    index: usize,
    direction: Direction,
    attributes: TensorAttributes,
    state: Mutex<TensorState>,
}

impl TensorInner {
    fn state(&self) -> MutexGuard<'_, TensorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to one model port. See the [module documentation](self).
#[derive(Clone)]
pub struct Tensor {
    inner: Arc<TensorInner>,
}

impl Tensor {
    pub(crate) fn new(
        network: &Arc<NetworkShared>,
        generation: u64,
        index: usize,
        direction: Direction,
        attributes: TensorAttributes,
        allocator: Arc<dyn Allocator>,
    ) -> Self {
        let default_buffer = Buffer::with_allocator(allocator);
        Self {
            inner: Arc::new(TensorInner {
                network: Arc::downgrade(network),
                generation,
                index,
                direction,
                attributes,
                state: Mutex::new(TensorState {
                    current: Some(default_buffer.clone()),
                    default_buffer,
                    bound: None,
                    dequantized: None,
                    siblings: Vec::new(),
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.attributes.name
    }

    pub fn shape(&self) -> &Shape {
        &self.inner.attributes.shape
    }

    pub fn layout(&self) -> Layout {
        self.inner.attributes.layout
    }

    pub fn data_type(&self) -> DataType {
        self.inner.attributes.data_type
    }

    pub fn security(&self) -> Security {
        self.inner.attributes.security
    }

    pub fn format(&self) -> &str {
        &self.inner.attributes.format
    }

    /// All attributes captured when the model was loaded.
    pub fn attributes(&self) -> &TensorAttributes {
        &self.inner.attributes
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// Port index within its direction.
    pub fn index(&self) -> usize {
        self.inner.index
    }

    /// Size of the tensor data in bytes.
    pub fn size(&self) -> usize {
        self.inner.attributes.size()
    }

    pub fn item_count(&self) -> usize {
        self.inner.attributes.shape.item_count()
    }

    /// Whether the shape is exactly `[1]`.
    pub fn is_scalar(&self) -> bool {
        matches!(self.shape().dims(), [1])
    }

    /// Whether both handles refer to the same port.
    pub fn ptr_eq(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Buffer currently bound, the tensor's default buffer until another is set.
    pub fn buffer(&self) -> Option<Buffer> {
        self.inner.state().current.clone()
    }

    /// Bind `buffer` to this tensor and its siblings, or unbind with `None`.
    ///
    /// An empty buffer is resized to the tensor size; a non-empty buffer must
    /// match it exactly. The buffer is attached to the owning network's
    /// predictor on first use and set as the current buffer for this port.
    /// A tensor whose network was unloaded or reloaded fails with
    /// [`TensorError::Detached`]. Siblings are updated even when the local
    /// attach fails; any failure makes the whole call fail and may leave
    /// siblings bound.
    pub fn set_buffer(&self, buffer: Option<&Buffer>) -> Result<(), TensorError> {
        let Some(buffer) = buffer else {
            let mut state = self.inner.state();
            state.current = None;
            state.bound = None;
            info!(tensor = self.name(), "buffer unset");
            return Ok(());
        };

        let network = self.network().map_err(|e| {
            error!(tensor = self.name(), error = %e, "tensor is detached from its network");
            e
        })?;

        if self
            .inner
            .state()
            .bound
            .as_ref()
            .is_some_and(|bound| bound.ptr_eq(buffer))
        {
            debug!(tensor = self.name(), "reassigning same buffer, nothing to do");
            return Ok(());
        }

        let expected = self.size();
        match buffer.size() {
            0 => buffer.resize(expected).map_err(|e| {
                error!(tensor = self.name(), size = expected, error = %e, "unable to resize buffer for tensor");
                e
            })?,
            actual if actual != expected => {
                error!(tensor = self.name(), expected, actual, "bad buffer size for tensor");
                return Err(TensorError::SizeMismatch {
                    tensor: self.name().to_string(),
                    expected,
                    actual,
                });
            }
            _ => {}
        }

        let attached = network
            .register_buffer(buffer, self.index(), self.direction())
            .map_err(|source| TensorError::AttachFailed {
                tensor: self.name().to_string(),
                source,
            });

        let mut failed = 0;
        for sibling in self.siblings() {
            if let Err(e) = sibling.set_buffer(Some(buffer)) {
                error!(tensor = self.name(), sibling = sibling.name(), error = %e, "failed to propagate buffer to sibling");
                failed += 1;
            }
        }

        if let Err(e) = attached {
            error!(tensor = self.name(), error = %e, "failed to set buffer for tensor");
            return Err(e);
        }
        if failed > 0 {
            return Err(TensorError::SiblingFailed {
                tensor: self.name().to_string(),
                failed,
            });
        }

        let mut state = self.inner.state();
        state.bound = Some(buffer.clone());
        state.current = Some(buffer.clone());
        info!(tensor = self.name(), buffer = %buffer.id(), "buffer set for tensor");
        Ok(())
    }

    /// Current buffer with memory behind it.
    ///
    /// The default buffer is allocated to the tensor size on first access;
    /// an explicitly set buffer is returned as is.
    pub fn data_buffer(&self) -> Option<Buffer> {
        let (current, default_buffer) = {
            let state = self.inner.state();
            (state.current.clone()?, state.default_buffer.clone())
        };
        if current.ptr_eq(&default_buffer) && current.is_empty() {
            if let Err(e) = current.resize(self.size()) {
                error!(tensor = self.name(), error = %e, "unable to allocate default buffer");
            }
        }
        Some(current)
    }

    /// Run `f` on the raw tensor bytes.
    pub fn with_data<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let buffer = self.data_buffer()?;
        let mut bytes = buffer.data()?;
        Some(f(&mut bytes[..]))
    }

    /// Copy of the raw tensor bytes.
    pub fn to_vec(&self) -> Option<Vec<u8>> {
        self.with_data(|bytes| bytes.to_vec())
    }

    /// Run `f` on the tensor data viewed as elements of type `T`.
    ///
    /// Only granted when `T` matches the tensor type and the data needs no
    /// normalization or quantization step.
    pub fn with_typed<T: Element, R>(&self, f: impl FnOnce(&mut [T]) -> R) -> Result<R, TensorError> {
        let tensor = self.name().to_string();
        if self.data_type() != T::DATA_TYPE {
            return Err(TensorError::TypeMismatch {
                tensor,
                actual: self.data_type(),
                requested: T::DATA_TYPE,
            });
        }
        if !quantization::is_copy(&self.inner.attributes) {
            return Err(TensorError::NormalizationRequired { tensor });
        }

        let buffer = self
            .data_buffer()
            .ok_or_else(|| TensorError::NoBuffer {
                tensor: tensor.clone(),
            })?;
        let mut bytes = buffer.data().ok_or(MemoryError::NotMapped)?;
        let items = bytemuck::try_cast_slice_mut::<u8, T>(&mut bytes[..]).map_err(|e| {
            error!(tensor = %tensor, error = ?e, "tensor data cannot be viewed as requested type");
            TensorError::Misaligned {
                tensor: tensor.clone(),
                requested: T::DATA_TYPE,
            }
        })?;
        Ok(f(items))
    }

    /// Tensor data converted to `f32`, cached until the next call.
    pub fn as_float(&self) -> Option<Arc<[f32]>> {
        let Some(bytes) = self.to_vec() else {
            error!(tensor = self.name(), "tensor contains no data");
            return None;
        };
        let (values, _) = quantization::dequantize(&bytes, &self.inner.attributes);

        let mut state = self.inner.state();
        match state.dequantized.as_mut().and_then(Arc::get_mut) {
            Some(scratch) if scratch.len() == values.len() => scratch.copy_from_slice(&values),
            _ => state.dequantized = Some(values.into()),
        }
        state.dequantized.clone()
    }

    /// Copy raw bytes into the current buffer. The size must match exactly.
    pub fn assign(&self, data: &[u8]) -> Result<(), TensorError> {
        let buffer = self.buffer().ok_or_else(|| TensorError::NoBuffer {
            tensor: self.name().to_string(),
        })?;
        if data.len() != self.size() {
            error!(tensor = self.name(), expected = self.size(), actual = data.len(), "data size mismatch");
            return Err(TensorError::SizeMismatch {
                tensor: self.name().to_string(),
                expected: self.size(),
                actual: data.len(),
            });
        }
        buffer.assign(data)?;
        Ok(())
    }

    /// Copy the data of `src`, which must have the same type and size.
    pub fn assign_from(&self, src: &Tensor) -> Result<(), TensorError> {
        if src.data_type() != self.data_type() {
            return Err(TensorError::TypeMismatch {
                tensor: self.name().to_string(),
                actual: self.data_type(),
                requested: src.data_type(),
            });
        }
        let data = src.to_vec().ok_or_else(|| TensorError::NoBuffer {
            tensor: src.name().to_string(),
        })?;
        self.assign(&data)
    }

    /// Number of live siblings.
    pub fn sibling_count(&self) -> usize {
        self.siblings().len()
    }

    pub(crate) fn add_sibling(&self, sibling: &Tensor) {
        self.inner
            .state()
            .siblings
            .push(Arc::downgrade(&sibling.inner));
    }

    /// Unbind `buffer` if it is the current buffer. Returns whether it was.
    pub(crate) fn release(&self, buffer: &Buffer) -> bool {
        let mut state = self.inner.state();
        if !state.current.as_ref().is_some_and(|b| b.ptr_eq(buffer)) {
            return false;
        }
        state.current = None;
        state.bound = None;
        info!(tensor = self.name(), "detaching buffer from tensor");
        true
    }

    fn siblings(&self) -> Vec<Tensor> {
        self.inner
            .state()
            .siblings
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| Tensor { inner })
            .collect()
    }

    fn network(&self) -> Result<Arc<NetworkShared>, TensorError> {
        self.inner
            .network
            .upgrade()
            .filter(|network| network.generation() == self.inner.generation)
            .ok_or_else(|| TensorError::Detached {
                tensor: self.name().to_string(),
            })
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("name", &self.name())
            .field("direction", &self.direction())
            .field("index", &self.index())
            .field("data_type", &self.data_type())
            .field("shape", &self.shape().dims())
            .finish()
    }
}

/// Ordered collection of the tensors of one direction.
#[derive(Debug, Clone, Default)]
pub struct Tensors(Vec<Tensor>);

impl Tensors {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Tensor> {
        self.0.get(index)
    }

    /// First tensor named `name`.
    pub fn by_name(&self, name: &str) -> Option<&Tensor> {
        self.0.iter().find(|t| t.name() == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tensor> {
        self.0.iter()
    }
}

impl From<Vec<Tensor>> for Tensors {
    fn from(tensors: Vec<Tensor>) -> Self {
        Self(tensors)
    }
}

impl Index<usize> for Tensors {
    type Output = Tensor;

    fn index(&self, index: usize) -> &Tensor {
        &self.0[index]
    }
}

impl<'a> IntoIterator for &'a Tensors {
    type Item = &'a Tensor;
    type IntoIter = std::slice::Iter<'a, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::stub::{stub_context, Probe};
    use crate::network::Network;
    use serde_json::{json, Value};

    fn port(name: &str, dtype: &str, shape: &[i32]) -> Value {
        json!({ "name": name, "dtype": dtype, "shape": shape })
    }

    fn load(delegate: &str, input: Value, output: Value) -> Network {
        let network = Network::new(stub_context(&Probe::new(), None));
        let meta = json!({ "delegate": delegate, "inputs": [input], "outputs": [output] });
        network
            .load_model(b"identity", Some(&meta.to_string()))
            .unwrap();
        network
    }

    fn bytes_network(size: i32) -> Network {
        load(
            "local",
            port("in", "uint8", &[1, size]),
            port("out", "uint8", &[1, size]),
        )
    }

    fn float_network(shape: &[i32]) -> Network {
        load("local", port("in", "float32", shape), port("out", "float32", shape))
    }

    #[test]
    fn test_sibling_receives_buffer() {
        let primary = bytes_network(4);
        let secondary = bytes_network(4);
        let tensor = primary.inputs()[0].clone();
        let sibling = secondary.inputs()[0].clone();
        tensor.add_sibling(&sibling);
        assert_eq!(tensor.sibling_count(), 1);

        let buffer = Buffer::new();
        tensor.set_buffer(Some(&buffer)).unwrap();
        assert_eq!(buffer.size(), 4);
        assert!(tensor.buffer().unwrap().ptr_eq(&buffer));
        assert!(sibling.buffer().unwrap().ptr_eq(&buffer));
        assert_eq!(buffer.network_count(), 2);
    }

    #[test]
    fn test_sibling_refusing_attach_fails_the_call() {
        let primary = bytes_network(4);
        let refusing = load(
            "stub refuse",
            port("in", "uint8", &[1, 4]),
            port("out", "uint8", &[1, 4]),
        );
        let tensor = primary.inputs()[0].clone();
        let sibling = refusing.inputs()[0].clone();
        tensor.add_sibling(&sibling);

        let buffer = Buffer::new();
        let result = tensor.set_buffer(Some(&buffer));
        assert!(matches!(
            result,
            Err(TensorError::SiblingFailed { failed: 1, .. })
        ));
        assert!(!tensor.buffer().unwrap().ptr_eq(&buffer));
        assert!(matches!(
            sibling.set_buffer(Some(&buffer)),
            Err(TensorError::AttachFailed { .. })
        ));
    }

    #[test]
    fn test_sibling_size_mismatch_fails_the_call() {
        let primary = bytes_network(4);
        let larger = bytes_network(8);
        let tensor = primary.inputs()[0].clone();
        tensor.add_sibling(&larger.inputs()[0]);

        let buffer = Buffer::with_size(4, None).unwrap();
        assert!(matches!(
            tensor.set_buffer(Some(&buffer)),
            Err(TensorError::SiblingFailed { failed: 1, .. })
        ));
        assert!(matches!(
            larger.inputs()[0].set_buffer(Some(&buffer)),
            Err(TensorError::SizeMismatch { expected: 8, actual: 4, .. })
        ));
    }

    #[test]
    fn test_dropped_sibling_is_not_counted() {
        let primary = bytes_network(4);
        let tensor = primary.inputs()[0].clone();
        {
            let secondary = bytes_network(4);
            tensor.add_sibling(&secondary.inputs()[0]);
            assert_eq!(tensor.sibling_count(), 1);
        }
        assert_eq!(tensor.sibling_count(), 0);
        tensor.set_buffer(Some(&Buffer::new())).unwrap();
    }

    #[test]
    fn test_stale_tensor_rejects_its_own_buffer() {
        let network = bytes_network(4);
        let stale = network.inputs()[0].clone();
        let buffer = Buffer::new();
        stale.set_buffer(Some(&buffer)).unwrap();

        let meta = json!({
            "delegate": "local",
            "inputs": [port("in", "uint8", &[1, 4])],
            "outputs": [port("out", "uint8", &[1, 4])],
        });
        network.load_model(b"add 1", Some(&meta.to_string())).unwrap();

        assert!(matches!(
            stale.set_buffer(Some(&buffer)),
            Err(TensorError::Detached { .. })
        ));
        assert_eq!(buffer.network_count(), 0);
    }

    #[test]
    fn test_unset_buffer() {
        let network = bytes_network(4);
        let tensor = network.inputs()[0].clone();
        assert!(tensor.buffer().is_some());

        tensor.set_buffer(None).unwrap();
        assert!(tensor.buffer().is_none());
        assert!(tensor.to_vec().is_none());
        assert!(matches!(
            tensor.assign(&[0; 4]),
            Err(TensorError::NoBuffer { .. })
        ));
        assert!(matches!(
            tensor.with_typed(|items: &mut [u8]| items.len()),
            Err(TensorError::NoBuffer { .. })
        ));
    }

    #[test]
    fn test_typed_access() {
        let network = float_network(&[1, 2]);
        let tensor = network.inputs()[0].clone();
        tensor
            .with_typed(|items: &mut [f32]| items.copy_from_slice(&[0.5, -4.0]))
            .unwrap();
        let sum = tensor.with_typed(|items: &mut [f32]| items.iter().sum::<f32>());
        assert_eq!(sum.unwrap(), -3.5);

        assert!(matches!(
            tensor.with_typed(|items: &mut [u8]| items.len()),
            Err(TensorError::TypeMismatch {
                actual: DataType::Float32,
                requested: DataType::Uint8,
                ..
            })
        ));
    }

    #[test]
    fn test_typed_access_needs_plain_data() {
        let mut input = port("in", "uint8", &[1, 4]);
        input["quantization"] = json!({ "scheme": "affine_asymmetric", "zero_point": 0, "scale": 0.5 });
        let network = load("local", input, port("out", "uint8", &[1, 4]));
        assert!(matches!(
            network.inputs()[0].with_typed(|items: &mut [u8]| items.len()),
            Err(TensorError::NormalizationRequired { .. })
        ));
    }

    #[test]
    fn test_typed_access_on_unaligned_window() {
        let network = float_network(&[1]);
        let tensor = network.inputs()[0].clone();
        let parent = Buffer::with_size(8, None).unwrap();
        let window = Buffer::sub_range(&parent, 1, 4).unwrap();
        tensor.set_buffer(Some(&window)).unwrap();

        assert!(matches!(
            tensor.with_typed(|items: &mut [f32]| items.len()),
            Err(TensorError::Misaligned {
                requested: DataType::Float32,
                ..
            })
        ));
        assert!(tensor.with_data(|bytes| bytes.len()).is_some());
    }

    #[test]
    fn test_as_float_follows_data() {
        let network = float_network(&[1, 2]);
        let tensor = network.inputs()[0].clone();

        tensor.assign(bytemuck::cast_slice(&[1.5f32, -2.0])).unwrap();
        assert_eq!(&tensor.as_float().unwrap()[..], &[1.5, -2.0]);

        tensor.assign(bytemuck::cast_slice(&[3.0f32, 0.25])).unwrap();
        assert_eq!(&tensor.as_float().unwrap()[..], &[3.0, 0.25]);
    }

    #[test]
    fn test_assign_from() {
        let network = bytes_network(4);
        let input = network.inputs()[0].clone();
        let output = network.outputs()[0].clone();
        input.assign(&[1, 2, 3, 4]).unwrap();
        output.assign_from(&input).unwrap();
        assert_eq!(output.to_vec().unwrap(), vec![1, 2, 3, 4]);

        assert!(matches!(
            input.assign(&[1, 2]),
            Err(TensorError::SizeMismatch { expected: 4, actual: 2, .. })
        ));

        let floats = float_network(&[1]);
        assert!(matches!(
            floats.inputs()[0].assign_from(&input),
            Err(TensorError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_scalar_shape() {
        assert!(float_network(&[1]).inputs()[0].is_scalar());
        assert!(!float_network(&[1, 1]).inputs()[0].is_scalar());
        assert!(!float_network(&[2]).inputs()[0].is_scalar());
    }

    #[test]
    fn test_clone_is_an_alias() {
        let network = bytes_network(4);
        let tensor = network.inputs()[0].clone();
        let alias = tensor.clone();
        assert!(alias.ptr_eq(&tensor));

        alias.assign(&[9, 9, 9, 9]).unwrap();
        assert_eq!(tensor.to_vec().unwrap(), vec![9; 4]);
        assert!(!tensor.ptr_eq(&network.outputs()[0]));
    }
}
