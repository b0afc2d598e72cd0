// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! A loaded model and its tensors.
//!
//! A [`Network`] owns one predictor and the input and output tensors of the
//! model it runs. Buffers bound to those tensors are attached to the
//! predictor on first use; the network and each buffer track the attachment
//! through weak references so that whichever goes away first detaches the
//! other.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use tracing::{debug, error, warn, Instrument};

use crate::engine::bundle::BUNDLE_DELEGATE;
use crate::engine::RuntimeContext;
use crate::errors::{NetworkError, PredictorError};
use crate::memory::{Buffer, BufferId, WeakBuffer};
use crate::observability::messages::network::{
    InferenceCompleted, InferenceFailed, InferenceStarted, ModelLoadFailed, ModelLoaded,
};
use crate::observability::messages::StructuredLog;
use crate::tensor::{Direction, NetworkMetadata, Tensor, TensorAttributes, Tensors};
use crate::traits::{AttachmentHandle, Predictor};
use crate::utils::DelegateSpec;

static NEXT_NETWORK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(u64);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "network#{}", self.0)
    }
}

#[derive(Default)]
struct NetworkIo {
    predictor: Option<Arc<dyn Predictor>>,
    inputs: Tensors,
    outputs: Tensors,
    delegate: String,
}

type Registrations = HashMap<BufferId, (WeakBuffer, AttachmentHandle)>;

pub(crate) struct NetworkShared {
    id: NetworkId,
    context: Arc<RuntimeContext>,
    generation: AtomicU64,
    io: RwLock<NetworkIo>,
    buffers: Mutex<Registrations>,
}

impl NetworkShared {
    pub(crate) fn id(&self) -> NetworkId {
        self.id
    }

    /// Bumped on every model load; tensors of older loads are rejected.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn predictor(&self) -> Option<Arc<dyn Predictor>> {
        self.io
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .predictor
            .clone()
    }

    fn tensors(&self) -> (Tensors, Tensors) {
        let io = self.io.read().unwrap_or_else(PoisonError::into_inner);
        (io.inputs.clone(), io.outputs.clone())
    }

    fn buffers(&self) -> MutexGuard<'_, Registrations> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `buffer` the current buffer of port (`direction`, `index`),
    /// attaching it to the predictor first if this network has not seen it.
    pub(crate) fn register_buffer(
        self: &Arc<Self>,
        buffer: &Buffer,
        index: usize,
        direction: Direction,
    ) -> Result<(), PredictorError> {
        let predictor = self.predictor().ok_or(PredictorError::NotLoaded)?;

        let handle = match buffer.attachment(self.id) {
            Some(handle) => handle,
            None => {
                let handle = predictor
                    .attach_buffer(buffer, index, direction)
                    .map_err(|e| {
                        error!(network = %self.id, %direction, index, error = %e, "can't create buffer handle");
                        e
                    })?;
                self.buffers()
                    .insert(buffer.id(), (buffer.downgrade(), handle));
                buffer.register_network(self, handle);
                handle
            }
        };

        predictor.set_buffer(buffer, index, direction, handle)
    }

    /// Called when a registered buffer is dropped.
    pub(crate) fn release_buffer(&self, buffer: BufferId, handle: AttachmentHandle) {
        if self.buffers().remove(&buffer).is_none() {
            warn!(network = %self.id, %buffer, "released buffer was not registered");
        }
        if let Some(predictor) = self.predictor() {
            if let Err(e) = predictor.detach_buffer(handle) {
                warn!(network = %self.id, %buffer, error = %e, "failed to detach buffer");
            }
        }
    }

    fn unregister_buffer(&self, buffer: &Buffer) -> Result<(), NetworkError> {
        if self.buffers().remove(&buffer.id()).is_none() {
            error!(network = %self.id, buffer = %buffer.id(), "buffer not registered");
            return Err(NetworkError::NotRegistered);
        }

        let (inputs, outputs) = self.tensors();
        for tensor in inputs.iter().chain(outputs.iter()) {
            tensor.release(buffer);
        }

        let handle = buffer
            .unregister_network(self.id)
            .ok_or(NetworkError::NotRegistered)?;
        if let Some(predictor) = self.predictor() {
            predictor.detach_buffer(handle)?;
        }
        Ok(())
    }

    /// Detach every registered buffer, before a reload.
    fn unregister_all(&self) {
        let registrations: Vec<_> = self.buffers().drain().collect();
        let predictor = self.predictor();
        for (id, (buffer, handle)) in registrations {
            if let Some(buffer) = buffer.upgrade() {
                buffer.unregister_network(self.id);
            }
            if let Some(predictor) = &predictor {
                if let Err(e) = predictor.detach_buffer(handle) {
                    warn!(network = %self.id, buffer = %id, error = %e, "failed to detach buffer");
                }
            }
        }
    }
}

impl Drop for NetworkShared {
    fn drop(&mut self) {
        let predictor = self
            .io
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .predictor
            .clone();
        let registrations = std::mem::take(
            self.buffers
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (_, (buffer, handle)) in registrations {
            if let Some(buffer) = buffer.upgrade() {
                buffer.unregister_network(self.id);
            }
            if let Some(predictor) = &predictor {
                // The predictor goes away with the network; a failure here has no consequence.
                let _ = predictor.detach_buffer(handle);
            }
        }
    }
}

/// A model loaded on one predictor. See the [module documentation](self).
pub struct Network {
    shared: Arc<NetworkShared>,
}

impl Network {
    pub fn new(context: Arc<RuntimeContext>) -> Self {
        Self {
            shared: Arc::new(NetworkShared {
                id: NetworkId(NEXT_NETWORK_ID.fetch_add(1, Ordering::Relaxed)),
                context,
                generation: AtomicU64::new(0),
                io: RwLock::new(NetworkIo::default()),
                buffers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn id(&self) -> NetworkId {
        self.shared.id
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.shared.context
    }

    /// Load a model from memory.
    ///
    /// `metadata` is the JSON model description. Without it `model` is
    /// taken to be a bundle description. Any previously loaded model is
    /// unloaded first, even if loading the new one fails; tensors of the
    /// previous model stop accepting buffers.
    pub fn load_model(&self, model: &[u8], metadata: Option<&str>) -> Result<(), NetworkError> {
        let metadata = match metadata {
            Some(json) => NetworkMetadata::from_json(json)?,
            None => NetworkMetadata::with_delegate(BUNDLE_DELEGATE),
        };
        self.load(model, metadata)
    }

    /// Load a model from the filesystem.
    ///
    /// `model` may be a bundle directory containing `bundle.json`, a bundle
    /// description file (when `metadata` is `None`) or a model file with its
    /// JSON metadata. Relative paths inside a bundle are resolved against
    /// the directory holding it.
    pub fn load_model_file(
        &self,
        model: impl AsRef<Path>,
        metadata: Option<&Path>,
    ) -> Result<(), NetworkError> {
        let model = model.as_ref();
        if model.is_dir() {
            let mut meta = NetworkMetadata::with_delegate(BUNDLE_DELEGATE);
            meta.base_dir = Some(model.to_path_buf());
            return self.load(&[], meta);
        }

        let data = fs::read(model).map_err(|source| NetworkError::Io {
            path: model.to_path_buf(),
            source,
        })?;
        let mut meta = match metadata {
            Some(path) => {
                let json = fs::read_to_string(path).map_err(|source| NetworkError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                NetworkMetadata::from_json(&json)?
            }
            None => NetworkMetadata::with_delegate(BUNDLE_DELEGATE),
        };
        meta.base_dir = Some(parent_dir(model));
        self.load(&data, meta)
    }

    fn load(&self, model: &[u8], mut metadata: NetworkMetadata) -> Result<(), NetworkError> {
        self.unload();
        let delegate = metadata.delegate.clone();
        self.try_load(model, &mut metadata).map_err(|e| {
            ModelLoadFailed {
                network: self.id(),
                delegate: &delegate,
                error: &e,
            }
            .log();
            e
        })
    }

    fn try_load(&self, model: &[u8], metadata: &mut NetworkMetadata) -> Result<(), NetworkError> {
        let spec = DelegateSpec::parse(&metadata.delegate);
        if spec.kind() != BUNDLE_DELEGATE
            && metadata.inputs.is_empty()
            && metadata.outputs.is_empty()
        {
            return Err(NetworkError::MissingMetadata(spec.kind().to_string()));
        }

        let context = &self.shared.context;
        let mut predictor = context.registry().create(spec.kind(), context)?;
        predictor.load_model(model, metadata)?;
        let predictor: Arc<dyn Predictor> = Arc::from(predictor);

        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let inputs = self.create_tensors(&predictor, generation, Direction::Input, &metadata.inputs);
        let outputs =
            self.create_tensors(&predictor, generation, Direction::Output, &metadata.outputs);

        ModelLoaded {
            network: self.id(),
            delegate: &metadata.delegate,
            predictor: predictor.name(),
            inputs: inputs.len(),
            outputs: outputs.len(),
        }
        .log();

        let mut io = self.shared.io.write().unwrap_or_else(PoisonError::into_inner);
        *io = NetworkIo {
            predictor: Some(predictor),
            inputs,
            outputs,
            delegate: metadata.delegate.clone(),
        };
        Ok(())
    }

    fn create_tensors(
        &self,
        predictor: &Arc<dyn Predictor>,
        generation: u64,
        direction: Direction,
        attributes: &[TensorAttributes],
    ) -> Tensors {
        attributes
            .iter()
            .enumerate()
            .map(|(index, attrs)| {
                predictor.get_tensor(index, direction).unwrap_or_else(|| {
                    Tensor::new(
                        &self.shared,
                        generation,
                        index,
                        direction,
                        attrs.clone(),
                        self.shared.context.allocator(),
                    )
                })
            })
            .collect::<Vec<_>>()
            .into()
    }

    /// Drop the loaded model, detaching every buffer.
    fn unload(&self) {
        self.shared.unregister_all();
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        let previous = {
            let mut io = self.shared.io.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *io)
        };
        // Dropping tensors may drop their buffers, which lock this network.
        drop(previous);
    }

    pub fn is_loaded(&self) -> bool {
        self.shared.predictor().is_some()
    }

    /// Delegate selector of the loaded model.
    pub fn delegate(&self) -> String {
        self.shared
            .io
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .delegate
            .clone()
    }

    pub fn inputs(&self) -> Tensors {
        self.shared.tensors().0
    }

    pub fn outputs(&self) -> Tensors {
        self.shared.tensors().1
    }

    /// Whether the loaded predictor accesses buffers through the CPU.
    pub fn requires_cpu_access(&self) -> bool {
        self.shared
            .predictor()
            .map_or(true, |predictor| predictor.requires_cpu_access())
    }

    /// Run one inference.
    ///
    /// Every input must have a non-empty buffer; outputs get their default
    /// buffer allocated if needed. Input caches are flushed before and
    /// output caches invalidated after the predictor runs. A failure at any
    /// step aborts the inference without undoing earlier steps.
    pub async fn predict(&self) -> Result<(), NetworkError> {
        let delegate = self.delegate();
        let started = InferenceStarted {
            network: self.id(),
            delegate: &delegate,
        };
        started.log();
        let result = self
            .try_predict()
            .instrument(started.span("network_inference"))
            .await;
        if let Err(e) = &result {
            InferenceFailed {
                network: self.id(),
                error: e,
            }
            .log();
        }
        result
    }

    async fn try_predict(&self) -> Result<(), NetworkError> {
        let predictor = self.shared.predictor().ok_or(NetworkError::NotLoaded)?;
        let (inputs, outputs) = self.shared.tensors();
        let start = Instant::now();

        let mut input_buffers = Vec::with_capacity(inputs.len());
        for tensor in &inputs {
            let buffer = tensor
                .buffer()
                .filter(|buffer| !buffer.is_empty())
                .ok_or_else(|| NetworkError::InputNotSet {
                    tensor: tensor.name().to_string(),
                })?;
            tensor.set_buffer(Some(&buffer))?;
            input_buffers.push(buffer);
        }

        let mut output_buffers = Vec::with_capacity(outputs.len());
        for tensor in &outputs {
            let buffer = tensor
                .data_buffer()
                .filter(|buffer| !buffer.is_empty())
                .ok_or_else(|| NetworkError::OutputNotSet {
                    tensor: tensor.name().to_string(),
                })?;
            tensor.set_buffer(Some(&buffer))?;
            output_buffers.push(buffer);
        }

        for buffer in &input_buffers {
            buffer.cache_flush()?;
        }

        predictor.predict().await?;

        for buffer in &output_buffers {
            buffer.cache_invalidate()?;
        }

        InferenceCompleted {
            network: self.id(),
            duration: start.elapsed(),
        }
        .log();
        Ok(())
    }

    /// Detach `buffer` from this network and unbind it from any tensor
    /// using it.
    pub fn unregister_buffer(&self, buffer: &Buffer) -> Result<(), NetworkError> {
        self.shared.unregister_buffer(buffer)?;
        debug!(network = %self.id(), buffer = %buffer.id(), "buffer unregistered");
        Ok(())
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new(Arc::new(RuntimeContext::default()))
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("id", &self.id())
            .field("delegate", &self.delegate())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}
