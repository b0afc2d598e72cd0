// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Test-only predictor recording what the engine asks of it.
//!
//! Behaviour comes from delegate options, e.g. `stub name=b delay=20 add=1`:
//! * `name=` label used in the recorded events (default `stub`)
//! * `delay=` milliseconds spent in `predict`
//! * `add=` value added to every input byte on its way to the outputs
//! * `fail` makes `predict` fail
//! * `reject` makes `load_model` fail
//! * `refuse` makes `attach_buffer` fail
//! * `cpu=0` marks the backend as hardware-only; it then leaves data alone

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::backends::BufferBindings;
use crate::engine::{PredictorRegistry, RuntimeContext};
use crate::errors::PredictorError;
use crate::memory::{heap_allocator, Buffer};
use crate::tensor::{Direction, NetworkMetadata};
use crate::traits::{AttachmentHandle, Predictor};
use crate::utils::DelegateSpec;

pub const STUB_DELEGATE: &str = "stub";

/// Shared record of every stub predictor call.
#[derive(Default)]
pub struct Probe {
    running: AtomicUsize,
    peak: AtomicUsize,
    events: Mutex<Vec<String>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Highest number of stubs seen running at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    /// `start:<name>` and `end:<name>` events in the order they happened.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Names in the order their predictions started.
    pub fn started(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|event| event.strip_prefix("start:"))
            .map(str::to_string)
            .collect()
    }

    fn enter(&self, name: &str) {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(name.to_string()).or_default() += 1;
        self.events.lock().unwrap().push(format!("start:{name}"));
    }

    fn exit(&self, name: &str) {
        self.events.lock().unwrap().push(format!("end:{name}"));
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct StubPredictor {
    probe: Arc<Probe>,
    name: String,
    delay: Duration,
    add: u8,
    fail: bool,
    refuse: bool,
    cpu: bool,
    bindings: BufferBindings,
}

impl StubPredictor {
    pub fn new(probe: Arc<Probe>) -> Self {
        Self {
            probe,
            name: STUB_DELEGATE.to_string(),
            delay: Duration::ZERO,
            add: 0,
            fail: false,
            refuse: false,
            cpu: true,
            bindings: BufferBindings::new(),
        }
    }
}

#[async_trait]
impl Predictor for StubPredictor {
    fn load_model(
        &mut self,
        _model: &[u8],
        metadata: &mut NetworkMetadata,
    ) -> Result<(), PredictorError> {
        let spec = DelegateSpec::parse(&metadata.delegate);
        if spec.flag("reject") {
            return Err(PredictorError::InvalidModel("stub rejected model".to_string()));
        }
        if let Some(name) = spec.option("name") {
            self.name = name.to_string();
        }
        self.delay = Duration::from_millis(spec.option_as::<u64>("delay").unwrap_or(0));
        self.add = spec.option_as::<u8>("add").unwrap_or(0);
        self.fail = spec.flag("fail");
        self.refuse = spec.flag("refuse");
        self.cpu = spec.option("cpu") != Some("0");
        self.bindings.reset(metadata.inputs.len(), metadata.outputs.len());
        Ok(())
    }

    async fn predict(&self) -> Result<(), PredictorError> {
        self.probe.enter(&self.name);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = if self.fail {
            Err(PredictorError::Execution(format!("{} failed", self.name)))
        } else if self.cpu {
            self.bindings.read_inputs().and_then(|mut bytes| {
                bytes.iter_mut().for_each(|b| *b = b.wrapping_add(self.add));
                self.bindings.write_outputs(&bytes)
            })
        } else {
            Ok(())
        };

        self.probe.exit(&self.name);
        result
    }

    fn attach_buffer(
        &self,
        _buffer: &Buffer,
        index: usize,
        direction: Direction,
    ) -> Result<AttachmentHandle, PredictorError> {
        if self.refuse {
            return Err(PredictorError::Unsupported {
                predictor: STUB_DELEGATE,
                operation: "attach_buffer",
            });
        }
        self.bindings.attach(index, direction)
    }

    fn set_buffer(
        &self,
        buffer: &Buffer,
        index: usize,
        direction: Direction,
        handle: AttachmentHandle,
    ) -> Result<(), PredictorError> {
        self.bindings.set(buffer, index, direction, handle)
    }

    fn detach_buffer(&self, handle: AttachmentHandle) -> Result<(), PredictorError> {
        self.bindings.detach(handle)
    }

    fn requires_cpu_access(&self) -> bool {
        self.cpu
    }

    fn name(&self) -> &'static str {
        STUB_DELEGATE
    }
}

/// Context with the built-in predictors plus a stub reporting to `probe`.
pub fn stub_context(probe: &Arc<Probe>, parallel_limit: Option<usize>) -> Arc<RuntimeContext> {
    let mut registry = PredictorRegistry::with_builtins();
    let probe = probe.clone();
    registry.register(STUB_DELEGATE, move |_context: &Arc<RuntimeContext>| {
        Box::new(StubPredictor::new(probe.clone())) as Box<dyn Predictor>
    });
    Arc::new(RuntimeContext::new(registry, heap_allocator()).with_parallel_limit(parallel_limit))
}
