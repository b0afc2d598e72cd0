// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Predictor running a bundle: several subgraph models connected through
//! shared buffers and executed as one inference.
//!
//! ## Wiring
//!
//! Every subgraph is loaded into its own [`Network`]. A subgraph input read
//! from the bundle becomes a bundle input; when several subgraphs read the
//! same bundle input, the first tensor is exposed and the others become its
//! siblings. A subgraph input read from an earlier subgraph's output shares
//! that output's buffer, either entirely or as a sub-range starting at the
//! declared `offset`, so no data is copied between subgraphs. When neither
//! side of such a link touches buffers through the CPU, the shared buffer
//! gets CPU access disabled and its cache maintenance is skipped.
//!
//! ## Execution
//!
//! With a `parallel_limit` of 1, or a single subgraph, subgraphs run in
//! declaration order. Otherwise every subgraph runs in its own task: the
//! outcome channels are all created before the first task is spawned, each
//! task waits for the outcomes of its dependencies, and a semaphore bounds
//! how many subgraphs run at once (0 means unbounded). A subgraph whose
//! dependency did not succeed is skipped without running its predictor, but
//! still reports an outcome so that its own dependents never wait forever.
//! The bundle inference succeeds only if every subgraph succeeds.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, Instrument};

use crate::config::consts::BUNDLE_FILE;
use crate::config::{validate_bundle, BundleDescription, SubgraphDescription};
use crate::engine::RuntimeContext;
use crate::errors::{NetworkError, PredictorError, TensorError};
use crate::memory::Buffer;
use crate::network::Network;
use crate::observability::messages::bundle::{
    BundleInferenceCompleted, BundleInferenceStarted, BundleLoaded, SubgraphCompleted,
    SubgraphFailed, SubgraphSkipped, SubgraphStarted,
};
use crate::observability::messages::StructuredLog;
use crate::tensor::{Direction, NetworkMetadata, Tensor};
use crate::traits::{AttachmentHandle, Predictor};
use crate::utils::DelegateSpec;

/// Delegate name the bundle predictor is registered under.
pub const BUNDLE_DELEGATE: &str = "bundle";

/// Progress of one subgraph during the latest bundle inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubgraphState {
    /// Not started yet.
    Pending,
    /// Waiting for dependencies or for a free execution slot.
    Waiting,
    /// Predictor running.
    Running,
    Succeeded,
    Failed,
    /// Not run because a dependency did not succeed.
    Skipped,
}

struct Subgraph {
    index: usize,
    network: Network,
    dependencies: Vec<usize>,
}

#[derive(Clone, Default)]
struct StateBoard(Arc<Mutex<Vec<SubgraphState>>>);

impl StateBoard {
    fn lock(&self) -> MutexGuard<'_, Vec<SubgraphState>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset(&self, count: usize) {
        *self.lock() = vec![SubgraphState::Pending; count];
    }

    fn set(&self, index: usize, state: SubgraphState) {
        if let Some(slot) = self.lock().get_mut(index) {
            *slot = state;
        }
    }

    fn snapshot(&self) -> Vec<SubgraphState> {
        self.lock().clone()
    }
}

/// Buffer shared between a producer output and a consumer input.
struct Link {
    producer: usize,
    consumer: usize,
    output: Tensor,
    shared: Buffer,
}

/// See the [module documentation](self).
pub struct BundlePredictor {
    context: Arc<RuntimeContext>,
    subgraphs: Vec<Arc<Subgraph>>,
    inputs: Vec<Tensor>,
    outputs: Vec<Tensor>,
    parallel_limit: usize,
    states: StateBoard,
}

impl BundlePredictor {
    pub fn new(context: Arc<RuntimeContext>) -> Self {
        Self {
            context,
            subgraphs: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parallel_limit: 1,
            states: StateBoard::default(),
        }
    }

    pub fn subgraph_count(&self) -> usize {
        self.subgraphs.len()
    }

    /// Effective limit: 1 runs sequentially, 0 is unbounded.
    pub fn parallel_limit(&self) -> usize {
        self.parallel_limit
    }

    /// Network running subgraph `index`.
    pub fn subgraph(&self, index: usize) -> Option<&Network> {
        self.subgraphs.get(index).map(|subgraph| &subgraph.network)
    }

    /// Subgraphs whose outputs subgraph `index` reads.
    pub fn dependencies(&self, index: usize) -> Option<&[usize]> {
        self.subgraphs
            .get(index)
            .map(|subgraph| subgraph.dependencies.as_slice())
    }

    /// State of every subgraph, as of the latest or current inference.
    pub fn subgraph_states(&self) -> Vec<SubgraphState> {
        self.states.snapshot()
    }

    fn read_description(
        model: &[u8],
        base_dir: Option<&Path>,
    ) -> Result<BundleDescription, PredictorError> {
        if !model.is_empty() {
            return BundleDescription::from_json(model)
                .map_err(|e| PredictorError::InvalidBundle(e.to_string()));
        }

        let dir = base_dir.ok_or_else(|| {
            PredictorError::InvalidBundle("no description and no bundle directory".to_string())
        })?;
        let path = dir.join(BUNDLE_FILE);
        let data = fs::read(&path).map_err(|source| PredictorError::Io {
            path: path.clone(),
            source,
        })?;
        BundleDescription::from_json(&data)
            .map_err(|e| PredictorError::InvalidBundle(format!("{}: {e}", path.display())))
    }

    fn load_subgraph(
        &self,
        graph: &SubgraphDescription,
        base_dir: Option<&Path>,
    ) -> Result<Network, NetworkError> {
        let network = Network::new(self.context.clone());
        let embedded = graph.decode_model_data().map_err(|e| {
            PredictorError::InvalidModel(format!("embedded model is not valid base64: {e}"))
        })?;

        match embedded {
            Some(model) => network.load_model(&model, graph.meta_data.as_deref())?,
            None => {
                let model = resolve(base_dir, &graph.model);
                let meta = (!graph.meta.is_empty()).then(|| resolve(base_dir, &graph.meta));
                network.load_model_file(&model, meta.as_deref())?;
            }
        }
        Ok(network)
    }

    fn connect(
        &self,
        description: &BundleDescription,
        networks: &[Network],
    ) -> Result<(Vec<Vec<usize>>, Vec<Tensor>, Vec<Link>), PredictorError> {
        let mut dependencies = Vec::with_capacity(networks.len());
        let mut exposed: Vec<Option<Tensor>> = Vec::new();
        let mut links = Vec::new();

        for (index, graph) in description.graph.iter().enumerate() {
            let inputs = networks[index].inputs();
            if graph.inputs.len() > inputs.len() {
                return Err(PredictorError::InvalidBundle(format!(
                    "subgraph {index} declares {} inputs, its model has {}",
                    graph.inputs.len(),
                    inputs.len()
                )));
            }

            let mut depends_on = Vec::new();
            for (input_index, reference) in graph.inputs.iter().enumerate() {
                let tensor = &inputs[input_index];
                let tensor_index = reference.tensor_index();

                let Some(producer) = reference.source_subgraph() else {
                    expose_input(&mut exposed, tensor_index, tensor);
                    continue;
                };

                let output = networks
                    .get(producer)
                    .and_then(|network| network.outputs().get(tensor_index).cloned())
                    .ok_or_else(|| {
                        PredictorError::InvalidBundle(format!(
                            "subgraph {index} input {input_index} reads missing output {tensor_index} of subgraph {producer}"
                        ))
                    })?;
                let shared = share_buffer(&output, tensor, reference.offset).map_err(|e| {
                    PredictorError::Subgraph {
                        index,
                        source: Box::new(e.into()),
                    }
                })?;
                debug!(
                    producer,
                    consumer = index,
                    output = output.name(),
                    input = tensor.name(),
                    offset = ?reference.offset,
                    "subgraph link"
                );

                if !depends_on.contains(&producer) {
                    depends_on.push(producer);
                }
                links.push(Link {
                    producer,
                    consumer: index,
                    output,
                    shared,
                });
            }
            dependencies.push(depends_on);
        }

        let inputs = exposed
            .into_iter()
            .enumerate()
            .map(|(index, tensor)| {
                tensor.ok_or_else(|| {
                    PredictorError::InvalidBundle(format!("bundle input {index} is not read by any subgraph"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if !description.inputs.is_empty() && description.inputs.len() != inputs.len() {
            return Err(PredictorError::InvalidBundle(format!(
                "bundle declares {} inputs, subgraphs read {}",
                description.inputs.len(),
                inputs.len()
            )));
        }

        Ok((dependencies, inputs, links))
    }

    /// Disable CPU access on shared outputs only hardware touches.
    fn release_cpu_access(&self, links: &[Link], networks: &[Network]) {
        let needs_cpu = |link: &Link| {
            self.outputs.iter().any(|t| t.ptr_eq(&link.output))
                || networks[link.producer].requires_cpu_access()
                || networks[link.consumer].requires_cpu_access()
        };

        for link in links {
            if links
                .iter()
                .filter(|other| other.output.ptr_eq(&link.output))
                .any(&needs_cpu)
            {
                continue;
            }
            link.shared.allow_cpu_access(false);
            if let Some(buffer) = link.output.buffer() {
                buffer.allow_cpu_access(false);
            }
            debug!(
                producer = link.producer,
                consumer = link.consumer,
                "CPU access disabled on shared buffer"
            );
        }
    }

    async fn predict_sequential(&self) -> Vec<usize> {
        let mut unsuccessful: Vec<usize> = Vec::new();
        for subgraph in &self.subgraphs {
            let failed_dependency = subgraph
                .dependencies
                .iter()
                .find(|&&dependency| unsuccessful.contains(&dependency))
                .copied();
            let succeeded = match failed_dependency {
                Some(dependency) => {
                    skip(&self.states, subgraph.index, dependency);
                    false
                }
                None => run_subgraph(subgraph, &self.states).await,
            };
            if !succeeded {
                unsuccessful.push(subgraph.index);
            }
        }
        unsuccessful
    }

    async fn predict_parallel(&self) -> Vec<usize> {
        let semaphore = (self.parallel_limit > 0).then(|| Arc::new(Semaphore::new(self.parallel_limit)));

        // Every outcome channel exists before any task can look for one.
        let (senders, receivers): (Vec<_>, Vec<_>) = self
            .subgraphs
            .iter()
            .map(|_| watch::channel(None::<bool>))
            .unzip();

        let mut tasks = Vec::with_capacity(self.subgraphs.len());
        for (subgraph, outcome) in self.subgraphs.iter().zip(senders) {
            let dependencies: Vec<(usize, watch::Receiver<Option<bool>>)> = subgraph
                .dependencies
                .iter()
                .map(|&dependency| (dependency, receivers[dependency].clone()))
                .collect();
            let subgraph = subgraph.clone();
            let semaphore = semaphore.clone();
            let states = self.states.clone();

            tasks.push(tokio::spawn(async move {
                let succeeded = run_when_ready(&subgraph, dependencies, semaphore, &states).await;
                outcome.send_replace(Some(succeeded));
                succeeded
            }));
        }

        let mut unsuccessful = Vec::new();
        for (index, task) in tasks.into_iter().enumerate() {
            match task.await {
                Ok(true) => {}
                Ok(false) => unsuccessful.push(index),
                Err(join_error) => {
                    error!(subgraph = index, error = %join_error, "subgraph task panicked");
                    self.states.set(index, SubgraphState::Failed);
                    unsuccessful.push(index);
                }
            }
        }
        unsuccessful
    }
}

#[async_trait]
impl Predictor for BundlePredictor {
    fn load_model(
        &mut self,
        model: &[u8],
        metadata: &mut NetworkMetadata,
    ) -> Result<(), PredictorError> {
        let base_dir = metadata.base_dir.clone().or_else(|| {
            DelegateSpec::parse(&metadata.delegate)
                .option("dir")
                .map(PathBuf::from)
        });
        let description = Self::read_description(model, base_dir.as_deref())?;
        validate_bundle(&description).map_err(PredictorError::Validation)?;

        let networks = description
            .graph
            .iter()
            .enumerate()
            .map(|(index, graph)| {
                self.load_subgraph(graph, base_dir.as_deref())
                    .map_err(|e| PredictorError::Subgraph {
                        index,
                        source: Box::new(e),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (dependencies, inputs, links) = self.connect(&description, &networks)?;

        let outputs = description
            .outputs
            .iter()
            .enumerate()
            .map(|(index, reference)| {
                reference
                    .source_subgraph()
                    .and_then(|subgraph| {
                        networks
                            .get(subgraph)?
                            .outputs()
                            .get(reference.tensor_index())
                            .cloned()
                    })
                    .ok_or_else(|| {
                        PredictorError::InvalidBundle(format!("bundle output {index} does not exist"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.inputs = inputs;
        self.outputs = outputs;
        self.release_cpu_access(&links, &networks);

        // Limits beyond what a semaphore can hold are unbounded in practice.
        let limit = self
            .context
            .parallel_limit()
            .unwrap_or(description.parallel_limit)
            .min(Semaphore::MAX_PERMITS);
        self.parallel_limit = if networks.len() > 1 { limit } else { 1 };

        self.subgraphs = networks
            .into_iter()
            .zip(dependencies)
            .enumerate()
            .map(|(index, (network, dependencies))| {
                Arc::new(Subgraph {
                    index,
                    network,
                    dependencies,
                })
            })
            .collect();
        self.states.reset(self.subgraphs.len());

        metadata.inputs = self.inputs.iter().map(|t| t.attributes().clone()).collect();
        metadata.outputs = self.outputs.iter().map(|t| t.attributes().clone()).collect();

        BundleLoaded {
            subgraph_count: self.subgraphs.len(),
            inputs: self.inputs.len(),
            outputs: self.outputs.len(),
            parallel_limit: self.parallel_limit,
        }
        .log();
        Ok(())
    }

    async fn predict(&self) -> Result<(), PredictorError> {
        if self.subgraphs.is_empty() {
            return Err(PredictorError::NotLoaded);
        }
        self.states.reset(self.subgraphs.len());

        let mode = if self.parallel_limit == 1 {
            "sequential"
        } else {
            "parallel"
        };
        let started = BundleInferenceStarted {
            mode,
            subgraph_count: self.subgraphs.len(),
            parallel_limit: self.parallel_limit,
        };
        started.log();
        let span = started.span("bundle_inference");

        let start = Instant::now();
        let failed = if self.parallel_limit == 1 {
            self.predict_sequential().instrument(span).await
        } else {
            self.predict_parallel().instrument(span).await
        };

        BundleInferenceCompleted {
            duration: start.elapsed(),
            failed: &failed,
        }
        .log();

        if failed.is_empty() {
            Ok(())
        } else {
            Err(PredictorError::SubgraphsFailed { failed })
        }
    }

    // Buffers are attached by the subgraph networks owning the tensors; the
    // bundle network never sees them.
    fn attach_buffer(
        &self,
        _buffer: &Buffer,
        _index: usize,
        _direction: Direction,
    ) -> Result<AttachmentHandle, PredictorError> {
        error!("bundle internal error: attach_buffer");
        Err(self.unsupported("attach_buffer"))
    }

    fn set_buffer(
        &self,
        _buffer: &Buffer,
        _index: usize,
        _direction: Direction,
        _handle: AttachmentHandle,
    ) -> Result<(), PredictorError> {
        error!("bundle internal error: set_buffer");
        Err(self.unsupported("set_buffer"))
    }

    fn detach_buffer(&self, _handle: AttachmentHandle) -> Result<(), PredictorError> {
        error!("bundle internal error: detach_buffer");
        Err(self.unsupported("detach_buffer"))
    }

    fn get_tensor(&self, index: usize, direction: Direction) -> Option<Tensor> {
        let tensors = match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        };
        let tensor = tensors.get(index).cloned();
        if tensor.is_none() {
            error!(%direction, index, "no such bundle tensor");
        }
        tensor
    }

    fn name(&self) -> &'static str {
        BUNDLE_DELEGATE
    }
}

impl BundlePredictor {
    fn unsupported(&self, operation: &'static str) -> PredictorError {
        PredictorError::Unsupported {
            predictor: self.name(),
            operation,
        }
    }
}

fn resolve(base_dir: Option<&Path>, path: &str) -> PathBuf {
    match base_dir {
        Some(dir) => dir.join(path),
        None => PathBuf::from(path),
    }
}

fn expose_input(exposed: &mut Vec<Option<Tensor>>, index: usize, tensor: &Tensor) {
    if exposed.len() <= index {
        exposed.resize(index + 1, None);
    }
    match &exposed[index] {
        None => exposed[index] = Some(tensor.clone()),
        Some(primary) => {
            debug!(bundle_input = index, tensor = tensor.name(), "bundle input feeds another subgraph");
            primary.add_sibling(tensor);
        }
    }
}

/// Bind the producer `output` buffer, or a window of it, to `input`.
fn share_buffer(output: &Tensor, input: &Tensor, offset: Option<usize>) -> Result<Buffer, TensorError> {
    let buffer = output.data_buffer().ok_or_else(|| TensorError::NoBuffer {
        tensor: output.name().to_string(),
    })?;
    let shared = match offset {
        None => buffer,
        Some(offset) => Buffer::sub_range(&buffer, offset, input.size())?,
    };
    input.set_buffer(Some(&shared))?;
    Ok(shared)
}

fn skip(states: &StateBoard, index: usize, dependency: usize) {
    states.set(index, SubgraphState::Skipped);
    SubgraphSkipped { index, dependency }.log();
}

async fn run_subgraph(subgraph: &Subgraph, states: &StateBoard) -> bool {
    states.set(subgraph.index, SubgraphState::Running);
    let started = SubgraphStarted {
        index: subgraph.index,
        dependencies: &subgraph.dependencies,
    };
    started.log();

    let start = Instant::now();
    let result = subgraph
        .network
        .predict()
        .instrument(started.span("subgraph_inference"))
        .await;
    match result {
        Ok(()) => {
            states.set(subgraph.index, SubgraphState::Succeeded);
            SubgraphCompleted {
                index: subgraph.index,
                duration: start.elapsed(),
            }
            .log();
            true
        }
        Err(e) => {
            states.set(subgraph.index, SubgraphState::Failed);
            SubgraphFailed {
                index: subgraph.index,
                error: &e,
            }
            .log();
            false
        }
    }
}

async fn run_when_ready(
    subgraph: &Subgraph,
    dependencies: Vec<(usize, watch::Receiver<Option<bool>>)>,
    semaphore: Option<Arc<Semaphore>>,
    states: &StateBoard,
) -> bool {
    states.set(subgraph.index, SubgraphState::Waiting);

    for (dependency, mut outcome) in dependencies {
        // A sender dropped without an outcome means the dependency task died.
        let succeeded = outcome
            .wait_for(Option::is_some)
            .await
            .map(|value| *value == Some(true))
            .unwrap_or(false);
        if !succeeded {
            skip(states, subgraph.index, dependency);
            return false;
        }
    }

    let _permit = match &semaphore {
        Some(semaphore) => match semaphore.acquire().await {
            Ok(permit) => Some(permit),
            Err(e) => {
                error!(subgraph = subgraph.index, error = %e, "failed to acquire execution slot");
                states.set(subgraph.index, SubgraphState::Failed);
                return false;
            }
        },
        None => None,
    };

    run_subgraph(subgraph, states).await
}
