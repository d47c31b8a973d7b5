//! Inference Session Pool
//!
//! Holds one loaded session per model of the active `ModelSpec`. The pool is
//! built lazily on first use, at most once at a time, and torn down
//! explicitly by the memory strategy or before the execution configuration
//! changes. Each model carries a bounded call limiter so a session never
//! sees more concurrent calls than configured.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use openvino::{CompiledModel, Core, ElementType, Shape, Tensor};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info};

use crate::config::InferenceConfig;
use crate::error::RestorerError;
use crate::service::lifecycle::ProcessManager;

use super::registry::{ModelKind, ModelSource, ModelSpec};

/// A loaded model that maps named float tensors to output tensors
pub trait InferenceSession: Send + Sync {
    /// Run the model; outputs are returned in model order.
    fn run(&self, inputs: &[(&str, ArrayViewD<'_, f32>)]) -> Result<Vec<ArrayD<f32>>>;
}

/// Builds sessions for model sources under an execution configuration
pub trait SessionFactory: Send + Sync {
    fn create_session(
        &self,
        source: &ModelSource,
        inference: &InferenceConfig,
    ) -> Result<Arc<dyn InferenceSession>>;
}

/// Counting limiter for calls into one session
struct CallLimiter {
    available: Mutex<usize>,
    released: Condvar,
}

impl CallLimiter {
    fn new(permits: usize) -> Self {
        Self {
            available: Mutex::new(permits.max(1)),
            released: Condvar::new(),
        }
    }

    fn acquire(&self) -> CallPermit<'_> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;
        CallPermit { limiter: self }
    }
}

struct CallPermit<'a> {
    limiter: &'a CallLimiter,
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        *self.limiter.available.lock() += 1;
        self.limiter.released.notify_one();
    }
}

struct ModelSlot {
    session: Arc<dyn InferenceSession>,
    limiter: CallLimiter,
}

/// Loaded sessions keyed by model
pub struct InferenceSessionPool {
    slots: HashMap<ModelKind, ModelSlot>,
}

impl InferenceSessionPool {
    /// Build sessions for every source of `spec`
    pub fn build(
        spec: &ModelSpec,
        inference: &InferenceConfig,
        factory: &dyn SessionFactory,
    ) -> Result<Self> {
        let mut slots = HashMap::with_capacity(spec.sources.len());

        for source in &spec.sources {
            info!("Loading model: {} from {}", source.kind.as_str(), source.path.display());
            let start = Instant::now();

            let session = factory
                .create_session(source, inference)
                .with_context(|| format!("Failed to load model {}", source.kind.as_str()))?;

            info!("Model {} loaded in {:?}", source.kind.as_str(), start.elapsed());
            slots.insert(
                source.kind,
                ModelSlot {
                    session,
                    limiter: CallLimiter::new(inference.max_concurrent_calls),
                },
            );
        }

        Ok(Self { slots })
    }

    /// Run a model, waiting for a free call slot first
    pub fn run(
        &self,
        kind: ModelKind,
        inputs: &[(&str, ArrayViewD<'_, f32>)],
    ) -> Result<Vec<ArrayD<f32>>> {
        let slot = self
            .slots
            .get(&kind)
            .ok_or(RestorerError::MissingSession(kind.as_str()))?;

        let _permit = slot.limiter.acquire();
        slot.session.run(inputs)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Owner of the lazily built session pool
pub struct SessionPoolCache {
    spec: ModelSpec,
    inference: RwLock<InferenceConfig>,
    factory: Arc<dyn SessionFactory>,
    process: Arc<ProcessManager>,
    pool: RwLock<Option<Arc<InferenceSessionPool>>>,
    init: Mutex<()>,
}

impl SessionPoolCache {
    pub fn new(
        spec: ModelSpec,
        inference: InferenceConfig,
        factory: Arc<dyn SessionFactory>,
        process: Arc<ProcessManager>,
    ) -> Self {
        Self {
            spec,
            inference: RwLock::new(inference),
            factory,
            process,
            pool: RwLock::new(None),
            init: Mutex::new(()),
        }
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    /// Get the pool, building it if needed.
    ///
    /// Concurrent first callers serialize on the init lock; only the first
    /// one builds. Building waits while model files are being checked.
    pub fn get(&self) -> Result<Arc<InferenceSessionPool>> {
        if let Some(pool) = self.pool.read().as_ref() {
            return Ok(pool.clone());
        }

        let _init = self.init.lock();
        self.process.wait_until_checked();

        // Double-check after acquiring the init lock
        if let Some(pool) = self.pool.read().as_ref() {
            return Ok(pool.clone());
        }

        let inference = self.inference.read().clone();
        let pool = Arc::new(InferenceSessionPool::build(&self.spec, &inference, self.factory.as_ref())?);
        *self.pool.write() = Some(pool.clone());

        Ok(pool)
    }

    pub fn is_loaded(&self) -> bool {
        self.pool.read().is_some()
    }

    /// Drop the pool; the next `get` rebuilds it.
    ///
    /// Callers must not clear while inference calls are in flight.
    pub fn clear(&self) {
        if self.pool.write().take().is_some() {
            info!("Cleared inference session pool for {}", self.spec.model.as_str());
        }
    }

    /// Replace the execution configuration, tearing the pool down first
    pub fn reconfigure(&self, inference: InferenceConfig) {
        let _init = self.init.lock();
        self.clear();
        *self.inference.write() = inference;
    }
}

/// Wrapper for OpenVINO Core that implements Send
struct SafeCore(Core);
unsafe impl Send for SafeCore {}

/// Wrapper for OpenVINO CompiledModel that implements Send
struct SafeCompiledModel(CompiledModel);
unsafe impl Send for SafeCompiledModel {}

/// OpenVINO compiled model behind the session trait
pub struct OpenVinoSession {
    name: &'static str,
    // CompiledModel methods need &mut in the Rust bindings
    compiled: Mutex<SafeCompiledModel>,
}

impl InferenceSession for OpenVinoSession {
    fn run(&self, inputs: &[(&str, ArrayViewD<'_, f32>)]) -> Result<Vec<ArrayD<f32>>> {
        let mut request = self.compiled.lock().0.create_infer_request()?;

        for (name, array) in inputs {
            let tensor = to_tensor(array)?;
            request
                .set_tensor(name, &tensor)
                .with_context(|| format!("Failed to set input {} of {}", name, self.name))?;
        }

        request.infer()?;

        let mut outputs = Vec::new();
        for index in 0..32 {
            match request.get_output_tensor_by_index(index) {
                Ok(tensor) => outputs.push(from_tensor(&tensor)?),
                Err(_) => break,
            }
        }
        debug!("{} produced {} outputs", self.name, outputs.len());

        Ok(outputs)
    }
}

fn to_tensor(array: &ArrayViewD<'_, f32>) -> Result<Tensor> {
    let dims: Vec<i64> = array.shape().iter().map(|d| *d as i64).collect();
    let shape = Shape::new(&dims)?;
    let mut tensor = Tensor::new(ElementType::F32, &shape)?;

    let raw = tensor.get_raw_data_mut()?;
    for (bytes, value) in raw.chunks_exact_mut(4).zip(array.iter()) {
        bytes.copy_from_slice(&value.to_ne_bytes());
    }
    Ok(tensor)
}

fn from_tensor(tensor: &Tensor) -> Result<ArrayD<f32>> {
    let shape = tensor.get_shape()?;
    let dims: Vec<usize> = shape.get_dimensions().iter().map(|d| *d as usize).collect();

    let data: Vec<f32> = tensor
        .get_raw_data()?
        .chunks_exact(4)
        .map(|bytes| f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect();

    ArrayD::from_shape_vec(IxDyn(&dims), data).context("Output tensor size does not match its shape")
}

/// Compiles ONNX model files with OpenVINO
pub struct OpenVinoSessionFactory {
    core: Mutex<SafeCore>,
}

impl OpenVinoSessionFactory {
    pub fn new() -> Result<Self> {
        Ok(Self {
            core: Mutex::new(SafeCore(Core::new()?)),
        })
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("Model path is not valid UTF-8: {}", path.display()))
}

impl SessionFactory for OpenVinoSessionFactory {
    fn create_session(
        &self,
        source: &ModelSource,
        inference: &InferenceConfig,
    ) -> Result<Arc<dyn InferenceSession>> {
        let device = inference.device();
        let mut core = self.core.lock();

        let model = core.0.read_model_from_file(path_str(&source.path)?, "")?;
        let compiled = core.0.compile_model(&model, device.as_str().into())?;
        debug!("Compiled {} for {}", source.kind.as_str(), device);

        Ok(Arc::new(OpenVinoSession {
            name: source.kind.as_str(),
            compiled: Mutex::new(SafeCompiledModel(compiled)),
        }))
    }
}
