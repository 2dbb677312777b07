//! Device-dependent resource lifecycle for one mesh.
//!
//! `begin_load` hands a creation job to a worker thread and returns at once.
//! The job loads the shader bytes concurrently, creates the shader stages,
//! joins them, then builds the vertex and index buffers. The finished
//! resource set is published into the current [`Generation`] and only then
//! is its `ready` flag raised, so the frame thread either sees nothing or a
//! complete set.
//!
//! ```text
//! Uninitialized -> ShadersLoading -> ShadersReady -> BuffersBuilding -> Ready
//!                         \______________________________________/
//!                                         |
//!                                       Failed
//! ```
//!
//! `release` returns any state to `Uninitialized`.

use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    thread::{self, JoinHandle},
};

use asset::{MeshData, ObjError};
use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use crate::{
    device::{BufferDesc, BufferKind, DeviceError, GraphicsDevice, VERTEX_INPUT_LAYOUT},
    shader_source::{ShaderNames, ShaderSource},
};

/// Model transform constants (16-byte aligned).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ModelConstantBuffer {
    pub model: [[f32; 4]; 4],
}

pub const MODEL_CONSTANT_BUFFER_SIZE: u64 = std::mem::size_of::<ModelConstantBuffer>() as u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LoadState {
    Uninitialized = 0,
    ShadersLoading = 1,
    ShadersReady = 2,
    BuffersBuilding = 3,
    Ready = 4,
    Failed = 5,
}

impl LoadState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LoadState::ShadersLoading,
            2 => LoadState::ShadersReady,
            3 => LoadState::BuffersBuilding,
            4 => LoadState::Ready,
            5 => LoadState::Failed,
            _ => LoadState::Uninitialized,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Mesh(#[from] ObjError),

    #[error("failed to load shader '{name}'")]
    ShaderBytes {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("mesh has {0} indices, more than a 32-bit draw can address")]
    TooManyIndices(usize),

    #[error("failed to spawn resource loader thread")]
    Spawn(#[source] std::io::Error),

    #[error("resource loader thread panicked")]
    WorkerPanicked,
}

/// Device handles for one load generation.
pub struct RenderResources<D: GraphicsDevice> {
    pub vertex_shader: D::VertexShader,
    pub input_layout: D::InputLayout,
    pub pixel_shader: D::PixelShader,
    /// Present only when the device lacks viewport array indexing.
    pub geometry_shader: Option<D::GeometryShader>,
    pub model_constant_buffer: D::Buffer,
    pub vertex_buffer: D::Buffer,
    pub index_buffer: D::Buffer,
    pub index_count: u32,
}

/// State shared between the owner and the worker of one load.
///
/// Every `begin_load` gets a fresh generation; `release` detaches it, so a
/// late completion can only publish into a generation nobody reads.
struct Generation<D: GraphicsDevice> {
    state: AtomicU8,
    ready: AtomicBool,
    resources: OnceLock<RenderResources<D>>,
    failure: OnceLock<String>,
}

impl<D: GraphicsDevice> Generation<D> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(LoadState::Uninitialized as u8),
            ready: AtomicBool::new(false),
            resources: OnceLock::new(),
            failure: OnceLock::new(),
        }
    }

    fn state(&self) -> LoadState {
        LoadState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: LoadState) {
        log::debug!("Mesh resources: {:?} -> {state:?}", self.state());
        self.state.store(state as u8, Ordering::Release);
    }

    fn publish(&self, resources: RenderResources<D>) {
        if self.resources.set(resources).is_err() {
            log::error!("Mesh resources were already published for this load");
            return;
        }
        self.set_state(LoadState::Ready);
        self.ready.store(true, Ordering::Release);
    }

    fn fail(&self, err: &LoadError) {
        let _ = self.failure.set(err.to_string());
        self.set_state(LoadState::Failed);
    }

    fn resources(&self) -> Option<&RenderResources<D>> {
        if !self.ready.load(Ordering::Acquire) {
            return None;
        }
        self.resources.get()
    }
}

/// Owns the device-dependent resources of one mesh across device generations.
pub struct ResourceLifecycle<D: GraphicsDevice, S: ShaderSource> {
    device: Arc<D>,
    shaders: Arc<S>,
    names: Arc<ShaderNames>,
    generation: Arc<Generation<D>>,
    using_vprt: bool,
    worker: Option<JoinHandle<Result<(), LoadError>>>,
}

impl<D: GraphicsDevice, S: ShaderSource> ResourceLifecycle<D, S> {
    pub fn new(device: Arc<D>, shaders: Arc<S>, names: ShaderNames) -> Self {
        Self {
            device,
            shaders,
            names: Arc::new(names),
            generation: Arc::new(Generation::new()),
            using_vprt: false,
            worker: None,
        }
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn state(&self) -> LoadState {
        self.generation.state()
    }

    pub fn is_ready(&self) -> bool {
        self.generation.ready.load(Ordering::Acquire)
    }

    /// Capability recorded by the current load.
    pub fn uses_viewport_array_indexing(&self) -> bool {
        self.using_vprt
    }

    /// Message of the error that ended the current load, if it failed.
    pub fn last_error(&self) -> Option<&str> {
        self.generation.failure.get().map(String::as_str)
    }

    /// The resource set, once every creation step has finished.
    pub fn resources(&self) -> Option<&RenderResources<D>> {
        self.generation.resources()
    }

    /// Starts creating shaders and buffers for `mesh` without blocking.
    ///
    /// Resources from a previous load are released first.
    pub fn begin_load(&mut self, mesh: Arc<MeshData>) -> Result<(), LoadError> {
        if self.worker.is_some() || self.state() != LoadState::Uninitialized {
            self.release();
        }

        self.using_vprt = self.device.supports_viewport_array_indexing();
        let generation = Arc::new(Generation::new());
        generation.set_state(LoadState::ShadersLoading);
        self.generation = Arc::clone(&generation);

        log::info!(
            "Creating mesh resources ({} vertices, {} indices, viewport array indexing: {})",
            mesh.vertices.len(),
            mesh.indices.len(),
            self.using_vprt
        );

        let job = LoadJob {
            device: Arc::clone(&self.device),
            shaders: Arc::clone(&self.shaders),
            names: Arc::clone(&self.names),
            mesh,
            using_vprt: self.using_vprt,
            generation: Arc::clone(&generation),
        };
        let handle = thread::Builder::new()
            .name("mesh-resource-loader".to_owned())
            .spawn(move || job.run_blocking())
            .map_err(|err| {
                let err = LoadError::Spawn(err);
                generation.fail(&err);
                err
            })?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Blocks until the outstanding load finishes and returns its outcome.
    /// Returns `Ok(())` when no load is outstanding.
    pub fn wait(&mut self) -> Result<(), LoadError> {
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| LoadError::WorkerPanicked)?,
            None => Ok(()),
        }
    }

    /// Drops every device handle and clears the ready flag. Safe in any
    /// state and idempotent.
    ///
    /// Must not be called while a load is still running; if it is, the load
    /// is detached and its result discarded.
    pub fn release(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.is_finished() {
                if worker.join().is_err() {
                    log::error!("Resource loader thread panicked");
                }
            } else {
                log::warn!("Releasing mesh resources while a load is in flight; discarding it");
            }
        }

        self.generation.ready.store(false, Ordering::Release);
        self.using_vprt = false;
        if self.generation.state() != LoadState::Uninitialized {
            log::info!("Releasing mesh resources");
        }
        self.generation = Arc::new(Generation::new());
    }
}

/// Everything the worker needs for one load.
struct LoadJob<D: GraphicsDevice, S: ShaderSource> {
    device: Arc<D>,
    shaders: Arc<S>,
    names: Arc<ShaderNames>,
    mesh: Arc<MeshData>,
    using_vprt: bool,
    generation: Arc<Generation<D>>,
}

impl<D: GraphicsDevice, S: ShaderSource> LoadJob<D, S> {
    fn run_blocking(self) -> Result<(), LoadError> {
        let result = pollster::block_on(self.run());
        match &result {
            Ok(()) => log::info!("Mesh resources ready"),
            Err(err) => {
                log::error!("Mesh resource creation failed: {err}");
                self.generation.fail(err);
            }
        }
        result
    }

    async fn run(&self) -> Result<(), LoadError> {
        let (vertex_stage, pixel_stage, geometry_shader) = futures::try_join!(
            self.create_vertex_stage(),
            self.create_pixel_stage(),
            self.create_geometry_stage(),
        )?;
        let (vertex_shader, input_layout) = vertex_stage;
        let (pixel_shader, model_constant_buffer) = pixel_stage;
        self.generation.set_state(LoadState::ShadersReady);

        self.generation.set_state(LoadState::BuffersBuilding);
        let device = &*self.device;
        let vertex_bytes = self.mesh.vertex_bytes();
        let vertex_buffer = device.create_buffer(
            &BufferDesc {
                label: "Mesh vertex buffer",
                kind: BufferKind::Vertex,
                size: vertex_bytes.len() as u64,
            },
            Some(vertex_bytes),
        )?;
        let index_bytes = self.mesh.index_bytes();
        let index_buffer = device.create_buffer(
            &BufferDesc {
                label: "Mesh index buffer",
                kind: BufferKind::Index,
                size: index_bytes.len() as u64,
            },
            Some(index_bytes),
        )?;
        let index_count = u32::try_from(self.mesh.indices.len())
            .map_err(|_| LoadError::TooManyIndices(self.mesh.indices.len()))?;

        self.generation.publish(RenderResources {
            vertex_shader,
            input_layout,
            pixel_shader,
            geometry_shader,
            model_constant_buffer,
            vertex_buffer,
            index_buffer,
            index_count,
        });
        Ok(())
    }

    async fn read_shader(&self, name: &str) -> Result<Vec<u8>, LoadError> {
        log::debug!("Requesting shader '{name}'");
        self.shaders
            .read_bytes(name)
            .await
            .map_err(|source| LoadError::ShaderBytes {
                name: name.to_owned(),
                source,
            })
    }

    async fn create_vertex_stage(&self) -> Result<(D::VertexShader, D::InputLayout), LoadError> {
        let bytes = self.read_shader(self.names.vertex_for(self.using_vprt)).await?;
        let shader = self.device.create_vertex_shader(&bytes)?;
        let layout = self.device.create_input_layout(&VERTEX_INPUT_LAYOUT, &bytes)?;
        Ok((shader, layout))
    }

    async fn create_pixel_stage(&self) -> Result<(D::PixelShader, D::Buffer), LoadError> {
        let bytes = self.read_shader(&self.names.pixel).await?;
        let shader = self.device.create_pixel_shader(&bytes)?;
        let constants = self.device.create_buffer(
            &BufferDesc {
                label: "Model constant buffer",
                kind: BufferKind::Constant,
                size: MODEL_CONSTANT_BUFFER_SIZE,
            },
            None,
        )?;
        Ok((shader, constants))
    }

    async fn create_geometry_stage(&self) -> Result<Option<D::GeometryShader>, LoadError> {
        if self.using_vprt {
            return Ok(None);
        }
        let bytes = self.read_shader(&self.names.geometry).await?;
        Ok(Some(self.device.create_geometry_shader(&bytes)?))
    }
}
