//! Per-object front end: owns the parsed mesh, its model transform and the
//! resource lifecycle, and issues the per-frame update and draw.

use std::{path::Path, sync::Arc};

use asset::{MeshData, ObjLoadOptions, Vertex};
use corelib::{HOLOGRAM_DISTANCE, HeadPose, Vec3, model_transform, vec3};

use crate::{
    device::{DrawCall, GraphicsDevice},
    lifecycle::{LoadError, ModelConstantBuffer, ResourceLifecycle},
    shader_source::{ShaderNames, ShaderSource},
};

/// The mesh is drawn once per eye in a single instanced call.
pub const INSTANCE_COUNT: u32 = 2;

pub const DEFAULT_DEGREES_PER_SECOND: f32 = 45.0;

#[derive(Clone, Debug)]
pub struct MeshRendererConfig {
    pub degrees_per_second: f32,
    pub initial_position: Vec3,
    pub shader_names: ShaderNames,
    pub obj_options: ObjLoadOptions,
}

impl Default for MeshRendererConfig {
    fn default() -> Self {
        Self {
            degrees_per_second: DEFAULT_DEGREES_PER_SECOND,
            initial_position: vec3(0.0, 0.0, -HOLOGRAM_DISTANCE),
            shader_names: ShaderNames::default(),
            obj_options: ObjLoadOptions::default(),
        }
    }
}

pub struct MeshRenderer<D: GraphicsDevice, S: ShaderSource> {
    lifecycle: ResourceLifecycle<D, S>,
    mesh: Arc<MeshData>,
    constants: ModelConstantBuffer,
    position: Vec3,
    degrees_per_second: f32,
}

impl<D: GraphicsDevice, S: ShaderSource> MeshRenderer<D, S> {
    /// Parses the OBJ file at `path` and starts creating its GPU resources.
    ///
    /// An unreadable file produces a renderer for an empty mesh.
    pub fn from_obj_path(
        device: Arc<D>,
        shaders: Arc<S>,
        path: impl AsRef<Path>,
        config: MeshRendererConfig,
    ) -> Result<Self, LoadError> {
        let mesh = asset::load_obj_from_path(path, config.obj_options)?;
        Self::new(device, shaders, mesh, config)
    }

    pub fn new(
        device: Arc<D>,
        shaders: Arc<S>,
        mesh: MeshData,
        config: MeshRendererConfig,
    ) -> Result<Self, LoadError> {
        let mut renderer = Self {
            lifecycle: ResourceLifecycle::new(device, shaders, config.shader_names),
            mesh: Arc::new(mesh),
            constants: ModelConstantBuffer::default(),
            position: config.initial_position,
            degrees_per_second: config.degrees_per_second,
        };
        renderer.create_device_dependent_resources()?;
        Ok(renderer)
    }

    pub fn mesh(&self) -> &MeshData {
        &self.mesh
    }

    pub fn lifecycle(&self) -> &ResourceLifecycle<D, S> {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut ResourceLifecycle<D, S> {
        &mut self.lifecycle
    }

    pub fn is_ready(&self) -> bool {
        self.lifecycle.is_ready()
    }

    /// Staged model constants, refreshed by every [`update`](Self::update).
    pub fn model_constants(&self) -> &ModelConstantBuffer {
        &self.constants
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    pub fn set_degrees_per_second(&mut self, degrees_per_second: f32) {
        self.degrees_per_second = degrees_per_second;
    }

    /// Moves the model onto the gaze ray, `HOLOGRAM_DISTANCE` in front of the
    /// viewer. Without a pose the position is left unchanged.
    pub fn position_hologram(&mut self, pose: Option<&HeadPose>) {
        if let Some(pose) = pose {
            self.set_position(pose.gaze_point(HOLOGRAM_DISTANCE));
        }
    }

    /// Restarts resource creation, e.g. after the device was recreated.
    pub fn create_device_dependent_resources(&mut self) -> Result<(), LoadError> {
        self.lifecycle.begin_load(Arc::clone(&self.mesh))
    }

    pub fn release_device_dependent_resources(&mut self) {
        self.lifecycle.release();
    }

    /// Recomputes the model transform and uploads it once resources exist.
    pub fn update(&mut self, elapsed_seconds: f64) {
        let model = model_transform(elapsed_seconds, self.degrees_per_second, self.position);
        self.constants.model = model.to_cols_array_2d();

        let Some(resources) = self.lifecycle.resources() else {
            return;
        };
        self.lifecycle.device().update_buffer(
            &resources.model_constant_buffer,
            bytemuck::bytes_of(&self.constants),
        );
    }

    /// Draws the mesh twice (one instance per eye). Does nothing until the
    /// resources are ready.
    pub fn render(&self) {
        let Some(resources) = self.lifecycle.resources() else {
            return;
        };
        self.lifecycle.device().draw_indexed_instanced(&DrawCall {
            vertex_buffer: &resources.vertex_buffer,
            vertex_stride: Vertex::STRIDE,
            index_buffer: &resources.index_buffer,
            index_count: resources.index_count,
            instance_count: INSTANCE_COUNT,
            input_layout: &resources.input_layout,
            vertex_shader: &resources.vertex_shader,
            constant_buffer: &resources.model_constant_buffer,
            geometry_shader: resources.geometry_shader.as_ref(),
            pixel_shader: &resources.pixel_shader,
        });
    }
}
