//! Mesh renderer: GPU resource lifecycle for a loaded OBJ mesh and the
//! per-frame transform and instanced draw.
//!
//! [`GraphicsDevice`] abstracts the backend; [`WgpuDevice`] is the wgpu one.

pub mod device;
pub mod lifecycle;
pub mod mesh_renderer;
pub mod shader_source;
pub mod wgpu_device;

#[cfg(test)]
mod testing;

pub use device::{DeviceError, DrawCall, GraphicsDevice, ShaderStage};
pub use lifecycle::{LoadError, LoadState, ModelConstantBuffer, RenderResources, ResourceLifecycle};
pub use mesh_renderer::{INSTANCE_COUNT, MeshRenderer, MeshRendererConfig};
pub use shader_source::{FileShaderSource, ShaderNames, ShaderSource};
pub use wgpu_device::{WgpuDevice, WgpuTarget};
