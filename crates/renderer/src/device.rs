//! Graphics device boundary: resource creation and draw submission.
//!
//! The lifecycle and mesh renderer only talk to the GPU through
//! [`GraphicsDevice`]. Handles are associated types so each backend keeps
//! its own resource representation.

use asset::Vertex;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Geometry,
}

impl ShaderStage {
    pub fn label(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "Vertex shader",
            ShaderStage::Pixel => "Pixel shader",
            ShaderStage::Geometry => "Geometry shader",
        }
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{} creation failed: {message}", .stage.label())]
    ShaderCreation { stage: ShaderStage, message: String },

    #[error("input layout creation failed: {0}")]
    InputLayout(String),

    #[error("buffer '{label}' creation failed: {message}")]
    BufferCreation { label: &'static str, message: String },

    #[error("graphics device lost")]
    DeviceLost,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementFormat {
    Float32x3,
}

impl ElementFormat {
    pub const fn size(self) -> u32 {
        match self {
            ElementFormat::Float32x3 => 12,
        }
    }
}

/// One attribute of the per-vertex input layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputElement {
    pub semantic: &'static str,
    pub format: ElementFormat,
    pub offset: u32,
}

/// Input layout matching [`Vertex`]: position then color, 12 bytes apart.
pub const VERTEX_INPUT_LAYOUT: [InputElement; 2] = [
    InputElement {
        semantic: "POSITION",
        format: ElementFormat::Float32x3,
        offset: 0,
    },
    InputElement {
        semantic: "COLOR",
        format: ElementFormat::Float32x3,
        offset: Vertex::COLOR_OFFSET,
    },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    /// 32-bit unsigned indices.
    Index,
    /// Shader constants, rewritten every frame.
    Constant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: &'static str,
    pub kind: BufferKind,
    pub size: u64,
}

/// Everything bound for one indexed, instanced triangle-list draw.
pub struct DrawCall<'a, D: GraphicsDevice + ?Sized> {
    pub vertex_buffer: &'a D::Buffer,
    pub vertex_stride: u32,
    pub index_buffer: &'a D::Buffer,
    pub index_count: u32,
    pub instance_count: u32,
    pub input_layout: &'a D::InputLayout,
    pub vertex_shader: &'a D::VertexShader,
    pub constant_buffer: &'a D::Buffer,
    /// Bound only on devices without viewport array indexing.
    pub geometry_shader: Option<&'a D::GeometryShader>,
    pub pixel_shader: &'a D::PixelShader,
}

pub trait GraphicsDevice: Send + Sync + 'static {
    type VertexShader: Send + Sync;
    type PixelShader: Send + Sync;
    type GeometryShader: Send + Sync;
    type InputLayout: Send + Sync;
    type Buffer: Send + Sync;

    /// Whether any shader feeding the rasterizer may select the render target
    /// array index. Without it a pass-through geometry stage is required.
    fn supports_viewport_array_indexing(&self) -> bool;

    fn create_vertex_shader(&self, bytecode: &[u8]) -> Result<Self::VertexShader, DeviceError>;

    fn create_pixel_shader(&self, bytecode: &[u8]) -> Result<Self::PixelShader, DeviceError>;

    fn create_geometry_shader(&self, bytecode: &[u8])
    -> Result<Self::GeometryShader, DeviceError>;

    /// Validates `elements` against the vertex shader they will feed.
    fn create_input_layout(
        &self,
        elements: &[InputElement],
        vertex_bytecode: &[u8],
    ) -> Result<Self::InputLayout, DeviceError>;

    /// Creates a buffer, zero-filled when `contents` is `None`.
    fn create_buffer(
        &self,
        desc: &BufferDesc,
        contents: Option<&[u8]>,
    ) -> Result<Self::Buffer, DeviceError>;

    fn update_buffer(&self, buffer: &Self::Buffer, data: &[u8]);

    fn draw_indexed_instanced(&self, call: &DrawCall<'_, Self>);
}
