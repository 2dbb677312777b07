//! wgpu implementation of [`GraphicsDevice`], rendering into an offscreen
//! color + depth target.
//! wgpu = 23.x
//!
//! Shader "bytecode" is WGSL text. wgpu has no geometry stage, so the
//! pass-through geometry shader is compiled (validated) and kept alive but
//! never bound; viewport array indexing is reported from `MULTIVIEW`.

use std::{
    borrow::Cow,
    num::NonZeroU64,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::Context;
use parking_lot::Mutex;
use wgpu::{
    BindGroupLayout, BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingType, BlendState,
    BufferBindingType, BufferUsages, ColorTargetState, ColorWrites, CommandEncoder,
    CommandEncoderDescriptor, DepthBiasState, DepthStencilState, Device, DeviceDescriptor,
    Extent3d, Features, FragmentState, Instance, InstanceDescriptor, Limits, LoadOp, Operations,
    PipelineLayoutDescriptor, PowerPreference, Queue, RenderPassColorAttachment,
    RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor, ShaderModuleDescriptor,
    ShaderStages, StoreOp, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
    TextureView, TextureViewDescriptor, VertexBufferLayout, VertexState, VertexStepMode,
    util::DeviceExt,
};

use crate::{
    device::{
        BufferDesc, BufferKind, DeviceError, DrawCall, ElementFormat, GraphicsDevice,
        InputElement, ShaderStage,
    },
    lifecycle::MODEL_CONSTANT_BUFFER_SIZE,
};

const COLOR_FORMAT: TextureFormat = TextureFormat::Rgba8UnormSrgb;
const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;
const VERTEX_ENTRY: &str = "vs_main";
const FRAGMENT_ENTRY: &str = "fs_main";

/// A validated shader module.
pub struct WgpuShader {
    id: u64,
    module: wgpu::ShaderModule,
}

pub struct WgpuInputLayout {
    attributes: Vec<wgpu::VertexAttribute>,
}

/// Offscreen color + depth target.
pub struct WgpuTarget {
    color: wgpu::Texture,
    depth: wgpu::Texture,
    width: u32,
    height: u32,
}

impl WgpuTarget {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

struct Frame {
    encoder: CommandEncoder,
    color_view: TextureView,
    depth_view: TextureView,
}

struct CachedPipeline {
    key: (u64, u64),
    pipeline: RenderPipeline,
}

pub struct WgpuDevice {
    device: Device,
    queue: Queue,
    model_bgl: BindGroupLayout,
    pipeline: Mutex<Option<CachedPipeline>>,
    frame: Mutex<Option<Frame>>,
    next_shader_id: AtomicU64,
}

impl WgpuDevice {
    /// Picks an adapter from `backends` and opens a device on it.
    pub async fn request(backends: wgpu::Backends) -> anyhow::Result<Self> {
        let instance = Instance::new(InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("No suitable GPU adapter")?;
        log::info!("Using adapter: {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: Some("Mesh Device"),
                    required_features: adapter.features() & Features::MULTIVIEW,
                    required_limits: Limits::downlevel_webgl2_defaults()
                        .using_resolution(adapter.limits()),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .context("request_device failed")?;

        Ok(Self::from_device(device, queue))
    }

    pub fn from_device(device: Device, queue: Queue) -> Self {
        let model_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Model BGL"),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::VERTEX,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(MODEL_CONSTANT_BUFFER_SIZE),
                },
                count: None,
            }],
        });

        Self {
            device,
            queue,
            model_bgl,
            pipeline: Mutex::new(None),
            frame: Mutex::new(None),
            next_shader_id: AtomicU64::new(1),
        }
    }

    /// Creates an offscreen render target of the given size.
    pub fn create_target(&self, width: u32, height: u32) -> WgpuTarget {
        let width = width.max(1);
        let height = height.max(1);
        let size = Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let color = self.device.create_texture(&TextureDescriptor {
            label: Some("ColorTex"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth = self.device.create_texture(&TextureDescriptor {
            label: Some("DepthTex"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        WgpuTarget {
            color,
            depth,
            width,
            height,
        }
    }

    /// Clears `target` and starts recording draws into it.
    pub fn begin_frame(&self, target: &WgpuTarget) {
        let color_view = target.color.create_view(&TextureViewDescriptor::default());
        let depth_view = target.depth.create_view(&TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("MainEncoder"),
            });

        encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("ClearPass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: &color_view,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(wgpu::Color {
                        r: 0.05,
                        g: 0.05,
                        b: 0.08,
                        a: 1.0,
                    }),
                    store: StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth_view,
                depth_ops: Some(Operations {
                    load: LoadOp::Clear(1.0),
                    store: StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });

        let previous = self.frame.lock().replace(Frame {
            encoder,
            color_view,
            depth_view,
        });
        if previous.is_some() {
            log::warn!("begin_frame called twice; the unfinished frame was dropped");
        }
    }

    /// Submits the draws recorded since [`begin_frame`](Self::begin_frame).
    pub fn end_frame(&self) {
        let Some(frame) = self.frame.lock().take() else {
            log::warn!("end_frame called without begin_frame");
            return;
        };
        self.queue.submit(Some(frame.encoder.finish()));
    }

    /// Copies the color target back to the CPU as tightly packed RGBA8 rows.
    pub fn read_target_rgba(&self, target: &WgpuTarget) -> anyhow::Result<Vec<u8>> {
        let unpadded_row = target.width * 4;
        let padded_row = unpadded_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback"),
            size: u64::from(padded_row) * u64::from(target.height),
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("ReadbackEncoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &target.color,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(target.height),
                },
            },
            Extent3d {
                width: target.width,
                height: target.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        pollster::block_on(rx)
            .context("readback map callback dropped")?
            .context("failed to map readback buffer")?;

        let mut pixels = Vec::with_capacity((unpadded_row * target.height) as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks(padded_row as usize) {
                pixels.extend_from_slice(&row[..unpadded_row as usize]);
            }
        }
        readback.unmap();
        Ok(pixels)
    }

    fn compile(&self, stage: ShaderStage, bytecode: &[u8]) -> Result<Arc<WgpuShader>, DeviceError> {
        let source = std::str::from_utf8(bytecode).map_err(|err| DeviceError::ShaderCreation {
            stage,
            message: format!("shader source is not UTF-8: {err}"),
        })?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(ShaderModuleDescriptor {
            label: Some(stage.label()),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(DeviceError::ShaderCreation {
                stage,
                message: err.to_string(),
            });
        }

        Ok(Arc::new(WgpuShader {
            id: self.next_shader_id.fetch_add(1, Ordering::Relaxed),
            module,
        }))
    }

    fn build_pipeline(
        &self,
        call: &DrawCall<'_, Self>,
    ) -> Option<RenderPipeline> {
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&PipelineLayoutDescriptor {
                label: Some("Mesh PipelineLayout"),
                bind_group_layouts: &[&self.model_bgl],
                push_constant_ranges: &[],
            });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_render_pipeline(&RenderPipelineDescriptor {
                label: Some("Mesh Pipeline"),
                layout: Some(&pipeline_layout),
                vertex: VertexState {
                    module: &call.vertex_shader.module,
                    entry_point: Some(VERTEX_ENTRY),
                    buffers: &[VertexBufferLayout {
                        array_stride: u64::from(call.vertex_stride),
                        step_mode: VertexStepMode::Vertex,
                        attributes: &call.input_layout.attributes,
                    }],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(FragmentState {
                    module: &call.pixel_shader.module,
                    entry_point: Some(FRAGMENT_ENTRY),
                    targets: &[Some(ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: Some(BlendState::REPLACE),
                        write_mask: ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                // Loader output winds front faces clockwise.
                primitive: wgpu::PrimitiveState {
                    front_face: wgpu::FrontFace::Cw,
                    cull_mode: Some(wgpu::Face::Back),
                    ..Default::default()
                },
                depth_stencil: Some(DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::LessEqual,
                    stencil: wgpu::StencilState::default(),
                    bias: DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            log::error!("Mesh pipeline creation failed: {err}");
            return None;
        }
        Some(pipeline)
    }
}

impl GraphicsDevice for WgpuDevice {
    type VertexShader = Arc<WgpuShader>;
    type PixelShader = Arc<WgpuShader>;
    type GeometryShader = Arc<WgpuShader>;
    type InputLayout = WgpuInputLayout;
    type Buffer = wgpu::Buffer;

    /// Only picks the vertex shader variant; pipelines are built without
    /// multiview.
    fn supports_viewport_array_indexing(&self) -> bool {
        self.device.features().contains(Features::MULTIVIEW)
    }

    fn create_vertex_shader(&self, bytecode: &[u8]) -> Result<Self::VertexShader, DeviceError> {
        self.compile(ShaderStage::Vertex, bytecode)
    }

    fn create_pixel_shader(&self, bytecode: &[u8]) -> Result<Self::PixelShader, DeviceError> {
        self.compile(ShaderStage::Pixel, bytecode)
    }

    fn create_geometry_shader(
        &self,
        bytecode: &[u8],
    ) -> Result<Self::GeometryShader, DeviceError> {
        self.compile(ShaderStage::Geometry, bytecode)
    }

    fn create_input_layout(
        &self,
        elements: &[InputElement],
        _vertex_bytecode: &[u8],
    ) -> Result<Self::InputLayout, DeviceError> {
        let max = self.device.limits().max_vertex_attributes as usize;
        if elements.is_empty() || elements.len() > max {
            return Err(DeviceError::InputLayout(format!(
                "{} attributes requested, device supports 1..={max}",
                elements.len()
            )));
        }
        // Attributes bind to shader locations in declaration order.
        let attributes = elements
            .iter()
            .zip(0u32..)
            .map(|(element, location)| wgpu::VertexAttribute {
                format: match element.format {
                    ElementFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
                },
                offset: u64::from(element.offset),
                shader_location: location,
            })
            .collect();
        Ok(WgpuInputLayout { attributes })
    }

    fn create_buffer(
        &self,
        desc: &BufferDesc,
        contents: Option<&[u8]>,
    ) -> Result<Self::Buffer, DeviceError> {
        let usage = match desc.kind {
            BufferKind::Vertex => BufferUsages::VERTEX,
            BufferKind::Index => BufferUsages::INDEX,
            BufferKind::Constant => BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        };

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = match contents {
            Some(bytes) => self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(desc.label),
                    contents: bytes,
                    usage,
                }),
            None => self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(desc.label),
                size: desc.size,
                usage,
                mapped_at_creation: false,
            }),
        };
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(DeviceError::BufferCreation {
                label: desc.label,
                message: err.to_string(),
            });
        }
        Ok(buffer)
    }

    fn update_buffer(&self, buffer: &Self::Buffer, data: &[u8]) {
        self.queue.write_buffer(buffer, 0, data);
    }

    fn draw_indexed_instanced(&self, call: &DrawCall<'_, Self>) {
        // Empty buffers cannot be sliced; a zero-index draw has nothing to do.
        if call.index_count == 0 {
            log::trace!("Skipping zero-index draw");
            return;
        }

        let mut frame = self.frame.lock();
        let Some(frame) = frame.as_mut() else {
            log::warn!("Draw submitted outside begin_frame/end_frame; ignored");
            return;
        };

        let mut cached = self.pipeline.lock();
        let key = (call.vertex_shader.id, call.pixel_shader.id);
        if cached.as_ref().is_none_or(|c| c.key != key) {
            *cached = self
                .build_pipeline(call)
                .map(|pipeline| CachedPipeline { key, pipeline });
        }
        let Some(cached) = cached.as_ref() else {
            return;
        };
        if call.geometry_shader.is_some() {
            log::trace!("No geometry stage in wgpu; pass-through shader left unbound");
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Model BG"),
            layout: &self.model_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: call.constant_buffer.as_entire_binding(),
            }],
        });

        let mut rpass = frame.encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("MeshPass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: &frame.color_view,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Load,
                    store: StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &frame.depth_view,
                depth_ops: Some(Operations {
                    load: LoadOp::Load,
                    store: StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });

        rpass.set_pipeline(&cached.pipeline);
        rpass.set_bind_group(0, &bind_group, &[]);
        rpass.set_vertex_buffer(0, call.vertex_buffer.slice(..));
        rpass.set_index_buffer(call.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        rpass.draw_indexed(0..call.index_count, 0, 0..call.instance_count);
    }
}
