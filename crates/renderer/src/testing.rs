//! Recording device and scripted shader sources for unit tests.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::{Context, anyhow};
use futures::channel::oneshot;
use parking_lot::Mutex;

use crate::{
    device::{BufferDesc, BufferKind, DeviceError, DrawCall, GraphicsDevice, InputElement, ShaderStage},
    shader_source::ShaderSource,
};

/// Creation step at which [`MockDevice`] reports a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailPoint {
    PixelShader,
    IndexBuffer,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCall {
    CreateVertexShader,
    CreatePixelShader,
    CreateGeometryShader,
    CreateInputLayout(Vec<InputElement>),
    CreateBuffer(BufferDesc),
    UpdateBuffer { buffer: u64, len: usize },
    Draw(DrawRecord),
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawRecord {
    pub vertex_buffer: u64,
    pub index_buffer: u64,
    pub constant_buffer: u64,
    pub vertex_stride: u32,
    pub index_count: u32,
    pub instance_count: u32,
    pub geometry_shader: bool,
}

/// Resource handle that counts itself while alive.
#[derive(Debug)]
pub struct MockHandle {
    pub id: u64,
    live: Arc<AtomicUsize>,
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockDevice {
    vprt: bool,
    fail_at: Option<FailPoint>,
    calls: Mutex<Vec<DeviceCall>>,
    next_id: Mutex<u64>,
    live: Arc<AtomicUsize>,
}

impl MockDevice {
    pub fn new(supports_viewport_array_indexing: bool) -> Self {
        Self {
            vprt: supports_viewport_array_indexing,
            fail_at: None,
            calls: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_at(mut self, point: FailPoint) -> Self {
        self.fail_at = Some(point);
        self
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().clone()
    }

    pub fn draws(&self) -> Vec<DrawRecord> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                DeviceCall::Draw(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn record(&self, call: DeviceCall) {
        self.calls.lock().push(call);
    }

    fn handle(&self) -> MockHandle {
        let mut next = self.next_id.lock();
        *next += 1;
        self.live.fetch_add(1, Ordering::SeqCst);
        MockHandle {
            id: *next,
            live: Arc::clone(&self.live),
        }
    }
}

impl GraphicsDevice for MockDevice {
    type VertexShader = MockHandle;
    type PixelShader = MockHandle;
    type GeometryShader = MockHandle;
    type InputLayout = MockHandle;
    type Buffer = MockHandle;

    fn supports_viewport_array_indexing(&self) -> bool {
        self.vprt
    }

    fn create_vertex_shader(&self, _bytecode: &[u8]) -> Result<MockHandle, DeviceError> {
        self.record(DeviceCall::CreateVertexShader);
        Ok(self.handle())
    }

    fn create_pixel_shader(&self, _bytecode: &[u8]) -> Result<MockHandle, DeviceError> {
        self.record(DeviceCall::CreatePixelShader);
        if self.fail_at == Some(FailPoint::PixelShader) {
            return Err(DeviceError::ShaderCreation {
                stage: ShaderStage::Pixel,
                message: "rejected by mock".to_owned(),
            });
        }
        Ok(self.handle())
    }

    fn create_geometry_shader(&self, _bytecode: &[u8]) -> Result<MockHandle, DeviceError> {
        self.record(DeviceCall::CreateGeometryShader);
        Ok(self.handle())
    }

    fn create_input_layout(
        &self,
        elements: &[InputElement],
        _vertex_bytecode: &[u8],
    ) -> Result<MockHandle, DeviceError> {
        self.record(DeviceCall::CreateInputLayout(elements.to_vec()));
        Ok(self.handle())
    }

    fn create_buffer(
        &self,
        desc: &BufferDesc,
        contents: Option<&[u8]>,
    ) -> Result<MockHandle, DeviceError> {
        self.record(DeviceCall::CreateBuffer(*desc));
        if let Some(bytes) = contents {
            assert_eq!(bytes.len() as u64, desc.size, "initial data must fill the buffer");
        }
        if desc.kind == BufferKind::Index && self.fail_at == Some(FailPoint::IndexBuffer) {
            return Err(DeviceError::DeviceLost);
        }
        Ok(self.handle())
    }

    fn update_buffer(&self, buffer: &MockHandle, data: &[u8]) {
        self.record(DeviceCall::UpdateBuffer {
            buffer: buffer.id,
            len: data.len(),
        });
    }

    fn draw_indexed_instanced(&self, call: &DrawCall<'_, Self>) {
        self.record(DeviceCall::Draw(DrawRecord {
            vertex_buffer: call.vertex_buffer.id,
            index_buffer: call.index_buffer.id,
            constant_buffer: call.constant_buffer.id,
            vertex_stride: call.vertex_stride,
            index_count: call.index_count,
            instance_count: call.instance_count,
            geometry_shader: call.geometry_shader.is_some(),
        }));
    }
}

/// Answers immediately with placeholder bytes for the names it knows.
pub struct StaticShaderSource {
    known: Vec<String>,
    requested: Mutex<Vec<String>>,
}

impl StaticShaderSource {
    pub fn all() -> Self {
        Self::with(&[
            "vertex_shader",
            "vprt_vertex_shader",
            "pixel_shader",
            "geometry_shader",
        ])
    }

    pub fn with(names: &[&str]) -> Self {
        Self {
            known: names.iter().map(|n| (*n).to_owned()).collect(),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }
}

impl ShaderSource for StaticShaderSource {
    async fn read_bytes(&self, name: &str) -> anyhow::Result<Vec<u8>> {
        self.requested.lock().push(name.to_owned());
        if self.known.iter().any(|n| n == name) {
            Ok(format!("// {name}").into_bytes())
        } else {
            Err(anyhow!("no shader named '{name}'"))
        }
    }
}

/// Holds every request until the test opens its gate.
pub struct GatedShaderSource {
    pending: Mutex<HashMap<String, oneshot::Receiver<Vec<u8>>>>,
}

pub struct Gates {
    senders: Mutex<HashMap<String, oneshot::Sender<Vec<u8>>>>,
}

impl Gates {
    pub fn open(&self, name: &str) {
        let sender = self
            .senders
            .lock()
            .remove(name)
            .unwrap_or_else(|| panic!("no gate named '{name}'"));
        let _ = sender.send(format!("// {name}").into_bytes());
    }
}

impl GatedShaderSource {
    pub fn new(names: &[&str]) -> (Self, Gates) {
        let mut pending = HashMap::new();
        let mut senders = HashMap::new();
        for name in names {
            let (tx, rx) = oneshot::channel();
            pending.insert((*name).to_owned(), rx);
            senders.insert((*name).to_owned(), tx);
        }
        (
            Self {
                pending: Mutex::new(pending),
            },
            Gates {
                senders: Mutex::new(senders),
            },
        )
    }
}

impl ShaderSource for GatedShaderSource {
    async fn read_bytes(&self, name: &str) -> anyhow::Result<Vec<u8>> {
        let receiver = self
            .pending
            .lock()
            .remove(name)
            .ok_or_else(|| anyhow!("no gate named '{name}'"))?;
        receiver.await.context("gate dropped before opening")
    }
}
