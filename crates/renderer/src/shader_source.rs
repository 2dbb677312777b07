//! Byte-loading service for compiled/source shaders, keyed by name.

use std::{
    future::Future,
    path::{Path, PathBuf},
    thread,
};

use anyhow::Context;
use futures::channel::oneshot;

pub trait ShaderSource: Send + Sync + 'static {
    /// Fetches the bytes of the shader called `name`.
    fn read_bytes(&self, name: &str) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send;
}

/// Shader names requested by the resource lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderNames {
    pub vertex: String,
    /// Vertex shader variant that selects the render target array index
    /// itself.
    pub vprt_vertex: String,
    pub pixel: String,
    /// Pass-through geometry shader for devices without viewport array
    /// indexing.
    pub geometry: String,
}

impl ShaderNames {
    pub fn vertex_for(&self, viewport_array_indexing: bool) -> &str {
        if viewport_array_indexing {
            &self.vprt_vertex
        } else {
            &self.vertex
        }
    }
}

impl Default for ShaderNames {
    fn default() -> Self {
        Self {
            vertex: "vertex_shader".to_owned(),
            vprt_vertex: "vprt_vertex_shader".to_owned(),
            pixel: "pixel_shader".to_owned(),
            geometry: "geometry_shader".to_owned(),
        }
    }
}

/// Reads `<root>/<name>.<extension>` from disk.
///
/// Each read runs on its own thread, so requests joined together overlap.
#[derive(Clone, Debug)]
pub struct FileShaderSource {
    root: PathBuf,
    extension: String,
}

impl FileShaderSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self::with_extension(root, "wgsl")
    }

    pub fn with_extension(root: impl AsRef<Path>, extension: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extension: extension.into(),
        }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name).with_extension(&self.extension)
    }
}

impl ShaderSource for FileShaderSource {
    async fn read_bytes(&self, name: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.path_for(name);
        let (tx, rx) = oneshot::channel();
        let file = path.clone();
        thread::Builder::new()
            .name(format!("shader-read-{name}"))
            .spawn(move || {
                let _ = tx.send(std::fs::read(file));
            })
            .context("Failed to spawn shader reader thread")?;

        let bytes = rx
            .await
            .context("Shader reader thread exited without a result")?
            .with_context(|| format!("Failed to read shader '{}'", path.display()))?;
        log::debug!("Read {} bytes for shader '{name}'", bytes.len());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_vertex_variant_by_capability() {
        let names = ShaderNames::default();
        assert_eq!(names.vertex_for(true), "vprt_vertex_shader");
        assert_eq!(names.vertex_for(false), "vertex_shader");
    }

    #[test]
    fn reads_named_files_from_root() {
        let root = std::env::temp_dir().join(format!("shader-source-{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("pixel_shader.wgsl"), b"// ps").unwrap();

        let source = FileShaderSource::new(&root);
        let bytes = pollster::block_on(source.read_bytes("pixel_shader")).unwrap();
        assert_eq!(bytes, b"// ps");

        let missing = pollster::block_on(source.read_bytes("geometry_shader"));
        assert!(missing.is_err());

        std::fs::remove_dir_all(&root).unwrap();
    }

    // A FIFO read blocks until its writer shows up. The writer serves the
    // second pipe first, so the reads only complete if both are in flight.
    #[cfg(unix)]
    #[test]
    fn joined_reads_overlap() {
        use std::{io::Write, sync::mpsc, time::Duration};

        let root = std::env::temp_dir().join(format!("shader-fifo-{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        for name in ["first", "second"] {
            let status = std::process::Command::new("mkfifo")
                .arg(root.join(format!("{name}.wgsl")))
                .status()
                .unwrap();
            assert!(status.success());
        }

        let source = FileShaderSource::new(&root);
        let writer_root = root.clone();
        thread::spawn(move || {
            for name in ["second", "first"] {
                let mut pipe = std::fs::OpenOptions::new()
                    .write(true)
                    .open(writer_root.join(format!("{name}.wgsl")))
                    .unwrap();
                pipe.write_all(format!("// {name}").as_bytes()).unwrap();
            }
        });

        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            let both = pollster::block_on(async {
                futures::try_join!(source.read_bytes("first"), source.read_bytes("second"))
            });
            let _ = done_tx.send(both.map_err(|e| e.to_string()));
        });

        let (first, second) = done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("reads did not overlap")
            .unwrap();
        assert_eq!(first, b"// first");
        assert_eq!(second, b"// second");

        std::fs::remove_dir_all(&root).unwrap();
    }
}
