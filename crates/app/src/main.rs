//! Entry point: loads an OBJ mesh, builds its GPU resources in the
//! background and renders a short offscreen sequence of the rotating model.

use std::{path::PathBuf, str::FromStr, sync::Arc};

use anyhow::{Context, Result};
use asset::ObjLoadOptions;
use corelib::{HeadPose, vec3};
use renderer::{FileShaderSource, MeshRenderer, MeshRendererConfig, WgpuDevice};

/// Frames are stepped on a fixed 60 Hz timeline.
const FRAME_SECONDS: f64 = 1.0 / 60.0;

#[derive(Debug, PartialEq)]
struct Options {
    obj: PathBuf,
    shader_dir: PathBuf,
    backends: wgpu::Backends,
    width: u32,
    height: u32,
    frames: u32,
    degrees_per_second: Option<f32>,
    strict_numbers: bool,
    capture: Option<PathBuf>,
}

/// `--gpu-backend=auto|vulkan|dx12|metal|gl`
#[derive(Clone, Copy, Debug, PartialEq)]
struct BackendArg(wgpu::Backends);

impl FromStr for BackendArg {
    type Err = ();

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let backends = match name.to_ascii_lowercase().as_str() {
            "auto" => wgpu::Backends::all(),
            "vulkan" | "vk" => wgpu::Backends::VULKAN,
            "dx12" | "d3d12" => wgpu::Backends::DX12,
            "metal" | "mtl" => wgpu::Backends::METAL,
            "gl" | "opengl" | "gles" => wgpu::Backends::GL,
            _ => return Err(()),
        };
        Ok(Self(backends))
    }
}

/// `--size=WxH`
#[derive(Clone, Copy, Debug, PartialEq)]
struct SizeArg {
    width: u32,
    height: u32,
}

impl FromStr for SizeArg {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (w, h) = value.split_once(['x', 'X']).ok_or(())?;
        Ok(Self {
            width: w.parse().map_err(|_| ())?,
            height: h.parse().map_err(|_| ())?,
        })
    }
}

/// Last `--{name}=value` wins; unparsable values are reported and ignored.
fn parse_value_arg<T: FromStr>(args: &[String], name: &str) -> Option<T> {
    let prefix = format!("--{name}=");
    let mut value = None;
    for arg in args {
        if let Some(v) = arg.strip_prefix(&prefix) {
            match v.parse::<T>() {
                Ok(parsed) => value = Some(parsed),
                Err(_) => log::warn!("Ignoring invalid value '{v}' for --{name}"),
            }
        }
    }
    value
}

fn parse_options(args: &[String]) -> Options {
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    // --width / --height override the matching half of --size.
    let size = parse_value_arg::<SizeArg>(args, "size");
    let width = parse_value_arg(args, "width").or(size.map(|s| s.width));
    let height = parse_value_arg(args, "height").or(size.map(|s| s.height));
    Options {
        obj: parse_value_arg(args, "obj").unwrap_or_else(|| manifest.join("assets/cube.obj")),
        shader_dir: parse_value_arg(args, "shader-dir").unwrap_or_else(|| manifest.join("shaders")),
        backends: parse_value_arg::<BackendArg>(args, "gpu-backend")
            .map_or(wgpu::Backends::all(), |b| b.0),
        width: width.unwrap_or(1280).max(1),
        height: height.unwrap_or(720).max(1),
        frames: parse_value_arg(args, "frames").unwrap_or(120),
        degrees_per_second: parse_value_arg(args, "degrees-per-second"),
        strict_numbers: args.iter().any(|a| a == "--strict-numbers"),
        capture: parse_value_arg(args, "capture"),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = parse_options(&args);
    log::info!(
        "Starting obj-hologram. Backend: {:?}, target={}x{}, frames={}, obj={}",
        options.backends,
        options.width,
        options.height,
        options.frames,
        options.obj.display()
    );

    let device = Arc::new(pollster::block_on(WgpuDevice::request(options.backends))?);
    let shaders = Arc::new(FileShaderSource::new(&options.shader_dir));

    let mut config = MeshRendererConfig::default();
    if let Some(dps) = options.degrees_per_second {
        config.degrees_per_second = dps;
    }
    if options.strict_numbers {
        config.obj_options = ObjLoadOptions::strict();
    }

    let mut mesh_renderer =
        MeshRenderer::from_obj_path(Arc::clone(&device), shaders, &options.obj, config)
            .with_context(|| format!("failed to load {}", options.obj.display()))?;

    // Viewer at the origin looking down -Z.
    let pose = HeadPose::new(vec3(0.0, 0.0, 0.0), vec3(0.0, 0.0, -1.0));
    mesh_renderer.position_hologram(Some(&pose));

    let target = device.create_target(options.width, options.height);

    // The first frame is issued while resources are still being created.
    device.begin_frame(&target);
    mesh_renderer.update(0.0);
    mesh_renderer.render();
    device.end_frame();

    mesh_renderer
        .lifecycle_mut()
        .wait()
        .context("mesh resources failed to load")?;
    log::info!(
        "Mesh ready: {} vertices, {} triangles, viewport array indexing={}",
        mesh_renderer.mesh().vertices.len(),
        mesh_renderer.mesh().triangle_count(),
        mesh_renderer.lifecycle().uses_viewport_array_indexing()
    );

    for frame in 1..=options.frames {
        device.begin_frame(&target);
        mesh_renderer.update(f64::from(frame) * FRAME_SECONDS);
        mesh_renderer.render();
        device.end_frame();
    }

    if let Some(path) = &options.capture {
        let pixels = device.read_target_rgba(&target)?;
        image::save_buffer(
            path,
            &pixels,
            target.width(),
            target.height(),
            image::ExtendedColorType::Rgba8,
        )
        .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("Captured last frame to {}", path.display());
    }

    mesh_renderer.release_device_dependent_resources();
    log::info!("Graceful shutdown. Bye!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn defaults_without_flags() {
        let options = parse_options(&[]);
        assert_eq!(options.backends, wgpu::Backends::all());
        assert_eq!((options.width, options.height), (1280, 720));
        assert_eq!(options.frames, 120);
        assert!(options.obj.ends_with("assets/cube.obj"));
        assert!(options.shader_dir.ends_with("shaders"));
        assert!(!options.strict_numbers);
        assert_eq!(options.capture, None);
    }

    fn size_of(list: &[&str]) -> (u32, u32) {
        let options = parse_options(&args(list));
        (options.width, options.height)
    }

    #[test]
    fn size_flags() {
        assert_eq!(size_of(&["--size=640X480"]), (640, 480));
        assert_eq!(size_of(&["--size=640x480", "--height=90"]), (640, 90));
        assert_eq!(size_of(&["--width=0", "--height=90"]), (1, 90));
        assert_eq!(size_of(&["--size=oops"]), (1280, 720));
    }

    #[test]
    fn backend_flag() {
        let backends = |flag: &str| parse_options(&args(&[flag])).backends;
        assert_eq!(backends("--gpu-backend=VK"), wgpu::Backends::VULKAN);
        assert_eq!(backends("--gpu-backend=gles"), wgpu::Backends::GL);
        assert_eq!(backends("--gpu-backend=nope"), wgpu::Backends::all());
    }

    #[test]
    fn value_flags() {
        let options = parse_options(&args(&[
            "--obj=model.obj",
            "--frames=3",
            "--frames=x",
            "--degrees-per-second=90",
            "--strict-numbers",
            "--capture=out.png",
        ]));
        assert_eq!(options.obj, PathBuf::from("model.obj"));
        assert_eq!(options.frames, 3);
        assert_eq!(options.degrees_per_second, Some(90.0));
        assert!(options.strict_numbers);
        assert_eq!(options.capture, Some(PathBuf::from("out.png")));
    }
}
