//! Core types: math re-exports, head pose, per-frame model transform.

pub use glam::{Mat4, Vec3, vec3};

pub mod pose;
pub mod transform;

pub use pose::{HOLOGRAM_DISTANCE, HeadPose};
pub use transform::{model_transform, rotation_angle};
