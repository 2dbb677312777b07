use std::f64::consts::TAU;

use crate::{Mat4, Vec3};

/// Rotation angle in radians for a model spinning at `degrees_per_second`,
/// wrapped into `[0, 2π)` for non-negative inputs.
///
/// The product is formed in `f64` so long-running sessions do not lose
/// precision before the wrap.
#[inline]
pub fn rotation_angle(elapsed_seconds: f64, degrees_per_second: f32) -> f32 {
    let radians_per_second = f64::from(degrees_per_second.to_radians());
    let total = elapsed_seconds * radians_per_second;
    (total % TAU) as f32
}

/// Model matrix as stored in the shader constant buffer.
///
/// The model is rotated about +Y by the negated angle and then moved to
/// `position`. The result is transposed so that its column-major memory
/// layout is the row-major layout the shaders multiply against
/// (`vec4 * model`).
#[inline]
pub fn model_transform(elapsed_seconds: f64, degrees_per_second: f32, position: Vec3) -> Mat4 {
    let radians = rotation_angle(elapsed_seconds, degrees_per_second);
    let rotation = Mat4::from_rotation_y(-radians);
    let translation = Mat4::from_translation(position);
    (translation * rotation).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec3;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1e-5
    }

    #[test]
    fn zero_time_is_pure_translation() {
        let p = vec3(1.0, -2.0, 3.5);
        let m = model_transform(0.0, 45.0, p).transpose();
        assert!(approx(m.transform_point3(Vec3::ZERO), p));
        assert!(approx(m.transform_vector3(Vec3::X), Vec3::X));
    }

    #[test]
    fn quarter_turn_maps_x_to_z() {
        let m = model_transform(1.0, 90.0, Vec3::ZERO).transpose();
        assert!(approx(m.transform_vector3(Vec3::X), Vec3::Z));
    }

    #[test]
    fn angle_wraps_after_full_turn() {
        let a = rotation_angle(4.0, 90.0);
        assert!(a.abs() < 1e-4 || (a - std::f32::consts::TAU).abs() < 1e-4);
        let b = rotation_angle(5.0, 90.0);
        assert!((b - std::f32::consts::FRAC_PI_2).abs() < 1e-4);
    }

    #[test]
    fn stored_matrix_is_transposed() {
        let p = vec3(4.0, 5.0, 6.0);
        let stored = model_transform(0.0, 0.0, p).to_cols_array_2d();
        // Translation lands in the last row of the row-major layout.
        assert_eq!(stored[0][3], 4.0);
        assert_eq!(stored[1][3], 5.0);
        assert_eq!(stored[2][3], 6.0);
    }
}
