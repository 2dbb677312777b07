use crate::Vec3;

/// Distance from the viewer at which a positioned hologram is placed.
pub const HOLOGRAM_DISTANCE: f32 = 2.0;

/// Head position and gaze direction, sampled from the tracking system.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeadPose {
    pub position: Vec3,
    /// Unit forward (gaze) direction.
    pub forward: Vec3,
}

impl HeadPose {
    pub fn new(position: Vec3, forward: Vec3) -> Self {
        Self { position, forward }
    }

    /// Point `distance` units along the gaze ray.
    #[inline]
    pub fn gaze_point(&self, distance: f32) -> Vec3 {
        self.position + distance * self.forward
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec3;

    #[test]
    fn gaze_point_follows_forward() {
        let pose = HeadPose::new(vec3(0.0, 1.6, 0.0), vec3(0.0, 0.0, -1.0));
        assert_eq!(pose.gaze_point(HOLOGRAM_DISTANCE), vec3(0.0, 1.6, -2.0));
    }
}
