use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};

use crate::geometry::{coord_transform_ovr_pose, euler_angles_to_rotation, Pose};

pub const SCALE_MIN: f64 = 0.8;
pub const SCALE_MAX: f64 = 1.2;

/// Playspace calibration in real units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManualCalib {
    /// meters
    pub pos_offset: Vector3<f64>,
    /// (pitch, yaw, roll) in radians
    pub angle_offset: Vector3<f64>,
    /// multiplier applied to estimated positions
    pub scale: f64,
}

impl Default for ManualCalib {
    fn default() -> Self {
        Self {
            pos_offset: Vector3::zeros(),
            angle_offset: Vector3::zeros(),
            scale: 1.0,
        }
    }
}

impl ManualCalib {
    pub fn clamp_scale(&mut self) {
        self.scale = if self.scale.is_finite() {
            self.scale.clamp(SCALE_MIN, SCALE_MAX)
        } else {
            1.0
        };
    }
}

/// Camera space to VR space transform.
///
/// Forward and inverse are rebuilt together on every [`set`](Self::set).
/// Scale is not part of the transform; callers scale positions before
/// transforming.
#[derive(Debug, Clone, Copy)]
pub struct PlayspaceCalib {
    transform: Isometry3<f64>,
    inverse: Isometry3<f64>,
    scale: f64,
}

impl Default for PlayspaceCalib {
    fn default() -> Self {
        Self::new(&ManualCalib::default())
    }
}

impl PlayspaceCalib {
    pub fn new(calib: &ManualCalib) -> Self {
        let mut playspace = Self {
            transform: Isometry3::identity(),
            inverse: Isometry3::identity(),
            scale: 1.0,
        };
        playspace.set(calib);
        playspace
    }

    pub fn set(&mut self, calib: &ManualCalib) {
        let rotation =
            UnitQuaternion::from_rotation_matrix(&euler_angles_to_rotation(&calib.angle_offset));
        self.transform = Isometry3::from_parts(Translation3::from(calib.pos_offset), rotation);
        self.inverse = self.transform.inverse();
        let mut clamped = *calib;
        clamped.clamp_scale();
        self.scale = clamped.scale;
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn transform(&self, pose: &Pose) -> Pose {
        Pose {
            position: self
                .transform
                .transform_point(&Point3::from(pose.position))
                .coords,
            rotation: self.transform.rotation * pose.rotation,
        }
    }

    pub fn inv_transform(&self, pose: &Pose) -> Pose {
        Pose {
            position: self
                .inverse
                .transform_point(&Point3::from(pose.position))
                .coords,
            rotation: self.inverse.rotation * pose.rotation,
        }
    }

    /// Camera space to VR runtime space.
    pub fn transform_to_ovr(&self, pose: &Pose) -> Pose {
        self.transform(&coord_transform_ovr_pose(pose))
    }

    /// VR runtime space to camera space.
    pub fn inv_transform_from_ovr(&self, pose: &Pose) -> Pose {
        coord_transform_ovr_pose(&self.inv_transform(pose))
    }

    /// Pose of the camera itself, in VR runtime convention.
    pub fn station_pose_ovr(&self) -> Pose {
        coord_transform_ovr_pose(&Pose {
            position: self.transform.translation.vector,
            rotation: self.transform.rotation,
        })
    }
}
