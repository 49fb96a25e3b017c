//! Pose type and the small amount of rigid-body math shared by the
//! pipeline, the driver bridge and the playspace calibration.

use nalgebra::{Matrix3, Quaternion, Rotation3, UnitQuaternion, Vector2, Vector3};

pub const DEG_2_RAD: f64 = std::f64::consts::PI / 180.0;
pub const RAD_2_DEG: f64 = 180.0 / std::f64::consts::PI;

/// Position + rotation.
///
/// The rotation is a `UnitQuaternion`, so it stays normalized no matter how
/// the pose was built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
}

impl Pose {
    pub fn new(position: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self { position, rotation }
    }

    /// Position only, no rotation
    pub fn from_position(position: Vector3<f64>) -> Self {
        Self {
            position,
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Origin, no rotation
    pub fn identity() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Build from raw wire components. The quaternion is normalized here;
    /// a zero quaternion falls back to identity.
    pub fn from_components(position: [f64; 3], w: f64, x: f64, y: f64, z: f64) -> Self {
        let q = Quaternion::new(w, x, y, z);
        let rotation = if q.norm() > f64::EPSILON {
            UnitQuaternion::from_quaternion(q)
        } else {
            UnitQuaternion::identity()
        };
        Self {
            position: Vector3::new(position[0], position[1], position[2]),
            rotation,
        }
    }

    /// Pose from an OpenCV style rotation vector (Rodrigues) and translation.
    pub fn from_rvec_tvec(rvec: &Vector3<f64>, tvec: &Vector3<f64>) -> Self {
        Self {
            position: *tvec,
            rotation: UnitQuaternion::from_scaled_axis(*rvec),
        }
    }

    /// Rotation as an OpenCV style rotation vector.
    pub fn rvec(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }

    /// (w, x, y, z)
    pub fn quaternion_wxyz(&self) -> [f64; 4] {
        let q = self.rotation.quaternion();
        [q.w, q.i, q.j, q.k]
    }

    /// Same rotation, position multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            position: self.position * factor,
            rotation: self.rotation,
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Convert between the camera convention and the OpenVR convention by
/// negating x and z. The conversion is its own inverse.
pub fn coord_transform_ovr(position: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(-position.x, position.y, -position.z)
}

/// Quaternion counterpart of [`coord_transform_ovr`].
pub fn coord_transform_ovr_rotation(rotation: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
    let q = rotation.quaternion();
    UnitQuaternion::new_unchecked(Quaternion::new(q.w, -q.i, q.j, -q.k))
}

pub fn coord_transform_ovr_pose(pose: &Pose) -> Pose {
    Pose {
        position: coord_transform_ovr(&pose.position),
        rotation: coord_transform_ovr_rotation(&pose.rotation),
    }
}

/// Direction of `pos` seen from `origin`, relative to +z forward.
///
/// Returns (pitch, yaw) in radians.
pub fn euler_angles_from_pos(pos: &Vector3<f64>, origin: &Vector3<f64>) -> Vector2<f64> {
    let p = pos - origin;
    let yaw = p.x.atan2(p.z);
    let pitch = p.y.atan2((p.x * p.x + p.z * p.z).sqrt());
    Vector2::new(pitch, yaw)
}

/// (pitch, yaw, roll) in radians to a rotation matrix, applied as Ry * Rx * Rz.
pub fn euler_angles_to_rotation(theta: &Vector3<f64>) -> Rotation3<f64> {
    let (sx, cx) = theta.x.sin_cos();
    let (sy, cy) = theta.y.sin_cos();
    let (sz, cz) = theta.z.sin_cos();

    let ry = Matrix3::new(cy, 0.0, sy, 0.0, 1.0, 0.0, -sy, 0.0, cy);
    let rx = Matrix3::new(1.0, 0.0, 0.0, 0.0, cx, -sx, 0.0, sx, cx);
    let rz = Matrix3::new(cz, -sz, 0.0, sz, cz, 0.0, 0.0, 0.0, 1.0);

    Rotation3::from_matrix_unchecked(ry * rx * rz)
}

/// Fit `(width, height)` so that the shorter side becomes `max_size`,
/// keeping the aspect ratio.
pub fn constrain_size(width: i32, height: i32, max_size: i32) -> (i32, i32) {
    if width <= 0 || height <= 0 {
        return (max_size, max_size);
    }
    if width > height {
        let aspect = max_size as f64 / height as f64;
        ((width as f64 * aspect) as i32, max_size)
    } else {
        let aspect = max_size as f64 / width as f64;
        (max_size, (height as f64 * aspect) as i32)
    }
}
