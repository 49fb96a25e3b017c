use nalgebra::{Vector2, Vector3};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::calib::{ManualCalib, PlayspaceCalib, SCALE_MAX, SCALE_MIN};
use crate::geometry::{euler_angles_from_pos, Pose, DEG_2_RAD};
use crate::vr::{ButtonAction, VrClient};

/// Presses closer together than this count as one.
pub const DEBOUNCE: Duration = Duration::from_millis(200);
/// Calibration closes itself after this long without a press.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

const PITCH_MIN: f64 = 91.0 * DEG_2_RAD;
const PITCH_MAX: f64 = 269.0 * DEG_2_RAD;

const MULTICAM_STEP: f64 = 0.1;
const MULTICAM_MAX_POS_STEP: f64 = 0.01;
const MULTICAM_MAX_ANGLE_STEP: f64 = 0.01;

/// Outcome of one calibrator frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibStep {
    /// New calibration when a capture mode changed it
    pub calib: Option<ManualCalib>,
    /// Idle timeout hit, calibration should be closed
    pub timed_out: bool,
}

/// Controller driven playspace calibration.
///
/// `GrabCamera` toggles position capture, `GrabTrackers` toggles angle
/// and scale capture. While a capture is active the calibration follows
/// the controller every frame.
#[derive(Debug, Clone)]
pub struct PlayspaceCalibrator {
    pos_active: bool,
    angle_active: bool,
    /// controller to camera offset, controller local
    pos_offset: Vector3<f64>,
    /// (pitch, yaw) offsets and the distance at scale 1
    angle_offset: Vector3<f64>,
    last_input: Instant,
}

impl PlayspaceCalibrator {
    pub fn new(now: Instant) -> Self {
        Self {
            pos_active: false,
            angle_active: false,
            pos_offset: Vector3::zeros(),
            angle_offset: Vector3::zeros(),
            last_input: now,
        }
    }

    pub fn is_position_active(&self) -> bool {
        self.pos_active
    }

    pub fn is_angle_active(&self) -> bool {
        self.angle_active
    }

    /// Calibration closed: forget capture modes and hold the idle timer.
    pub fn disable(&mut self, now: Instant) {
        self.pos_active = false;
        self.angle_active = false;
        self.last_input = now;
    }

    pub fn update(
        &mut self,
        now: Instant,
        vr: &mut dyn VrClient,
        current: &ManualCalib,
        lock_height: bool,
    ) -> CalibStep {
        let mut step = CalibStep::default();
        vr.update_input_actions();
        let button = vr.button_action();
        let controller = vr.controller_pose();
        let mut calib = *current;

        let since_input = now.saturating_duration_since(self.last_input);
        if since_input > IDLE_TIMEOUT {
            info!("auto timeout of playspace calibration");
            step.timed_out = true;
        }

        if button != ButtonAction::None {
            if since_input > DEBOUNCE {
                if let Some(pose) = controller.as_ref() {
                    self.toggle(button, pose, &calib);
                }
            }
            self.last_input = now;
        }

        let pose = match controller {
            Some(p) => p,
            None => return step,
        };

        if self.pos_active {
            let world_offset = pose.rotation * self.pos_offset;
            calib.pos_offset.x = pose.position.x - world_offset.x;
            if !lock_height {
                calib.pos_offset.y = pose.position.y - world_offset.y;
            }
            calib.pos_offset.z = pose.position.z - world_offset.z;
        }

        if self.angle_active {
            let angle = euler_angles_from_pos(&pose.position, &calib.pos_offset);
            let distance = (pose.position - calib.pos_offset).norm();
            calib.angle_offset.y = angle.y - self.angle_offset.y;
            if !lock_height && self.angle_offset.z > f64::EPSILON {
                calib.angle_offset.x = angle.x - self.angle_offset.x;
                calib.scale = distance / self.angle_offset.z;
            }
        }

        if self.pos_active || self.angle_active {
            // keep the camera from flipping upside down
            calib.angle_offset.x = calib.angle_offset.x.clamp(PITCH_MIN, PITCH_MAX);
            calib.clamp_scale();
            step.calib = Some(calib);
        }
        step
    }

    fn toggle(&mut self, button: ButtonAction, pose: &Pose, calib: &ManualCalib) {
        match button {
            ButtonAction::GrabCamera => {
                self.pos_active = !self.pos_active;
                if self.pos_active {
                    let offset = pose.position - calib.pos_offset;
                    self.pos_offset = pose.rotation.inverse() * offset;
                }
                debug!(active = self.pos_active, "position calibration toggled");
            }
            ButtonAction::GrabTrackers => {
                self.angle_active = !self.angle_active;
                if self.angle_active {
                    let angle = euler_angles_from_pos(&pose.position, &calib.pos_offset);
                    let distance = (pose.position - calib.pos_offset).norm();
                    self.angle_offset = Vector3::new(
                        angle.x - calib.angle_offset.x,
                        angle.y - calib.angle_offset.y,
                        distance / calib.scale,
                    );
                }
                debug!(active = self.angle_active, "angle calibration toggled");
            }
            ButtonAction::None => {}
        }
    }
}

/// One refinement step from a tracker seen by both this camera and the
/// driver.
///
/// `estimated` and `from_driver` are camera space positions (scaled).
/// Moves the calibration a tenth of the way toward agreement, each
/// component capped per frame, so it converges over a few seconds.
pub fn refine_multicam(
    calib: &ManualCalib,
    playspace: &PlayspaceCalib,
    estimated: &Vector3<f64>,
    from_driver: &Vector3<f64>,
) -> ManualCalib {
    let mut out = *calib;

    let angles = euler_angles_from_pos(estimated, &Vector3::zeros());
    let driver_angles = euler_angles_from_pos(from_driver, &Vector3::zeros());
    let length = estimated.norm();
    let driver_length = from_driver.norm();

    let est_vr = playspace.transform_to_ovr(&Pose::from_position(*estimated));
    let drv_vr = playspace.transform_to_ovr(&Pose::from_position(*from_driver));
    let delta = (est_vr.position - drv_vr.position) * -MULTICAM_STEP;
    out.pos_offset += delta.map(|d| d.clamp(-MULTICAM_MAX_POS_STEP, MULTICAM_MAX_POS_STEP));

    // yaw turns the other way once the camera is flipped past 90 degrees pitch
    let yaw_sign = if calib.angle_offset.x.cos() < 0.0 { 1.0 } else { -1.0 };
    let angle_error: Vector2<f64> = angles - driver_angles;
    let d_pitch = -angle_error.x * MULTICAM_STEP;
    let d_yaw = yaw_sign * angle_error.y * MULTICAM_STEP;
    out.angle_offset.x += d_pitch.clamp(-MULTICAM_MAX_ANGLE_STEP, MULTICAM_MAX_ANGLE_STEP);
    out.angle_offset.y += d_yaw.clamp(-MULTICAM_MAX_ANGLE_STEP, MULTICAM_MAX_ANGLE_STEP);

    if length > f64::EPSILON {
        out.scale -= (1.0 - driver_length / length) * MULTICAM_STEP;
    }
    out.scale = out.scale.clamp(SCALE_MIN, SCALE_MAX);
    out
}
