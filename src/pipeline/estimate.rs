use anyhow::{Context, Result};
use nalgebra::Vector3;
use tracing::{debug, warn};

use crate::calibration::CameraIntrinsics;
use crate::config::Config;
use crate::driver::VrDriver;
use crate::geometry::Pose;
use crate::playspace::{refine_multicam, ManualCalib, PlayspaceCalib};
use crate::pose::{estimate_pose_board, MarkerDetectionList};
use crate::tracker::TrackerUnit;

/// Blend the local distance from the camera toward the driver's. Direction
/// stays that of the local estimate. The blend weight grows with the
/// disagreement and saturates at 1 (local only) at `threshold`.
pub fn smooth_depth(local: &Vector3<f64>, driver_distance: f64, threshold: f64) -> Vector3<f64> {
    let local_distance = local.norm();
    if threshold <= 0.0 || local_distance <= f64::EPSILON {
        return *local;
    }
    let weight = ((local_distance - driver_distance).abs() / threshold).clamp(0.0, 1.0);
    let distance = weight * local_distance + (1.0 - weight) * driver_distance;
    local * (distance / local_distance)
}

/// In front of the camera and inside its field of view. `limits` are the
/// largest |x/z| and |y/z|.
pub fn is_within_fov(position: &Vector3<f64>, limits: (f64, f64)) -> bool {
    if !(position.z > 0.0) {
        return false;
    }
    (position.x / position.z).abs() <= limits.0 && (position.y / position.z).abs() <= limits.1
}

/// What happened to one tracker this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateOutcome {
    NotDetected,
    OutOfView,
    /// Fed into multi camera refinement instead of the driver
    Refined,
    Sent,
    /// Driver did not answer in time
    SendFailed,
}

#[derive(Debug, Clone, Copy)]
pub struct EstimatorSettings {
    pub use_predictive: bool,
    pub depth_smoothing: f64,
    pub smoothing_factor: f64,
    pub latency: f64,
    pub multicam_autocalib: bool,
}

impl EstimatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            use_predictive: config.tracking.use_predictive,
            depth_smoothing: config.tracking.depth_smoothing,
            smoothing_factor: config.tracking.smoothing_factor,
            latency: config.video.latency,
            multicam_autocalib: config.tracking.multicam_autocalib,
        }
    }
}

/// Playspace state the estimator reads and, in multi camera mode, nudges.
pub struct PlayspaceState<'a> {
    pub calib: &'a mut ManualCalib,
    pub playspace: &'a mut PlayspaceCalib,
}

pub struct PoseEstimator {
    settings: EstimatorSettings,
    recalibrating: bool,
}

impl PoseEstimator {
    pub fn new(settings: EstimatorSettings) -> Self {
        Self {
            settings,
            recalibrating: false,
        }
    }

    /// While the playspace is being recalibrated the driver's poses come
    /// from the old calibration, so depth smoothing is skipped.
    pub fn set_recalibrating(&mut self, recalibrating: bool) {
        self.recalibrating = recalibrating;
    }

    #[cfg(test)]
    pub(crate) fn is_recalibrating(&self) -> bool {
        self.recalibrating
    }

    /// Unscaled solver seed, only for trackers seen last frame. The
    /// driver's pose wins over the last local estimate when it has one.
    fn solver_guess(&self, tracker: &TrackerUnit, scale: f64) -> Option<Pose> {
        if !self.settings.use_predictive || !tracker.was_visible_last_frame {
            return None;
        }
        let seed = if tracker.was_visible_to_driver_last_frame {
            &tracker.pose_from_driver
        } else {
            &tracker.estimated_pose
        };
        Some(seed.scaled(1.0 / scale))
    }

    /// Estimate every tracker and push the results to the driver.
    ///
    /// `frame_time` is seconds since the frame was captured. Board
    /// estimation errors and driver protocol errors are returned; driver
    /// timeouts only fail the tracker they happened on.
    #[allow(clippy::too_many_arguments)]
    pub fn estimate(
        &self,
        detections: &MarkerDetectionList,
        trackers: &mut [TrackerUnit],
        camera: &CameraIntrinsics,
        image_size: (i32, i32),
        state: &mut PlayspaceState<'_>,
        driver: &mut VrDriver,
        frame_time: f64,
    ) -> Result<Vec<EstimateOutcome>> {
        let limits = camera.fov_ratio_limits(image_size.0, image_size.1);
        let mut outcomes = Vec::with_capacity(trackers.len());

        for (id, tracker) in trackers.iter_mut().enumerate() {
            let outcome = self
                .estimate_one(id, tracker, detections, camera, limits, state, driver, frame_time)
                .with_context(|| format!("tracker {} estimation failed", id))?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    #[allow(clippy::too_many_arguments)]
    fn estimate_one(
        &self,
        id: usize,
        tracker: &mut TrackerUnit,
        detections: &MarkerDetectionList,
        camera: &CameraIntrinsics,
        limits: (f64, f64),
        state: &mut PlayspaceState<'_>,
        driver: &mut VrDriver,
        frame_time: f64,
    ) -> Result<EstimateOutcome> {
        let scale = state.playspace.scale();

        // estimation runs unscaled
        let guess = self.solver_guess(tracker, scale);
        let estimated = estimate_pose_board(detections, &tracker.board, camera, guess.as_ref())?;
        let Some((pose, _markers)) = estimated else {
            tracker.was_visible_last_frame = false;
            return Ok(EstimateOutcome::NotDetected);
        };

        let mut pose = pose.scaled(scale);

        if tracker.was_visible_to_driver_last_frame && !self.recalibrating {
            pose.position = smooth_depth(
                &pose.position,
                tracker.pose_from_driver.position.norm(),
                self.settings.depth_smoothing,
            );
        }

        if !is_within_fov(&pose.position, limits) {
            debug!("tracker {} estimate rejected outside the field of view", id);
            tracker.was_visible_last_frame = false;
            return Ok(EstimateOutcome::OutOfView);
        }

        tracker.estimated_pose = pose;
        tracker.was_visible_last_frame = true;

        if self.settings.multicam_autocalib && tracker.was_visible_to_driver_last_frame {
            *state.calib = refine_multicam(
                state.calib,
                state.playspace,
                &pose.position,
                &tracker.pose_from_driver.position,
            );
            state.playspace.set(state.calib);
            return Ok(EstimateOutcome::Refined);
        }

        let vr_pose = state.playspace.transform_to_ovr(&pose);
        let time_offset = -frame_time - self.settings.latency;
        match driver.update_tracker(id, &vr_pose, time_offset, self.settings.smoothing_factor) {
            Ok(()) => Ok(EstimateOutcome::Sent),
            Err(e) if e.is_transport() => {
                warn!("tracker {} update failed: {}", id, e);
                tracker.was_visible_last_frame = false;
                Ok(EstimateOutcome::SendFailed)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{SharedDebugDriver, DRIVER_VERSION};
    use crate::tracker::{MarkerBoard, TrackerRole};
    use approx::assert_relative_eq;
    use opencv::core::Point2f;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            width: 640,
            height: 480,
            intrinsic_matrix: [500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0],
            dist_coeffs: vec![0.0; 5],
        }
    }

    fn settings() -> EstimatorSettings {
        EstimatorSettings {
            use_predictive: true,
            depth_smoothing: 0.0,
            smoothing_factor: 0.5,
            latency: 0.0,
            multicam_autocalib: false,
        }
    }

    fn tracker() -> TrackerUnit {
        TrackerUnit::new(
            MarkerBoard::new(vec![0], vec![MarkerBoard::model_marker(0.1)]).unwrap(),
            TrackerRole::Waist,
        )
    }

    /// Marker 0 of side 0.1 m, one meter straight ahead.
    fn centered_detection() -> MarkerDetectionList {
        let mut list = MarkerDetectionList::default();
        list.push(
            0,
            [
                Point2f::new(295.0, 215.0),
                Point2f::new(345.0, 215.0),
                Point2f::new(345.0, 265.0),
                Point2f::new(295.0, 265.0),
            ],
        );
        list
    }

    fn registered_driver() -> (VrDriver, SharedDebugDriver) {
        let stub = SharedDebugDriver::new(DRIVER_VERSION);
        let mut driver = VrDriver::new(Box::new(stub.clone()), DRIVER_VERSION);
        driver.add_tracker("ApriltagTracker0", "TrackerRole_Waist").unwrap();
        (driver, stub)
    }

    #[test]
    fn test_smooth_depth_boundaries() {
        let local = Vector3::new(0.0, 0.0, 2.0);
        // no disagreement: driver distance
        assert_relative_eq!(smooth_depth(&local, 2.0, 0.5), local);
        // small disagreement: between the two
        let mid = smooth_depth(&local, 1.9, 0.5);
        assert!(mid.z < 2.0 && mid.z > 1.9);
        assert_relative_eq!(mid.z, 0.2 * 2.0 + 0.8 * 1.9, epsilon = 1e-12);
        // past the threshold: local only
        assert_relative_eq!(smooth_depth(&local, 1.0, 0.5), local);
        // disabled
        assert_relative_eq!(smooth_depth(&local, 1.9, 0.0), local);
    }

    #[test]
    fn test_smooth_depth_keeps_direction() {
        let local = Vector3::new(1.0, 1.0, 2.0);
        let out = smooth_depth(&local, 2.0, 1.0);
        assert_relative_eq!(out.normalize(), local.normalize(), epsilon = 1e-12);
    }

    #[test]
    fn test_fov_rejects_behind_camera() {
        let limits = (0.64, 0.48);
        assert!(!is_within_fov(&Vector3::new(0.0, 0.0, 0.0), limits));
        assert!(!is_within_fov(&Vector3::new(0.0, 0.0, -1.0), limits));
        assert!(is_within_fov(&Vector3::new(0.0, 0.0, 1.0), limits));
        assert!(!is_within_fov(&Vector3::new(0.7, 0.0, 1.0), limits));
        assert!(!is_within_fov(&Vector3::new(0.0, -0.5, 1.0), limits));
    }

    #[test]
    fn test_not_detected() {
        let (mut driver, stub) = registered_driver();
        let mut trackers = vec![tracker()];
        trackers[0].was_visible_last_frame = true;
        let previous = trackers[0].estimated_pose;

        let mut calib = ManualCalib::default();
        let mut playspace = PlayspaceCalib::new(&calib);
        let mut state = PlayspaceState {
            calib: &mut calib,
            playspace: &mut playspace,
        };
        let outcomes = PoseEstimator::new(settings())
            .estimate(
                &MarkerDetectionList::default(),
                &mut trackers,
                &intrinsics(),
                (640, 480),
                &mut state,
                &mut driver,
                0.0,
            )
            .unwrap();
        assert_eq!(outcomes, vec![EstimateOutcome::NotDetected]);
        assert!(!trackers[0].was_visible_last_frame);
        assert_eq!(trackers[0].estimated_pose, previous);
        assert!(stub.lock().trackers()[0].last_pose.is_none());
    }

    #[test]
    fn test_detected_pose_is_sent_scaled() {
        let (mut driver, stub) = registered_driver();
        let mut trackers = vec![tracker()];

        let mut calib = ManualCalib {
            scale: 1.1,
            ..Default::default()
        };
        let mut playspace = PlayspaceCalib::new(&calib);
        let mut state = PlayspaceState {
            calib: &mut calib,
            playspace: &mut playspace,
        };
        let outcomes = PoseEstimator::new(settings())
            .estimate(
                &centered_detection(),
                &mut trackers,
                &intrinsics(),
                (640, 480),
                &mut state,
                &mut driver,
                0.02,
            )
            .unwrap();
        assert_eq!(outcomes, vec![EstimateOutcome::Sent]);
        assert!(trackers[0].was_visible_last_frame);
        assert!((trackers[0].estimated_pose.position.z - 1.1).abs() < 1e-2);

        let sent: Pose = stub.lock().trackers()[0].last_pose.unwrap();
        // x and z flip into the runtime's convention
        assert!((sent.position.z + 1.1).abs() < 1e-2);
    }

    #[test]
    fn test_multicam_refines_instead_of_sending() {
        let (mut driver, stub) = registered_driver();
        let mut trackers = vec![tracker()];
        trackers[0].was_visible_to_driver_last_frame = true;
        trackers[0].pose_from_driver = Pose::from_position(Vector3::new(0.05, 0.0, 1.2));

        let mut s = settings();
        s.multicam_autocalib = true;
        let mut calib = ManualCalib::default();
        let mut playspace = PlayspaceCalib::new(&calib);
        let mut state = PlayspaceState {
            calib: &mut calib,
            playspace: &mut playspace,
        };
        let outcomes = PoseEstimator::new(s)
            .estimate(
                &centered_detection(),
                &mut trackers,
                &intrinsics(),
                (640, 480),
                &mut state,
                &mut driver,
                0.0,
            )
            .unwrap();
        assert_eq!(outcomes, vec![EstimateOutcome::Refined]);
        assert!(stub.lock().trackers()[0].last_pose.is_none());
        assert_ne!(calib, ManualCalib::default());
        assert!(calib.scale >= 0.8 && calib.scale <= 1.2);
    }

    /// Run one frame of `centered_detection` with the driver seeing the
    /// tracker 1.05 m away.
    fn estimate_with_driver_at_nearby_depth(recalibrating: bool) -> TrackerUnit {
        let (mut driver, _stub) = registered_driver();
        let mut trackers = vec![tracker()];
        trackers[0].was_visible_to_driver_last_frame = true;
        trackers[0].pose_from_driver = Pose::from_position(Vector3::new(0.0, 0.0, 1.05));

        let mut s = settings();
        s.depth_smoothing = 0.1;
        let mut estimator = PoseEstimator::new(s);
        estimator.set_recalibrating(recalibrating);

        let mut calib = ManualCalib::default();
        let mut playspace = PlayspaceCalib::new(&calib);
        let mut state = PlayspaceState {
            calib: &mut calib,
            playspace: &mut playspace,
        };
        let outcomes = estimator
            .estimate(
                &centered_detection(),
                &mut trackers,
                &intrinsics(),
                (640, 480),
                &mut state,
                &mut driver,
                0.0,
            )
            .unwrap();
        assert_eq!(outcomes, vec![EstimateOutcome::Sent]);
        trackers.remove(0)
    }

    #[test]
    fn test_depth_is_pulled_toward_driver() {
        let tracker = estimate_with_driver_at_nearby_depth(false);
        // local 1.0, driver 1.05, weight 0.5
        assert!((tracker.estimated_pose.position.z - 1.025).abs() < 5e-3);
    }

    #[test]
    fn test_depth_is_local_while_recalibrating() {
        let tracker = estimate_with_driver_at_nearby_depth(true);
        assert!((tracker.estimated_pose.position.z - 1.0).abs() < 5e-3);
    }

    #[test]
    fn test_depth_is_local_without_driver_pose() {
        let (mut driver, _stub) = registered_driver();
        let mut trackers = vec![tracker()];
        trackers[0].pose_from_driver = Pose::from_position(Vector3::new(0.0, 0.0, 1.05));

        let mut s = settings();
        s.depth_smoothing = 0.1;
        let mut calib = ManualCalib::default();
        let mut playspace = PlayspaceCalib::new(&calib);
        let mut state = PlayspaceState {
            calib: &mut calib,
            playspace: &mut playspace,
        };
        PoseEstimator::new(s)
            .estimate(
                &centered_detection(),
                &mut trackers,
                &intrinsics(),
                (640, 480),
                &mut state,
                &mut driver,
                0.0,
            )
            .unwrap();
        assert!((trackers[0].estimated_pose.position.z - 1.0).abs() < 5e-3);
    }

    #[test]
    fn test_solver_guess_selection() {
        let estimator = PoseEstimator::new(settings());
        let mut t = tracker();
        t.estimated_pose = Pose::from_position(Vector3::new(0.0, 0.0, 2.2));
        t.pose_from_driver = Pose::from_position(Vector3::new(0.0, 0.0, 1.1));

        // not seen last frame: no seed
        assert!(estimator.solver_guess(&t, 1.1).is_none());

        t.was_visible_last_frame = true;
        let local = estimator.solver_guess(&t, 1.1).unwrap();
        assert_relative_eq!(local.position.z, 2.0, epsilon = 1e-12);

        t.was_visible_to_driver_last_frame = true;
        let from_driver = estimator.solver_guess(&t, 1.1).unwrap();
        assert_relative_eq!(from_driver.position.z, 1.0, epsilon = 1e-12);

        let mut s = settings();
        s.use_predictive = false;
        assert!(PoseEstimator::new(s).solver_guess(&t, 1.1).is_none());
    }
}
