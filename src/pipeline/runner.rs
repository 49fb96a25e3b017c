use anyhow::{Context, Result};
use opencv::{core::Mat, prelude::*};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{info, warn};

use super::estimate::{EstimatorSettings, PlayspaceState, PoseEstimator};
use super::overlay::draw_preview;
use super::preprocess::Preprocessor;
use crate::calibration::{CalibrationData, CameraIntrinsics};
use crate::camera::CapturedFrame;
use crate::config::Config;
use crate::driver::{DriverError, VrDriver};
use crate::playspace::{ManualCalib, PlayspaceCalib, PlayspaceCalibrator};
use crate::pose::{to_grayscale, MarkerDetectionList, MarkerDetector};
use crate::tracker::TrackerUnit;
use crate::vr::VrClient;

/// State the main loop shares with the control thread.
#[derive(Debug, Default)]
pub struct LoopShared {
    pub manual_calib: Mutex<ManualCalib>,
    pub calibration_visible: AtomicBool,
    pub preview_enabled: AtomicBool,
    pub preview: Mutex<Option<Mat>>,
}

impl LoopShared {
    pub fn new(manual_calib: ManualCalib) -> Self {
        Self {
            manual_calib: Mutex::new(manual_calib),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    /// VR runtime is shutting down
    Quit,
}

/// Everything the tracking loop does with one frame.
pub struct MainLoopRunner {
    camera: CameraIntrinsics,
    trackers: Vec<TrackerUnit>,
    detector: MarkerDetector,
    preprocessor: Preprocessor,
    estimator: PoseEstimator,
    calibrator: PlayspaceCalibrator,
    driver: VrDriver,
    vr: Box<dyn VrClient>,
    shared: std::sync::Arc<LoopShared>,
    calib: ManualCalib,
    playspace: PlayspaceCalib,
    latency: f64,
    lock_height: bool,
    preview_size: i32,

    gray: Mat,
    masked: Mat,
    detections: MarkerDetectionList,
}

impl MainLoopRunner {
    pub fn new(
        config: &Config,
        calibration: &CalibrationData,
        driver: VrDriver,
        vr: Box<dyn VrClient>,
        shared: std::sync::Arc<LoopShared>,
    ) -> Result<Self> {
        let camera = calibration.require_camera()?.clone();
        calibration.require_trackers(config.trackers.len())?;
        let trackers = calibration
            .trackers
            .iter()
            .zip(config.roles())
            .map(|(board, role)| TrackerUnit::new(board.clone(), role))
            .collect();

        let calib = *shared.manual_calib.lock();
        let mut runner = Self {
            camera,
            trackers,
            detector: MarkerDetector::new(&config.tracking.marker_dictionary)?,
            preprocessor: Preprocessor::new(config.video.circular_window, config.video.search_window),
            estimator: PoseEstimator::new(EstimatorSettings::from_config(config)),
            calibrator: PlayspaceCalibrator::new(Instant::now()),
            driver,
            vr,
            shared,
            calib,
            playspace: PlayspaceCalib::new(&calib),
            latency: config.video.latency,
            lock_height: config.tracking.lock_height_calib,
            preview_size: config.video.preview_size,
            gray: Mat::default(),
            masked: Mat::default(),
            detections: MarkerDetectionList::default(),
        };
        runner
            .push_station()
            .context("Failed to send the station pose")?;
        Ok(runner)
    }

    pub fn trackers(&self) -> &[TrackerUnit] {
        &self.trackers
    }

    pub fn playspace(&self) -> &PlayspaceCalib {
        &self.playspace
    }

    fn push_station(&mut self) -> Result<(), DriverError> {
        self.driver
            .update_station(0, &self.playspace.station_pose_ovr())
    }

    fn apply_calib(&mut self, calib: ManualCalib) -> Result<()> {
        self.calib = calib;
        self.playspace.set(&calib);
        match self.push_station() {
            Ok(()) => Ok(()),
            Err(e) if e.is_transport() => {
                warn!("station update failed: {}", e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Pick up calibration edits made from the control thread.
    fn sync_calib_from_shared(&mut self) -> Result<()> {
        let shared = *self.shared.manual_calib.lock();
        if shared != self.calib {
            self.apply_calib(shared)?;
        }
        Ok(())
    }

    fn update_calibrator(&mut self, now: Instant) -> Result<()> {
        if !self.shared.calibration_visible.load(Ordering::Acquire) {
            self.calibrator.disable(now);
            return Ok(());
        }
        let step = self
            .calibrator
            .update(now, self.vr.as_mut(), &self.calib, self.lock_height);
        if let Some(calib) = step.calib {
            *self.shared.manual_calib.lock() = calib;
            self.apply_calib(calib)?;
        }
        if step.timed_out {
            self.shared.calibration_visible.store(false, Ordering::Release);
            self.calibrator.disable(now);
        }
        Ok(())
    }

    /// Fetch where the driver thinks every tracker is, in camera space.
    fn fetch_driver_poses(&mut self, time_offset: f64) -> Result<()> {
        for (id, tracker) in self.trackers.iter_mut().enumerate() {
            match self.driver.get_tracker(id, time_offset) {
                Ok(Some(pose)) => {
                    tracker.pose_from_driver = self.playspace.inv_transform_from_ovr(&pose);
                    tracker.was_visible_to_driver_last_frame = true;
                }
                Ok(None) => tracker.was_visible_to_driver_last_frame = false,
                Err(e) if e.is_transport() => {
                    warn!("tracker {} pose request failed: {}", id, e);
                    tracker.was_visible_to_driver_last_frame = false;
                }
                Err(e) => return Err(e).with_context(|| format!("tracker {} pose request", id)),
            }
        }
        Ok(())
    }

    pub fn update(&mut self, frame: &CapturedFrame) -> Result<LoopControl> {
        if self.vr.poll_events() {
            info!("VR runtime is shutting down");
            return Ok(LoopControl::Quit);
        }

        let now = Instant::now();
        self.sync_calib_from_shared()?;
        self.update_calibrator(now)?;
        self.estimator
            .set_recalibrating(self.shared.calibration_visible.load(Ordering::Acquire));

        let before_detect = frame.timestamp.elapsed().as_secs_f64();
        self.fetch_driver_poses(-before_detect - self.latency)?;

        to_grayscale(&frame.image, &mut self.gray)?;
        self.preprocessor
            .process(&self.gray, &mut self.trackers, &self.camera, &mut self.masked)?;
        self.detector.detect(&self.masked, &mut self.detections)?;

        let after_detect = frame.timestamp.elapsed().as_secs_f64();
        let calib_before = self.calib;
        {
            let mut state = PlayspaceState {
                calib: &mut self.calib,
                playspace: &mut self.playspace,
            };
            self.estimator.estimate(
                &self.detections,
                &mut self.trackers,
                &self.camera,
                (frame.image.cols(), frame.image.rows()),
                &mut state,
                &mut self.driver,
                after_detect,
            )?;
        }
        if self.calib != calib_before {
            *self.shared.manual_calib.lock() = self.calib;
            self.apply_calib(self.calib)?;
        }

        if self.shared.preview_enabled.load(Ordering::Acquire) {
            let preview = draw_preview(
                &frame.image,
                &self.preprocessor.regions,
                &self.preprocessor.driver_points,
                &self.detections,
                frame.timestamp.elapsed().as_secs_f64(),
                self.preview_size,
            )?;
            *self.shared.preview.lock() = Some(preview);
        }

        Ok(LoopControl::Continue)
    }
}
