//! Tracking session: the camera capture thread, the tracking loop thread
//! and the state the control thread reads from them.

use anyhow::{bail, Context, Result};
use opencv::core::Mat;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::calibration::load_calibration;
use crate::camera::{run_capture_loop, CapturedFrame, OpenCvCamera};
use crate::channel::{swap_channel, Consumer};
use crate::config::Config;
use crate::driver::{connect_default, DriverSettings, SemVer, VrDriver, DRIVER_VERSION};
use crate::pipeline::{LoopControl, LoopShared, MainLoopRunner};
use crate::playspace::ManualCalib;
use crate::vr::{MockVrClient, VrClient};

/// How long the tracking loop waits for a frame before re-checking its
/// running flag.
const FRAME_WAIT: Duration = Duration::from_millis(500);

#[derive(Default)]
struct SessionShared {
    camera_running: AtomicBool,
    main_running: AtomicBool,
    driver_connected: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl SessionShared {
    fn fail(&self, context: &str, e: &anyhow::Error) {
        error!("{}: {:#}", context, e);
        *self.last_error.lock() = Some(format!("{}: {:#}", context, e));
    }
}

/// Status flags for the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub camera_running: bool,
    pub tracking: bool,
    pub driver_connected: bool,
}

pub struct Tracker {
    config: Config,
    shared: Arc<SessionShared>,
    loop_shared: Arc<LoopShared>,
    frames: Option<Arc<Consumer<CapturedFrame>>>,
    camera_thread: Option<JoinHandle<()>>,
    main_thread: Option<JoinHandle<()>>,
}

impl Tracker {
    pub fn new(config: Config) -> Self {
        let loop_shared = Arc::new(LoopShared::new(config.manual_calib.to_real()));
        loop_shared
            .calibration_visible
            .store(config.tracking.manual_recalibrate, Ordering::Release);
        Self {
            config,
            shared: Arc::new(SessionShared::default()),
            loop_shared,
            frames: None,
            camera_thread: None,
            main_thread: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            camera_running: self.shared.camera_running.load(Ordering::Acquire),
            tracking: self.shared.main_running.load(Ordering::Acquire),
            driver_connected: self.shared.driver_connected.load(Ordering::Acquire),
        }
    }

    /// Most recent worker failure, cleared by reading it.
    pub fn take_last_error(&self) -> Option<String> {
        self.shared.last_error.lock().take()
    }

    pub fn start_camera(&mut self) -> Result<()> {
        if self.shared.camera_running.load(Ordering::Acquire) {
            bail!("camera is already running");
        }
        self.join_camera();

        let camera = OpenCvCamera::open(&self.config.camera)?;
        let (producer, consumer) = swap_channel::<CapturedFrame>();
        self.frames = Some(Arc::new(consumer));

        self.shared.camera_running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        let camera_config = self.config.camera.clone();
        let handle = thread::Builder::new()
            .name("camera".to_string())
            .spawn(move || {
                if let Err(e) =
                    run_capture_loop(camera, &camera_config, producer, &shared.camera_running)
                {
                    shared.fail("camera stopped", &e);
                }
                shared.camera_running.store(false, Ordering::Release);
            })
            .context("Failed to spawn camera thread")?;
        self.camera_thread = Some(handle);
        Ok(())
    }

    pub fn stop_camera(&mut self) {
        self.stop();
        self.shared.camera_running.store(false, Ordering::Release);
        self.join_camera();
        self.frames = None;
    }

    fn join_camera(&mut self) {
        if let Some(handle) = self.camera_thread.take() {
            if handle.join().is_err() {
                warn!("camera thread panicked");
            }
        }
    }

    fn expected_version(&self) -> Result<SemVer> {
        match &self.config.driver.expected_version {
            Some(v) => SemVer::parse(v).with_context(|| format!("invalid driver version {}", v)),
            None => Ok(DRIVER_VERSION),
        }
    }

    fn vr_client(&self) -> Box<dyn VrClient> {
        if self.config.tracking.disable_openvr_api {
            return Box::new(MockVrClient::new());
        }
        #[cfg(feature = "openvr")]
        {
            match crate::vr::OpenVrClient::init() {
                Ok(client) => return Box::new(client),
                Err(e) => warn!("{:#}, controller calibration is disabled", e),
            }
        }
        #[cfg(not(feature = "openvr"))]
        {
            warn!("built without OpenVR support, controller calibration is disabled");
        }
        Box::new(MockVrClient::new())
    }

    /// Connect to the driver and start the tracking loop. Refuses to start
    /// without a running camera or with incomplete calibration.
    pub fn start(&mut self) -> Result<()> {
        if self.shared.main_running.load(Ordering::Acquire) {
            bail!("tracking is already running");
        }
        self.join_main();

        if !self.shared.camera_running.load(Ordering::Acquire) {
            bail!("camera is not running");
        }
        let frames = self
            .frames
            .clone()
            .context("camera is not running")?;

        let calibration = load_calibration(&self.config.calibration_path).with_context(|| {
            format!("Failed to load calibration {}", self.config.calibration_path)
        })?;
        calibration.require_camera()?;
        calibration.require_trackers(self.config.trackers.len())?;

        let settings = DriverSettings {
            saved_frames: self.config.driver.saved_frames,
            smoothing_factor: self.config.tracking.smoothing_factor,
            additional_smoothing: self.config.tracking.additional_smoothing,
        };
        let client = connect_default(
            &self.config.driver.pipe_name,
            Duration::from_millis(self.config.driver.timeout_ms),
        );
        let driver = VrDriver::connect(client, self.expected_version()?, &self.config.roles(), &settings)
            .context("Failed to connect to the driver")?;
        self.shared.driver_connected.store(true, Ordering::Release);
        info!("driver connected, {} trackers registered", self.config.trackers.len());

        let mut runner = match MainLoopRunner::new(
            &self.config,
            &calibration,
            driver,
            self.vr_client(),
            self.loop_shared.clone(),
        ) {
            Ok(runner) => runner,
            Err(e) => {
                self.shared.driver_connected.store(false, Ordering::Release);
                return Err(e);
            }
        };

        self.shared.main_running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("tracking".to_string())
            .spawn(move || {
                let mut frame = CapturedFrame::default();
                while shared.main_running.load(Ordering::Acquire) {
                    if !frames.wait_consume_timeout(&mut frame, FRAME_WAIT) {
                        if !frames.is_producer_alive() {
                            shared.fail("tracking stopped", &anyhow::anyhow!("camera closed"));
                            break;
                        }
                        continue;
                    }
                    match runner.update(&frame) {
                        Ok(LoopControl::Continue) => {}
                        Ok(LoopControl::Quit) => break,
                        Err(e) => {
                            shared.fail("tracking stopped", &e);
                            break;
                        }
                    }
                }
                shared.main_running.store(false, Ordering::Release);
                shared.driver_connected.store(false, Ordering::Release);
                info!("tracking loop stopped");
            })
            .context("Failed to spawn tracking thread")?;
        self.main_thread = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.shared.main_running.store(false, Ordering::Release);
        self.join_main();
    }

    fn join_main(&mut self) {
        if let Some(handle) = self.main_thread.take() {
            if handle.join().is_err() {
                warn!("tracking thread panicked");
            }
        }
    }

    pub fn manual_calib(&self) -> ManualCalib {
        *self.loop_shared.manual_calib.lock()
    }

    pub fn set_manual_calib(&self, mut calib: ManualCalib) {
        calib.clamp_scale();
        *self.loop_shared.manual_calib.lock() = calib;
    }

    pub fn is_calibration_visible(&self) -> bool {
        self.loop_shared.calibration_visible.load(Ordering::Acquire)
    }

    /// Show or hide playspace calibration. Controller capture only runs
    /// while it is visible.
    pub fn set_calibration_visible(&self, visible: bool) {
        self.loop_shared
            .calibration_visible
            .store(visible, Ordering::Release);
    }

    pub fn set_preview_enabled(&self, enabled: bool) {
        self.loop_shared.preview_enabled.store(enabled, Ordering::Release);
        if !enabled {
            self.loop_shared.preview.lock().take();
        }
    }

    /// Latest preview image, if one was drawn since the last call.
    pub fn take_preview(&self) -> Option<Mat> {
        self.loop_shared.preview.lock().take()
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.stop_camera();
    }
}
