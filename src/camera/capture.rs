use anyhow::{bail, Context, Result};
use opencv::{
    core::{self, Mat},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureAPIs, VideoCaptureTrait},
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::CapturedFrame;
use crate::channel::Producer;
use crate::config::{CameraConfig, FrameRotation};

/// 'M' 'J' 'P' 'G'
const FOURCC_MJPG: f64 = 0x4750_4A4D as f64;
const FPS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Device index for a purely numeric address, `None` for URLs and paths.
pub fn address_to_index(address: &str) -> Option<i32> {
    let trimmed = address.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

/// GStreamer pipeline decoding an MJPEG v4l2 stream.
pub fn gstreamer_pipeline(index: i32, width: i32, height: i32, fps: i32) -> String {
    format!(
        "v4l2src device=/dev/video{} ! image/jpeg,width={},height={},framerate={}/1 ! jpegdec ! video/x-raw,format=I420 ! videoconvert ! appsink",
        index, width, height, fps
    )
}

/// Exponential moving average of the capture rate.
pub fn smooth_fps(previous: f64, frame_interval: Duration) -> f64 {
    let secs = frame_interval.as_secs_f64();
    if secs <= 0.0 {
        return previous;
    }
    let sample = 1.0 / secs;
    if previous <= 0.0 {
        sample
    } else {
        0.95 * previous + 0.05 * sample
    }
}

/// Camera capture through OpenCV
pub struct OpenCvCamera {
    capture: VideoCapture,
    width: i32,
    height: i32,
}

impl OpenCvCamera {
    /// Open the camera with the configured settings
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let capture = match address_to_index(&config.address) {
            Some(index) => Self::open_device(index, config)?,
            None => VideoCapture::from_file(&config.address, config.api)
                .with_context(|| format!("Failed to open camera {}", config.address))?,
        };

        if !capture.is_opened()? {
            bail!("Camera {} is not available", config.address);
        }

        let mut camera = Self {
            capture,
            width: 0,
            height: 0,
        };
        camera.apply_settings(config)?;
        Ok(camera)
    }

    fn open_device(index: i32, config: &CameraConfig) -> Result<VideoCapture> {
        let gstreamer_api = VideoCaptureAPIs::CAP_GSTREAMER as i32;
        let try_gstreamer = cfg!(target_os = "linux")
            && config.mjpeg
            && (config.api == VideoCaptureAPIs::CAP_ANY as i32 || config.api == gstreamer_api)
            && config.width > 0
            && config.height > 0
            && config.fps > 0;

        if try_gstreamer {
            let pipeline = gstreamer_pipeline(index, config.width, config.height, config.fps);
            match VideoCapture::from_file(&pipeline, gstreamer_api) {
                Ok(capture) if capture.is_opened().unwrap_or(false) => {
                    info!("camera {} opened through GStreamer", index);
                    return Ok(capture);
                }
                _ => debug!("GStreamer pipeline unavailable, falling back: {}", pipeline),
            }
        }

        VideoCapture::new(index, config.api).context("Failed to open camera")
    }

    fn apply_settings(&mut self, config: &CameraConfig) -> Result<()> {
        // FOURCC must be set before the resolution for some backends
        if config.mjpeg {
            self.capture.set(videoio::CAP_PROP_FOURCC, FOURCC_MJPG)?;
        }
        if config.width > 0 {
            self.capture.set(videoio::CAP_PROP_FRAME_WIDTH, config.width as f64)?;
        }
        if config.height > 0 {
            self.capture.set(videoio::CAP_PROP_FRAME_HEIGHT, config.height as f64)?;
        }
        if config.fps > 0 {
            self.capture.set(videoio::CAP_PROP_FPS, config.fps as f64)?;
        }
        if config.extra.enabled {
            self.capture
                .set(videoio::CAP_PROP_AUTO_EXPOSURE, config.extra.auto_exposure)?;
            self.capture.set(videoio::CAP_PROP_EXPOSURE, config.extra.exposure)?;
            self.capture.set(videoio::CAP_PROP_GAIN, config.extra.gain)?;
        }
        self.capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;

        self.width = self.capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        self.height = self.capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
        let actual_fps = self.capture.get(videoio::CAP_PROP_FPS)?;
        info!(
            "camera {} opened: {}x{} @ {} fps ({})",
            config.address,
            self.width,
            self.height,
            actual_fps,
            self.capture.get_backend_name().unwrap_or_default()
        );
        Ok(())
    }

    /// Resolution the camera reports
    pub fn resolution(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    /// Read one frame (BGR)
    pub fn read_frame(&mut self) -> Result<Mat> {
        let mut frame = Mat::default();
        self.capture
            .read(&mut frame)
            .context("Failed to read frame")?;

        if frame.empty() {
            bail!("Empty frame received");
        }

        Ok(frame)
    }
}

/// Rotate and mirror a captured frame in place.
pub fn orient_frame(image: &mut Mat, rotation: FrameRotation, mirror: bool) -> Result<()> {
    let code = match rotation {
        FrameRotation::None => None,
        FrameRotation::Clockwise => Some(core::ROTATE_90_CLOCKWISE),
        FrameRotation::Half => Some(core::ROTATE_180),
        FrameRotation::CounterClockwise => Some(core::ROTATE_90_COUNTERCLOCKWISE),
    };
    if let Some(code) = code {
        let mut rotated = Mat::default();
        core::rotate(&*image, &mut rotated, code)?;
        *image = rotated;
    }
    if mirror {
        let mut flipped = Mat::default();
        core::flip(&*image, &mut flipped, 1)?;
        *image = flipped;
    }
    Ok(())
}

/// Capture thread body. Reads frames until `running` is cleared and hands
/// each one to the main loop. A failed read ends the session.
pub fn run_capture_loop(
    mut camera: OpenCvCamera,
    config: &CameraConfig,
    frames: Producer<CapturedFrame>,
    running: &AtomicBool,
) -> Result<()> {
    let mut frame = CapturedFrame::default();
    let mut fps = 0.0;
    let mut last_frame = Instant::now();
    let mut last_log = Instant::now();

    while running.load(Ordering::Acquire) {
        let mut image = camera.read_frame()?;
        let now = Instant::now();
        orient_frame(&mut image, config.rotate, config.mirror)?;

        fps = smooth_fps(fps, now.duration_since(last_frame));
        last_frame = now;
        if now.duration_since(last_log) >= FPS_LOG_INTERVAL {
            debug!("capture fps: {:.1}", fps);
            last_log = now;
        }

        frame.image = image;
        frame.timestamp = now;
        frames.produce(&mut frame);
    }

    if !frames.is_consumer_alive() {
        warn!("capture stopped with no consumer attached");
    }
    info!("camera capture stopped");
    Ok(())
}
