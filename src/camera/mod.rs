pub mod capture;

pub use capture::{
    address_to_index, gstreamer_pipeline, orient_frame, run_capture_loop, smooth_fps, OpenCvCamera,
};

use opencv::core::Mat;
use std::time::Instant;

/// Latest camera image and when it was read.
#[derive(Debug)]
pub struct CapturedFrame {
    pub image: Mat,
    pub timestamp: Instant,
}

impl Default for CapturedFrame {
    fn default() -> Self {
        Self {
            image: Mat::default(),
            timestamp: Instant::now(),
        }
    }
}
