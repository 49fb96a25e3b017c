pub mod calib;
pub mod calibrator;

pub use calib::{ManualCalib, PlayspaceCalib, SCALE_MAX, SCALE_MIN};
pub use calibrator::{refine_multicam, CalibStep, PlayspaceCalibrator};
