pub mod unit;

pub use unit::{MarkerBoard, MarkerCorners, TrackerRole, TrackerUnit};
