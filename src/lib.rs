pub mod calibration;
pub mod camera;
pub mod channel;
pub mod config;
pub mod driver;
pub mod geometry;
pub mod pipeline;
pub mod playspace;
pub mod pose;
pub mod session;
pub mod tracker;
pub mod vr;
