//! VR runtime input: calibration buttons, controller pose and the
//! runtime's event queue.
//!
//! The runtime SDK sits behind [`VrClient`]. With the `openvr` feature,
//! `OpenVrClient` talks to SteamVR. [`MockVrClient`] stands in when the
//! SDK is disabled or unavailable and drives the calibrator in tests.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::geometry::{coord_transform_ovr_pose, Pose};

#[cfg(feature = "openvr")]
mod steamvr;
#[cfg(feature = "openvr")]
pub use steamvr::OpenVrClient;

/// Legacy controller button bits.
pub const BUTTON_GRIP: u64 = 1 << 2;
pub const BUTTON_TRIGGER: u64 = 1 << 33;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonAction {
    #[default]
    None,
    GrabCamera,
    GrabTrackers,
}

pub trait VrClient: Send {
    /// Drain the runtime's events. Returns `true` when the runtime is
    /// shutting down.
    fn poll_events(&mut self) -> bool;
    /// Refresh action state; call before reading actions for this frame.
    fn update_input_actions(&mut self);
    /// Button pressed this frame. Only reported on the frame it goes down.
    fn button_action(&self) -> ButtonAction;
    /// Controller pose in tracking space with x and z negated (see
    /// [`coord_transform_ovr`](crate::geometry::coord_transform_ovr)),
    /// `None` while it is not tracked.
    fn controller_pose(&self) -> Option<Pose>;
}

/// Pose from a row-major 3x4 device-to-tracking matrix.
pub fn pose_from_device_matrix(m: &[[f32; 4]; 3]) -> Pose {
    let rot = Matrix3::new(
        m[0][0] as f64, m[0][1] as f64, m[0][2] as f64,
        m[1][0] as f64, m[1][1] as f64, m[1][2] as f64,
        m[2][0] as f64, m[2][1] as f64, m[2][2] as f64,
    );
    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix(&rot));
    Pose::new(
        Vector3::new(m[0][3] as f64, m[1][3] as f64, m[2][3] as f64),
        rotation,
    )
}

/// Controller pose as the calibrator reads it.
pub fn controller_pose_from_device_matrix(m: &[[f32; 4]; 3]) -> Pose {
    coord_transform_ovr_pose(&pose_from_device_matrix(m))
}

/// Action for buttons that went down between two controller states.
/// Trigger grabs the camera, grip grabs the trackers.
pub fn button_from_edges(previous: u64, current: u64) -> ButtonAction {
    let pressed = current & !previous;
    if pressed & BUTTON_TRIGGER != 0 {
        ButtonAction::GrabCamera
    } else if pressed & BUTTON_GRIP != 0 {
        ButtonAction::GrabTrackers
    } else {
        ButtonAction::None
    }
}

#[derive(Debug, Default)]
struct MockState {
    pending_button: ButtonAction,
    button: ButtonAction,
    controller: Option<Pose>,
    quit: bool,
}

/// Scriptable client. Clones share state, so a handle kept by the caller
/// can press buttons on a client owned by the main loop.
#[derive(Debug, Clone, Default)]
pub struct MockVrClient {
    state: Arc<Mutex<MockState>>,
}

impl MockVrClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a button press for the next [`update_input_actions`](VrClient::update_input_actions).
    pub fn press(&self, action: ButtonAction) {
        self.state.lock().pending_button = action;
    }

    pub fn set_controller_pose(&self, pose: Option<Pose>) {
        self.state.lock().controller = pose;
    }

    pub fn request_quit(&self) {
        self.state.lock().quit = true;
    }
}

impl VrClient for MockVrClient {
    fn poll_events(&mut self) -> bool {
        std::mem::take(&mut self.state.lock().quit)
    }

    fn update_input_actions(&mut self) {
        let mut state = self.state.lock();
        state.button = std::mem::take(&mut state.pending_button);
    }

    fn button_action(&self) -> ButtonAction {
        self.state.lock().button
    }

    fn controller_pose(&self) -> Option<Pose> {
        self.state.lock().controller
    }
}
