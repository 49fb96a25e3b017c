use anyhow::{anyhow, Result};
use openvr::{ApplicationType, Context, TrackedControllerRole, TrackingUniverseOrigin};
use tracing::info;

use super::{button_from_edges, controller_pose_from_device_matrix, ButtonAction, VrClient};
use crate::geometry::Pose;

/// SteamVR session reading the left hand controller.
///
/// The session is dropped when the runtime quits; the client then reports
/// no buttons and no controller.
pub struct OpenVrClient {
    context: Option<Context>,
    previous_buttons: u64,
    button: ButtonAction,
    controller: Option<Pose>,
}

// The OpenVR C interfaces are not tied to the thread that opened them. The
// client is only used by the tracking thread once it is moved there.
unsafe impl Send for OpenVrClient {}

impl OpenVrClient {
    pub fn init() -> Result<Self> {
        // SAFETY: one session per client, shut down when `context` drops
        let context = unsafe { openvr::init(ApplicationType::Overlay) }
            .map_err(|e| anyhow!("OpenVR init failed: {:?}", e))?;
        context
            .system()
            .map_err(|e| anyhow!("OpenVR system unavailable: {:?}", e))?;
        info!("initialized OpenVR client");
        Ok(Self {
            context: Some(context),
            previous_buttons: 0,
            button: ButtonAction::None,
            controller: None,
        })
    }
}

impl VrClient for OpenVrClient {
    fn poll_events(&mut self) -> bool {
        let Some(system) = self.context.as_ref().and_then(|c| c.system().ok()) else {
            return false;
        };
        while let Some((info, _)) = system.poll_next_event_with_pose(TrackingUniverseOrigin::RawAndUncalibrated) {
            if let openvr::system::Event::Quit(_) = info.event {
                system.acknowledge_quit_exiting();
                self.context = None;
                return true;
            }
        }
        false
    }

    fn update_input_actions(&mut self) {
        self.button = ButtonAction::None;
        self.controller = None;
        let Some(system) = self.context.as_ref().and_then(|c| c.system().ok()) else {
            return;
        };
        let Some(index) = system.tracked_device_index_for_controller_role(TrackedControllerRole::LeftHand) else {
            self.previous_buttons = 0;
            return;
        };

        let buttons = system
            .controller_state(index)
            .map(|state| state.button_pressed)
            .unwrap_or(0);
        self.button = button_from_edges(self.previous_buttons, buttons);
        self.previous_buttons = buttons;

        let poses = system.device_to_absolute_tracking_pose(TrackingUniverseOrigin::RawAndUncalibrated, 0.0);
        if let Some(pose) = poses.get(index as usize).filter(|p| p.pose_is_valid()) {
            self.controller = Some(controller_pose_from_device_matrix(pose.device_to_absolute_tracking()));
        }
    }

    fn button_action(&self) -> ButtonAction {
        self.button
    }

    fn controller_pose(&self) -> Option<Pose> {
        self.controller
    }
}
