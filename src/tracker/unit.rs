use anyhow::{bail, Result};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::geometry::Pose;

/// Slot a tracker fills in the VR runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerRole {
    #[default]
    Disabled,
    Waist,
    RightFoot,
    LeftFoot,
}

impl TrackerRole {
    /// Role string the driver expects in `addtracker`.
    pub fn as_driver_str(&self) -> &'static str {
        match self {
            TrackerRole::Disabled => "TrackerRole_Disabled",
            TrackerRole::Waist => "TrackerRole_Waist",
            TrackerRole::RightFoot => "TrackerRole_RightFoot",
            TrackerRole::LeftFoot => "TrackerRole_LeftFoot",
        }
    }
}

/// Four marker corners in tracker-local space (meters).
pub type MarkerCorners = [[f32; 3]; 4];

/// Marker layout of one tracker: ids with their corners, indexed together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerBoard {
    pub ids: Vec<i32>,
    pub corners: Vec<MarkerCorners>,
}

impl MarkerBoard {
    pub fn new(ids: Vec<i32>, corners: Vec<MarkerCorners>) -> Result<Self> {
        let board = Self { ids, corners };
        board.validate()?;
        Ok(board)
    }

    /// Square marker of side `size` centered on the origin, in the corner
    /// order the detector reports.
    pub fn model_marker(size: f32) -> MarkerCorners {
        let h = size / 2.0;
        [[-h, h, 0.0], [h, h, 0.0], [h, -h, 0.0], [-h, -h, 0.0]]
    }

    pub fn validate(&self) -> Result<()> {
        if self.ids.len() != self.corners.len() {
            bail!(
                "marker board has {} ids but {} corner sets",
                self.ids.len(),
                self.corners.len()
            );
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Corners of marker `id`, if it belongs to this board.
    pub fn corners_of(&self, id: i32) -> Option<&MarkerCorners> {
        self.ids
            .iter()
            .position(|&i| i == id)
            .and_then(|idx| self.corners.get(idx))
    }
}

/// One physical tracker and its per-frame state.
#[derive(Debug, Clone)]
pub struct TrackerUnit {
    pub board: MarkerBoard,
    pub role: TrackerRole,
    /// Last local estimate, camera space, scaled
    pub estimated_pose: Pose,
    /// Last pose reported by the driver, camera space, scaled
    pub pose_from_driver: Pose,
    pub was_visible_last_frame: bool,
    pub was_visible_to_driver_last_frame: bool,
    pub mask_center: Point2<f64>,
}

impl Default for TrackerUnit {
    fn default() -> Self {
        Self::new(MarkerBoard::default(), TrackerRole::Disabled)
    }
}

impl TrackerUnit {
    pub fn new(board: MarkerBoard, role: TrackerRole) -> Self {
        Self {
            board,
            role,
            estimated_pose: Pose::identity(),
            pose_from_driver: Pose::identity(),
            was_visible_last_frame: false,
            was_visible_to_driver_last_frame: false,
            mask_center: Point2::origin(),
        }
    }
}
