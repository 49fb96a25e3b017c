pub mod board;
pub mod marker;

pub use board::{estimate_pose_board, match_board_points, BoardCorrespondences};
pub use marker::{to_grayscale, MarkerDetectionList, MarkerDetector};
