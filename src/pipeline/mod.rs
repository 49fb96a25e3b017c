pub mod estimate;
pub mod overlay;
pub mod preprocess;
pub mod runner;

pub use estimate::{is_within_fov, smooth_depth, EstimateOutcome, EstimatorSettings, PoseEstimator};
pub use preprocess::{choose_mask_anchor, MaskRegion, Preprocessor, SearchMode, SearchWindow};
pub use runner::{LoopControl, LoopShared, MainLoopRunner};
