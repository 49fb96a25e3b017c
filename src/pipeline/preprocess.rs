use anyhow::Result;
use nalgebra::{Point2, Vector3};
use opencv::{
    calib3d,
    core::{self, Mat, Point, Point2d, Point3d, Rect, Scalar, Vector, CV_8UC1},
    imgproc,
    prelude::*,
};

use crate::calibration::{vec_to_mat, CameraIntrinsics};
use crate::tracker::TrackerUnit;

/// Frames with a tracker missing before the search falls back to strips.
pub const STRIP_FALLBACK_FRAMES: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Circular,
    Strip,
}

/// Circular search while trackers are found, vertical strips once one has
/// been missing for too long.
#[derive(Debug, Clone)]
pub struct SearchWindow {
    frames_missing: u32,
    circular_enabled: bool,
}

impl SearchWindow {
    pub fn new(circular_enabled: bool) -> Self {
        Self {
            frames_missing: 0,
            circular_enabled,
        }
    }

    pub fn update(&mut self, any_missing: bool) -> SearchMode {
        if any_missing {
            self.frames_missing = self.frames_missing.saturating_add(1);
        } else {
            self.frames_missing = 0;
        }
        if !self.circular_enabled || self.frames_missing > STRIP_FALLBACK_FRAMES {
            SearchMode::Strip
        } else {
            SearchMode::Circular
        }
    }
}

/// Region stamped onto the detection mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaskRegion {
    Circle { center: Point, radius: i32 },
    Strip { center_x: i32, half_width: i32 },
}

/// Where to center the search for a tracker. A tracker lost last frame is
/// searched where the driver predicts it, otherwise around the previous
/// estimate.
pub fn choose_mask_anchor(
    was_visible_last_frame: bool,
    driver_point: Option<Point2d>,
    estimate_point: Option<Point2d>,
) -> Option<Point2d> {
    if was_visible_last_frame {
        estimate_point
    } else {
        driver_point
    }
}

pub fn is_inside_image(point: &Point2d, width: i32, height: i32) -> bool {
    point.x >= 0.0 && point.y >= 0.0 && point.x < width as f64 && point.y < height as f64
}

/// Project a camera space point to pixels. Points behind the camera have
/// no projection.
pub fn project_point(camera: &CameraIntrinsics, position: &Vector3<f64>) -> Result<Option<Point2d>> {
    if !(position.z > 0.0) {
        return Ok(None);
    }
    let object = Vector::<Point3d>::from_iter([Point3d::new(position.x, position.y, position.z)]);
    let mut image = Vector::<Point2d>::new();
    let zero = vec_to_mat(&[0.0; 3])?;
    calib3d::project_points_def(
        &object,
        &zero,
        &zero,
        &camera.camera_matrix_mat()?,
        &camera.dist_coeffs_mat()?,
        &mut image,
    )?;
    Ok(image.iter().next())
}

/// Per frame search masking.
pub struct Preprocessor {
    window: SearchWindow,
    search_window: f64,
    mask: Mat,
    /// Regions masked this frame, for the preview overlay
    pub regions: Vec<MaskRegion>,
    /// Driver predicted image position per tracker, for the preview overlay
    pub driver_points: Vec<Option<Point2d>>,
}

impl Preprocessor {
    pub fn new(circular_window: bool, search_window: f64) -> Self {
        Self {
            window: SearchWindow::new(circular_window),
            search_window,
            mask: Mat::default(),
            regions: Vec::new(),
            driver_points: Vec::new(),
        }
    }

    /// Fill `out` with the image detection should run on: `gray` masked to
    /// the search regions, or `gray` itself when nothing was masked.
    /// Trackers whose anchor left the image are marked not visible.
    pub fn process(
        &mut self,
        gray: &Mat,
        trackers: &mut [TrackerUnit],
        camera: &CameraIntrinsics,
        out: &mut Mat,
    ) -> Result<()> {
        let any_missing = trackers.iter().any(|t| !t.was_visible_last_frame);
        let mode = self.window.update(any_missing);

        let (width, height) = (gray.cols(), gray.rows());
        let radius = (height as f64 * self.search_window) as i32;

        self.regions.clear();
        self.driver_points.clear();
        for tracker in trackers.iter_mut() {
            let driver_point = project_point(camera, &tracker.pose_from_driver.position)?;
            let estimate_point = project_point(camera, &tracker.estimated_pose.position)?;
            self.driver_points.push(driver_point);

            let anchor = choose_mask_anchor(tracker.was_visible_last_frame, driver_point, estimate_point)
                .filter(|p| is_inside_image(p, width, height));
            let Some(anchor) = anchor else {
                tracker.was_visible_last_frame = false;
                continue;
            };
            tracker.mask_center = Point2::new(anchor.x, anchor.y);

            let center = Point::new(anchor.x as i32, anchor.y as i32);
            self.regions.push(match mode {
                SearchMode::Circular => MaskRegion::Circle { center, radius },
                SearchMode::Strip => MaskRegion::Strip {
                    center_x: center.x,
                    half_width: radius,
                },
            });
        }

        if self.regions.is_empty() {
            gray.copy_to(out)?;
            return Ok(());
        }

        self.mask = Mat::zeros(height, width, CV_8UC1)?.to_mat()?;
        for region in &self.regions {
            draw_region(&mut self.mask, region, height, Scalar::all(255.0), -1)?;
        }
        core::bitwise_and_def(gray, &self.mask, out)?;
        Ok(())
    }
}

/// Draw a mask region. `thickness < 0` fills it.
pub fn draw_region(
    image: &mut Mat,
    region: &MaskRegion,
    height: i32,
    color: Scalar,
    thickness: i32,
) -> Result<()> {
    match *region {
        MaskRegion::Circle { center, radius } => {
            imgproc::circle(image, center, radius, color, thickness, imgproc::LINE_8, 0)?;
        }
        MaskRegion::Strip {
            center_x,
            half_width,
        } => {
            let rect = Rect::new(center_x - half_width, 0, half_width * 2, height);
            imgproc::rectangle(image, rect, color, thickness, imgproc::LINE_8, 0)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{MarkerBoard, TrackerRole};

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            width: 640,
            height: 480,
            intrinsic_matrix: [500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0],
            dist_coeffs: vec![0.0; 5],
        }
    }

    fn tracker() -> TrackerUnit {
        TrackerUnit::new(
            MarkerBoard::new(vec![0], vec![MarkerBoard::model_marker(0.05)]).unwrap(),
            TrackerRole::Waist,
        )
    }

    #[test]
    fn test_hysteresis_switches_after_21_frames() {
        let mut window = SearchWindow::new(true);
        for frame in 1..=20 {
            assert_eq!(window.update(true), SearchMode::Circular, "frame {}", frame);
        }
        assert_eq!(window.update(true), SearchMode::Strip);
        // stays in strip mode while the tracker is still missing
        for _ in 0..50 {
            assert_eq!(window.update(true), SearchMode::Strip);
        }
        assert_eq!(window.update(false), SearchMode::Circular);
    }

    #[test]
    fn test_hysteresis_disabled_circle() {
        let mut window = SearchWindow::new(false);
        assert_eq!(window.update(false), SearchMode::Strip);
    }

    #[test]
    fn test_choose_mask_anchor() {
        let driver = Some(Point2d::new(1.0, 2.0));
        let estimate = Some(Point2d::new(3.0, 4.0));
        assert_eq!(choose_mask_anchor(true, driver, estimate), estimate);
        assert_eq!(choose_mask_anchor(false, driver, estimate), driver);
        assert_eq!(choose_mask_anchor(false, None, estimate), None);
    }

    #[test]
    fn test_is_inside_image() {
        assert!(is_inside_image(&Point2d::new(0.0, 0.0), 640, 480));
        assert!(is_inside_image(&Point2d::new(639.5, 479.5), 640, 480));
        assert!(!is_inside_image(&Point2d::new(640.0, 10.0), 640, 480));
        assert!(!is_inside_image(&Point2d::new(10.0, -1.0), 640, 480));
    }

    #[test]
    fn test_project_point() {
        let camera = intrinsics();
        let p = project_point(&camera, &Vector3::new(0.1, -0.2, 1.0))
            .unwrap()
            .unwrap();
        assert!((p.x - 370.0).abs() < 1e-6);
        assert!((p.y - 140.0).abs() < 1e-6);
        assert!(project_point(&camera, &Vector3::new(0.0, 0.0, -1.0))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_process_masks_around_estimate() {
        let camera = intrinsics();
        let gray = Mat::new_rows_cols_with_default(480, 640, CV_8UC1, Scalar::all(200.0)).unwrap();

        let mut trackers = vec![tracker()];
        trackers[0].was_visible_last_frame = true;
        trackers[0].estimated_pose.position = Vector3::new(0.0, 0.0, 1.0);

        let mut pre = Preprocessor::new(true, 0.25);
        let mut out = Mat::default();
        pre.process(&gray, &mut trackers, &camera, &mut out).unwrap();

        assert_eq!(pre.regions.len(), 1);
        assert!(trackers[0].was_visible_last_frame);
        assert_eq!(*out.at_2d::<u8>(240, 320).unwrap(), 200);
        assert_eq!(*out.at_2d::<u8>(0, 0).unwrap(), 0);
        assert!((trackers[0].mask_center.x - 320.0).abs() < 1e-6);
    }

    #[test]
    fn test_process_anchor_off_image() {
        let camera = intrinsics();
        let gray = Mat::new_rows_cols_with_default(480, 640, CV_8UC1, Scalar::all(200.0)).unwrap();

        // lost last frame and the driver places it behind the camera
        let mut trackers = vec![tracker()];
        trackers[0].pose_from_driver.position = Vector3::new(0.0, 0.0, -1.0);

        let mut pre = Preprocessor::new(true, 0.25);
        let mut out = Mat::default();
        pre.process(&gray, &mut trackers, &camera, &mut out).unwrap();

        assert!(pre.regions.is_empty());
        assert!(!trackers[0].was_visible_last_frame);
        // nothing masked, detection runs on the full image
        assert_eq!(*out.at_2d::<u8>(0, 0).unwrap(), 200);
    }

    #[test]
    fn test_strip_region_covers_full_height() {
        let mut mask = Mat::zeros(100, 100, CV_8UC1).unwrap().to_mat().unwrap();
        let region = MaskRegion::Strip {
            center_x: 50,
            half_width: 10,
        };
        draw_region(&mut mask, &region, 100, Scalar::all(255.0), -1).unwrap();
        assert_eq!(*mask.at_2d::<u8>(0, 50).unwrap(), 255);
        assert_eq!(*mask.at_2d::<u8>(99, 45).unwrap(), 255);
        assert_eq!(*mask.at_2d::<u8>(50, 5).unwrap(), 0);
    }
}
