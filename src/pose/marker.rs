use anyhow::{Context, Result};
use opencv::{
    core::{AlgorithmHint, Mat, Point2f, Vector},
    imgproc,
    objdetect::{
        self, ArucoDetector, DetectorParameters, DetectorParametersTrait, RefineParameters,
    },
    prelude::*,
};

use crate::calibration::parse_dictionary;

/// Markers found in one frame, in detection order.
#[derive(Debug, Clone, Default)]
pub struct MarkerDetectionList {
    pub ids: Vec<i32>,
    pub corners: Vec<[Point2f; 4]>,
    pub centers: Vec<Point2f>,
}

impl MarkerDetectionList {
    pub fn clear(&mut self) {
        self.ids.clear();
        self.corners.clear();
        self.centers.clear();
    }

    pub fn push(&mut self, id: i32, corners: [Point2f; 4]) {
        let mut center = Point2f::new(0.0, 0.0);
        for c in &corners {
            center.x += c.x / 4.0;
            center.y += c.y / 4.0;
        }
        self.ids.push(id);
        self.corners.push(corners);
        self.centers.push(center);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// ArUco detector. Inverted markers are accepted and corners are refined
/// along the contour.
pub struct MarkerDetector {
    detector: ArucoDetector,
}

impl MarkerDetector {
    pub fn new(dictionary: &str) -> Result<Self> {
        let dict = parse_dictionary(dictionary)?;

        let mut det_params = DetectorParameters::default()?;
        det_params.set_detect_inverted_marker(true);
        det_params
            .set_corner_refinement_method(objdetect::CornerRefineMethod::CORNER_REFINE_CONTOUR as i32);
        let refine_params = RefineParameters::new(10.0, 3.0, true)?;

        let detector = ArucoDetector::new(&dict, &det_params, refine_params)
            .context("Failed to create ArucoDetector")?;
        Ok(Self { detector })
    }

    /// Detect markers in a grayscale image, overwriting `out`.
    pub fn detect(&self, gray: &Mat, out: &mut MarkerDetectionList) -> Result<()> {
        let mut corners = Vector::<Vector<Point2f>>::new();
        let mut ids = Vector::<i32>::new();
        let mut rejected = Vector::<Vector<Point2f>>::new();

        self.detector
            .detect_markers(gray, &mut corners, &mut ids, &mut rejected)
            .context("detect_markers failed")?;

        out.clear();
        for (id, quad) in ids.iter().zip(corners.iter()) {
            if quad.len() != 4 {
                continue;
            }
            out.push(id, [quad.get(0)?, quad.get(1)?, quad.get(2)?, quad.get(3)?]);
        }
        Ok(())
    }
}

/// BGR (or already single channel) image to grayscale.
pub fn to_grayscale(image: &Mat, gray: &mut Mat) -> Result<()> {
    if image.channels() == 1 {
        image.copy_to(gray)?;
        return Ok(());
    }
    imgproc::cvt_color(
        image,
        gray,
        imgproc::COLOR_BGR2GRAY,
        0,
        AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_list_center() {
        let mut list = MarkerDetectionList::default();
        list.push(
            7,
            [
                Point2f::new(0.0, 0.0),
                Point2f::new(10.0, 0.0),
                Point2f::new(10.0, 20.0),
                Point2f::new(0.0, 20.0),
            ],
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list.ids[0], 7);
        assert!((list.centers[0].x - 5.0).abs() < 1e-6);
        assert!((list.centers[0].y - 10.0).abs() < 1e-6);

        list.clear();
        assert!(list.is_empty());
        assert!(list.corners.is_empty());
        assert!(list.centers.is_empty());
    }

    #[test]
    fn test_detect_on_blank_image() {
        let detector = MarkerDetector::new("DICT_4X4_50").unwrap();
        let gray = Mat::zeros(120, 160, opencv::core::CV_8UC1)
            .unwrap()
            .to_mat()
            .unwrap();
        let mut list = MarkerDetectionList::default();
        list.push(1, [Point2f::new(0.0, 0.0); 4]);
        detector.detect(&gray, &mut list).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_unknown_dictionary() {
        assert!(MarkerDetector::new("DICT_NOPE").is_err());
    }
}
