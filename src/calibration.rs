use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use opencv::{
    core::{Mat, CV_64F},
    objdetect::{self, Dictionary, PredefinedDictionaryType},
    prelude::*,
};

use crate::tracker::MarkerBoard;

// --- Data ---

/// Intrinsics of the tracking camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Resolution the intrinsics were measured at
    pub width: u32,
    pub height: u32,
    /// K (row-major 3x3)
    pub intrinsic_matrix: [f64; 9],
    pub dist_coeffs: Vec<f64>,
}

/// Everything the calibration wizards produce
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationData {
    #[serde(default)]
    pub camera: Option<CameraIntrinsics>,
    /// Marker board per tracker, same order as the configured trackers
    #[serde(default)]
    pub trackers: Vec<MarkerBoard>,
}

impl CameraIntrinsics {
    pub fn fx(&self) -> f64 {
        self.intrinsic_matrix[0]
    }

    pub fn fy(&self) -> f64 {
        self.intrinsic_matrix[4]
    }

    pub fn cx(&self) -> f64 {
        self.intrinsic_matrix[2]
    }

    pub fn cy(&self) -> f64 {
        self.intrinsic_matrix[5]
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("camera calibration has no resolution");
        }
        if !(self.fx() > 0.0 && self.fy() > 0.0) {
            bail!("camera calibration has invalid focal length");
        }
        Ok(())
    }

    /// Largest |x/z| and |y/z| inside the field of view for an image of
    /// `width` x `height`.
    pub fn fov_ratio_limits(&self, width: i32, height: i32) -> (f64, f64) {
        (
            0.5 * width as f64 / self.fx(),
            0.5 * height as f64 / self.fy(),
        )
    }

    pub fn camera_matrix_mat(&self) -> Result<Mat> {
        let mut k = Mat::zeros(3, 3, CV_64F)?.to_mat()?;
        for r in 0..3 {
            for c in 0..3 {
                *k.at_2d_mut::<f64>(r as i32, c as i32)? = self.intrinsic_matrix[r * 3 + c];
            }
        }
        Ok(k)
    }

    pub fn dist_coeffs_mat(&self) -> Result<Mat> {
        vec_to_mat(&self.dist_coeffs)
    }
}

impl CalibrationData {
    /// Intrinsics, failing when the camera has not been calibrated.
    pub fn require_camera(&self) -> Result<&CameraIntrinsics> {
        let camera = self
            .camera
            .as_ref()
            .context("camera is not calibrated")?;
        camera.validate()?;
        Ok(camera)
    }

    /// Every tracker board must exist and be consistent.
    pub fn require_trackers(&self, expected: usize) -> Result<()> {
        if self.trackers.len() != expected {
            bail!(
                "{} trackers configured but {} calibrated",
                expected,
                self.trackers.len()
            );
        }
        for (i, board) in self.trackers.iter().enumerate() {
            if board.is_empty() {
                bail!("tracker {} is not calibrated", i);
            }
            board
                .validate()
                .with_context(|| format!("tracker {} calibration is invalid", i))?;
        }
        Ok(())
    }
}

// --- Save / Load ---

pub fn load_calibration<P: AsRef<Path>>(path: P) -> Result<CalibrationData> {
    let content = fs::read_to_string(path).context("Failed to read calibration file")?;
    let cal: CalibrationData = serde_json::from_str(&content)?;
    for board in &cal.trackers {
        board.validate()?;
    }
    Ok(cal)
}

// --- Dictionary ---

pub fn parse_dictionary(name: &str) -> Result<Dictionary> {
    let dict_type = match name {
        "DICT_4X4_50" => PredefinedDictionaryType::DICT_4X4_50,
        "DICT_4X4_100" => PredefinedDictionaryType::DICT_4X4_100,
        "DICT_4X4_250" => PredefinedDictionaryType::DICT_4X4_250,
        "DICT_5X5_50" => PredefinedDictionaryType::DICT_5X5_50,
        "DICT_5X5_100" => PredefinedDictionaryType::DICT_5X5_100,
        "DICT_6X6_50" => PredefinedDictionaryType::DICT_6X6_50,
        "DICT_ARUCO_ORIGINAL" => PredefinedDictionaryType::DICT_ARUCO_ORIGINAL,
        "DICT_APRILTAG_16h5" => PredefinedDictionaryType::DICT_APRILTAG_16h5,
        "DICT_APRILTAG_25h9" => PredefinedDictionaryType::DICT_APRILTAG_25h9,
        "DICT_APRILTAG_36h11" => PredefinedDictionaryType::DICT_APRILTAG_36h11,
        _ => bail!("Unknown dictionary: {}", name),
    };
    objdetect::get_predefined_dictionary(dict_type).context("Failed to get predefined dictionary")
}

// --- Mat conversion ---

/// Nx1 Mat (f64)
pub fn vec_to_mat(values: &[f64]) -> Result<Mat> {
    let mut mat = Mat::zeros(values.len().max(1) as i32, 1, CV_64F)?.to_mat()?;
    for (i, v) in values.iter().enumerate() {
        *mat.at_2d_mut::<f64>(i as i32, 0)? = *v;
    }
    Ok(mat)
}

/// Vec<f64> from Mat (Nx1 or 1xN)
pub fn mat_to_vec(mat: &Mat) -> Result<Vec<f64>> {
    let n = mat.rows().max(mat.cols()) as usize;
    let mut v = Vec::with_capacity(n);
    let is_row = mat.rows() == 1;
    for i in 0..n {
        let val = if is_row {
            *mat.at_2d::<f64>(0, i as i32)?
        } else {
            *mat.at_2d::<f64>(i as i32, 0)?
        };
        v.push(val);
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            width: 640,
            height: 480,
            intrinsic_matrix: [500.0, 0.0, 320.0, 0.0, 400.0, 240.0, 0.0, 0.0, 1.0],
            dist_coeffs: vec![0.1, -0.05, 0.0, 0.0, 0.0],
        }
    }

    #[test]
    fn test_intrinsics_accessors() {
        let k = intrinsics();
        assert_eq!(k.fx(), 500.0);
        assert_eq!(k.fy(), 400.0);
        assert_eq!(k.cx(), 320.0);
        assert_eq!(k.cy(), 240.0);
        let (x, y) = k.fov_ratio_limits(640, 480);
        assert!((x - 0.64).abs() < 1e-12);
        assert!((y - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_intrinsics_validate() {
        assert!(intrinsics().validate().is_ok());
        let mut k = intrinsics();
        k.intrinsic_matrix[0] = 0.0;
        assert!(k.validate().is_err());
        let mut k = intrinsics();
        k.height = 0;
        assert!(k.validate().is_err());
    }

    #[test]
    fn test_require_trackers() {
        let board = MarkerBoard::new(vec![0], vec![MarkerBoard::model_marker(0.05)]).unwrap();
        let data = CalibrationData {
            camera: Some(intrinsics()),
            trackers: vec![board.clone(), MarkerBoard::default()],
        };
        assert!(data.require_camera().is_ok());
        assert!(data.require_trackers(3).is_err());
        // second board empty
        assert!(data.require_trackers(2).is_err());

        let data = CalibrationData {
            camera: None,
            trackers: vec![board],
        };
        assert!(data.require_camera().is_err());
        assert!(data.require_trackers(1).is_ok());
    }

    #[test]
    fn test_load_calibration() {
        let path = std::env::temp_dir().join(format!("fiducial_calib_{}.json", std::process::id()));
        let data = CalibrationData {
            camera: Some(intrinsics()),
            trackers: vec![MarkerBoard::new(vec![4, 5], vec![MarkerBoard::model_marker(0.04); 2]).unwrap()],
        };
        std::fs::write(&path, serde_json::to_string_pretty(&data).unwrap()).unwrap();
        let loaded = load_calibration(&path).unwrap();
        assert_eq!(loaded, data);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_rejects_inconsistent_board() {
        let path = std::env::temp_dir().join(format!("fiducial_badcalib_{}.json", std::process::id()));
        std::fs::write(&path, r#"{"trackers":[{"ids":[1,2],"corners":[]}]}"#).unwrap();
        assert!(load_calibration(&path).is_err());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_camera_matrix_mat() {
        let k = intrinsics().camera_matrix_mat().unwrap();
        assert_eq!(*k.at_2d::<f64>(0, 0).unwrap(), 500.0);
        assert_eq!(*k.at_2d::<f64>(1, 2).unwrap(), 240.0);
        let d = intrinsics().dist_coeffs_mat().unwrap();
        assert_eq!(mat_to_vec(&d).unwrap(), vec![0.1, -0.05, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_parse_dictionary() {
        assert!(parse_dictionary("DICT_4X4_50").is_ok());
        assert!(parse_dictionary("DICT_9X9_1").is_err());
    }
}
