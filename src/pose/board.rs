use anyhow::{Context, Result};
use nalgebra::Vector3;
use opencv::{
    calib3d,
    core::{Point2f, Point3f, Vector},
};

use super::marker::MarkerDetectionList;
use crate::calibration::{mat_to_vec, vec_to_mat, CameraIntrinsics};
use crate::geometry::Pose;
use crate::tracker::MarkerBoard;

/// 3D board corners paired with their detected 2D corners.
#[derive(Debug, Default)]
pub struct BoardCorrespondences {
    pub object_points: Vec<Point3f>,
    pub image_points: Vec<Point2f>,
    /// Number of matched markers
    pub markers: usize,
}

/// Pair detected markers with the board's geometry. Markers that are not
/// part of the board are skipped.
pub fn match_board_points(
    detections: &MarkerDetectionList,
    board: &MarkerBoard,
) -> BoardCorrespondences {
    let mut out = BoardCorrespondences::default();
    for (id, image_corners) in detections.ids.iter().zip(&detections.corners) {
        let Some(board_corners) = board.corners_of(*id) else {
            continue;
        };
        for (obj, img) in board_corners.iter().zip(image_corners) {
            out.object_points.push(Point3f::new(obj[0], obj[1], obj[2]));
            out.image_points.push(*img);
        }
        out.markers += 1;
    }
    out
}

/// Pose of `board` in camera space (unscaled) and the number of markers
/// used. `guess` seeds the solver when given. Returns `None` when no board
/// marker was detected or the solver gave up.
pub fn estimate_pose_board(
    detections: &MarkerDetectionList,
    board: &MarkerBoard,
    camera: &CameraIntrinsics,
    guess: Option<&Pose>,
) -> Result<Option<(Pose, usize)>> {
    let matched = match_board_points(detections, board);
    if matched.markers == 0 {
        return Ok(None);
    }

    let obj_pts: Vector<Point3f> = matched.object_points.into_iter().collect();
    let img_pts: Vector<Point2f> = matched.image_points.into_iter().collect();

    let (mut rvec, mut tvec) = match guess {
        Some(pose) => {
            let r = pose.rvec();
            let t = pose.position;
            (vec_to_mat(&[r.x, r.y, r.z])?, vec_to_mat(&[t.x, t.y, t.z])?)
        }
        None => (vec_to_mat(&[0.0; 3])?, vec_to_mat(&[0.0; 3])?),
    };

    let ok = calib3d::solve_pnp(
        &obj_pts,
        &img_pts,
        &camera.camera_matrix_mat()?,
        &camera.dist_coeffs_mat()?,
        &mut rvec,
        &mut tvec,
        guess.is_some(),
        calib3d::SOLVEPNP_ITERATIVE,
    )
    .context("solvePnP failed")?;

    if !ok {
        return Ok(None);
    }

    let r = mat_to_vec(&rvec)?;
    let t = mat_to_vec(&tvec)?;
    if r.len() < 3 || t.len() < 3 {
        return Ok(None);
    }
    let pose = Pose::from_rvec_tvec(
        &Vector3::new(r[0], r[1], r[2]),
        &Vector3::new(t[0], t[1], t[2]),
    );
    Ok(Some((pose, matched.markers)))
}
