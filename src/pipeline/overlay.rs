use anyhow::Result;
use opencv::{
    core::{Mat, Point, Point2d, Scalar, Size},
    imgproc,
    prelude::*,
};

use super::preprocess::{draw_region, MaskRegion};
use crate::geometry::constrain_size;
use crate::pose::MarkerDetectionList;

fn red() -> Scalar {
    Scalar::new(0.0, 0.0, 255.0, 0.0)
}

fn green() -> Scalar {
    Scalar::new(0.0, 255.0, 0.0, 0.0)
}

fn to_point(x: f64, y: f64) -> Point {
    Point::new(x.round() as i32, y.round() as i32)
}

/// Debug view of one frame: search regions, driver predictions, detected
/// markers and the processing time, scaled so the shorter side is
/// `preview_size`.
pub fn draw_preview(
    frame: &Mat,
    regions: &[MaskRegion],
    driver_points: &[Option<Point2d>],
    detections: &MarkerDetectionList,
    frame_time: f64,
    preview_size: i32,
) -> Result<Mat> {
    let mut image = frame.try_clone()?;
    let height = image.rows();

    for region in regions {
        draw_region(&mut image, region, height, red(), 2)?;
    }
    for p in driver_points.iter().flatten() {
        imgproc::circle(&mut image, to_point(p.x, p.y), 5, red(), -1, imgproc::LINE_8, 0)?;
    }
    for quad in &detections.corners {
        for i in 0..4 {
            let a = quad[i];
            let b = quad[(i + 1) % 4];
            imgproc::line(
                &mut image,
                to_point(a.x as f64, a.y as f64),
                to_point(b.x as f64, b.y as f64),
                green(),
                2,
                imgproc::LINE_8,
                0,
            )?;
        }
    }

    let label = format!("{:.1} ms", frame_time * 1000.0);
    imgproc::put_text(
        &mut image,
        &label,
        Point::new(12, 42),
        imgproc::FONT_HERSHEY_SIMPLEX,
        1.2,
        green(),
        2,
        imgproc::LINE_8,
        false,
    )?;

    let (w, h) = constrain_size(image.cols(), height, preview_size);
    let mut resized = Mat::default();
    imgproc::resize(&image, &mut resized, Size::new(w, h), 0.0, 0.0, imgproc::INTER_LINEAR)?;
    Ok(resized)
}
