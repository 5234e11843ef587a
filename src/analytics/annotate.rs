use opencv::core::{Mat, Rect, Scalar, Size, Vector};
use opencv::imgcodecs;
use opencv::imgproc;
use opencv::prelude::*;

use super::object::Detection;
use crate::source::Frame;

const BOX_COLOR: (f64, f64, f64) = (255.0, 56.0, 56.0);
const JPEG_QUALITY: i32 = 90;

/// Rendered preview of a frame with its detections drawn in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedFrame {
    pub width: i32,
    pub height: i32,
    pub jpeg: Vec<u8>,
}

/// Draws unlabelled boxes and scales the result to fit a square preview.
#[derive(Debug, Clone, Copy)]
pub struct Annotator {
    max_size: i32,
}

impl Annotator {
    pub fn new(max_size: u32) -> Self {
        Self {
            max_size: max_size.max(1) as i32,
        }
    }

    pub fn render(
        &self,
        frame: &Frame,
        detections: &[Detection],
    ) -> opencv::Result<AnnotatedFrame> {
        let mut canvas = frame.mat().try_clone()?;
        let thickness = line_thickness(frame.width(), frame.height());
        let color = Scalar::new(BOX_COLOR.0, BOX_COLOR.1, BOX_COLOR.2, 0.0);

        for detection in detections {
            let bbox = &detection.bbox;
            let rect = Rect::new(
                bbox.x1 as i32,
                bbox.y1 as i32,
                (bbox.width() as i32).max(1),
                (bbox.height() as i32).max(1),
            );
            imgproc::rectangle(&mut canvas, rect, color, thickness, imgproc::LINE_8, 0)?;
        }

        let (width, height) = fit_size(frame.width(), frame.height(), self.max_size);
        let preview = if (width, height) == (frame.width(), frame.height()) {
            canvas
        } else {
            let mut resized = Mat::default();
            imgproc::resize(
                &canvas,
                &mut resized,
                Size::new(width, height),
                0.0,
                0.0,
                imgproc::INTER_AREA,
            )?;
            resized
        };

        Ok(AnnotatedFrame {
            width,
            height,
            jpeg: encode_jpeg(&preview)?,
        })
    }
}

/// Largest size with the frame's aspect ratio that fits `max_size` square.
fn fit_size(width: i32, height: i32, max_size: i32) -> (i32, i32) {
    if width <= 0 || height <= 0 {
        return (width.max(0), height.max(0));
    }
    let scale = (max_size as f64 / width as f64).min(max_size as f64 / height as f64);
    (
        ((width as f64 * scale) as i32).max(1),
        ((height as f64 * scale) as i32).max(1),
    )
}

fn line_thickness(width: i32, height: i32) -> i32 {
    (((width + height) as f64 / 2.0 * 0.003).round() as i32).max(2)
}

fn encode_jpeg(mat: &Mat) -> opencv::Result<Vec<u8>> {
    let mut buf = Vector::<u8>::new();
    let params = Vector::<i32>::from_slice(&[imgcodecs::IMWRITE_JPEG_QUALITY, JPEG_QUALITY]);
    imgcodecs::imencode(".jpg", mat, &mut buf, &params)?;
    Ok(buf.to_vec())
}
