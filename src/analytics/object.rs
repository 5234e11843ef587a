use std::path::{Path, PathBuf};

use ndarray::{Array4, ArrayViewD, Ix3};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;
use serde::Serialize;
use thiserror::Error;

use crate::config::ModelConfig;
use crate::source::Frame;

const END_TO_END_LOGITS: &str = "logits";
const END_TO_END_BOXES: &str = "pred_boxes";
const ULTRALYTICS_OUTPUT: &str = "output0";
const LETTERBOX_FILL: f64 = 114.0;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unsupported model output: {0}")]
    UnsupportedModel(String),
}

fn inference_error(err: impl std::fmt::Display) -> DetectionError {
    DetectionError::Inference(err.to_string())
}

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("model file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to build session for {}: {message}", .path.display())]
    Session { path: PathBuf, message: String },
}

fn session_error(path: &Path, err: impl std::fmt::Display) -> ModelLoadError {
    ModelLoadError::Session {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Signed area; degenerate or inverted boxes come out at zero or below.
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = w * h;
        let union = self.area().max(0.0) + other.area().max(0.0) - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_id: usize,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            bbox,
            confidence,
            class_id: 0,
        }
    }
}

/// Object detector consulted once per frame.
pub trait Detector: Send {
    fn name(&self) -> &str;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectionError>;
}

/// Builds a detector from a model path.
pub trait ModelLoader: Send {
    fn load(&self, path: &Path) -> Result<Box<dyn Detector>, ModelLoadError>;
}

pub struct OnnxModelLoader {
    config: ModelConfig,
}

impl OnnxModelLoader {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn Detector>, ModelLoadError> {
        Ok(Box::new(OnnxDetector::new(path, &self.config)?))
    }
}

/// Maps model input coordinates back onto the source frame.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    frame_w: f32,
    frame_h: f32,
}

impl Letterbox {
    fn new(frame_w: f32, frame_h: f32, input_size: f32) -> Self {
        let scale = (input_size / frame_w).min(input_size / frame_h);
        let new_w = (frame_w * scale).round();
        let new_h = (frame_h * scale).round();
        Self {
            scale,
            pad_x: ((input_size - new_w) / 2.0).floor(),
            pad_y: ((input_size - new_h) / 2.0).floor(),
            frame_w,
            frame_h,
        }
    }

    /// Centre-format box in model input pixels to a clamped frame box.
    fn to_frame(&self, cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
        let x1 = ((cx - w / 2.0) - self.pad_x) / self.scale;
        let y1 = ((cy - h / 2.0) - self.pad_y) / self.scale;
        let x2 = ((cx + w / 2.0) - self.pad_x) / self.scale;
        let y2 = ((cy + h / 2.0) - self.pad_y) / self.scale;

        BoundingBox::new(
            x1.clamp(0.0, self.frame_w),
            y1.clamp(0.0, self.frame_h),
            x2.clamp(0.0, self.frame_w),
            y2.clamp(0.0, self.frame_h),
        )
    }
}

enum RawOutput {
    EndToEnd {
        logits: ndarray::ArrayD<f32>,
        boxes: ndarray::ArrayD<f32>,
    },
    Ultralytics(ndarray::ArrayD<f32>),
}

pub struct OnnxDetector {
    session: Session,
    model_path: String,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl OnnxDetector {
    pub fn new(model_path: &Path, config: &ModelConfig) -> Result<Self, ModelLoadError> {
        if !model_path.is_file() {
            return Err(ModelLoadError::NotFound(model_path.to_path_buf()));
        }

        let builder = Session::builder().map_err(|e| session_error(model_path, e))?;
        let builder = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| session_error(model_path, e))?;
        let builder = builder
            .with_intra_threads(config.intra_threads)
            .map_err(|e| session_error(model_path, e))?;
        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| session_error(model_path, e))?;

        tracing::info!(
            model = %model_path.display(),
            input_size = config.input_size,
            confidence = config.confidence_threshold,
            "detection model loaded"
        );

        Ok(Self {
            session,
            model_path: model_path.display().to_string(),
            input_size: config.input_size,
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
        })
    }

    fn preprocess(
        &self,
        frame: &opencv::core::Mat,
    ) -> Result<(Array4<f32>, Letterbox), DetectionError> {
        use opencv::core::{Mat, Size, BORDER_CONSTANT};
        use opencv::imgproc;
        use opencv::prelude::*;

        let input = self.input_size as usize;
        let letterbox = Letterbox::new(
            frame.cols() as f32,
            frame.rows() as f32,
            self.input_size as f32,
        );
        let new_w = (frame.cols() as f32 * letterbox.scale).round() as i32;
        let new_h = (frame.rows() as f32 * letterbox.scale).round() as i32;

        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            Size::new(new_w, new_h),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let pad_x = letterbox.pad_x as i32;
        let pad_y = letterbox.pad_y as i32;
        let mut padded = Mat::default();
        opencv::core::copy_make_border(
            &resized,
            &mut padded,
            pad_y,
            input as i32 - new_h - pad_y,
            pad_x,
            input as i32 - new_w - pad_x,
            BORDER_CONSTANT,
            opencv::core::Scalar::new(LETTERBOX_FILL, LETTERBOX_FILL, LETTERBOX_FILL, 0.0),
        )?;

        let mut rgb = Mat::default();
        imgproc::cvt_color(&padded, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

        let data = rgb.data_bytes()?;
        if data.len() < input * input * 3 {
            return Err(inference_error("frame data too small"));
        }

        let mut tensor = Array4::<f32>::zeros((1, 3, input, input));
        for y in 0..input {
            for x in 0..input {
                let idx = (y * input + x) * 3;
                tensor[[0, 0, y, x]] = data[idx] as f32 / 255.0;
                tensor[[0, 1, y, x]] = data[idx + 1] as f32 / 255.0;
                tensor[[0, 2, y, x]] = data[idx + 2] as f32 / 255.0;
            }
        }

        Ok((tensor, letterbox))
    }
}

impl Detector for OnnxDetector {
    fn name(&self) -> &str {
        &self.model_path
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }

        let (input_tensor, letterbox) = self.preprocess(frame.mat())?;

        let tensor_ref = TensorRef::from_array_view(input_tensor.view())
            .map_err(inference_error)?
            .into_dyn();
        let outputs = self
            .session
            .run(ort::inputs![tensor_ref])
            .map_err(inference_error)?;

        let raw = if let (Some(logits), Some(boxes)) =
            (outputs.get(END_TO_END_LOGITS), outputs.get(END_TO_END_BOXES))
        {
            RawOutput::EndToEnd {
                logits: logits
                    .try_extract_array::<f32>()
                    .map_err(inference_error)?
                    .to_owned(),
                boxes: boxes
                    .try_extract_array::<f32>()
                    .map_err(inference_error)?
                    .to_owned(),
            }
        } else if let Some(preds) = outputs.get(ULTRALYTICS_OUTPUT) {
            RawOutput::Ultralytics(
                preds
                    .try_extract_array::<f32>()
                    .map_err(inference_error)?
                    .to_owned(),
            )
        } else {
            return Err(DetectionError::UnsupportedModel(format!(
                "expected '{END_TO_END_LOGITS}'/'{END_TO_END_BOXES}' or '{ULTRALYTICS_OUTPUT}' outputs"
            )));
        };
        drop(outputs);

        let mut detections = match raw {
            RawOutput::EndToEnd { logits, boxes } => postprocess_end_to_end(
                &logits.view(),
                &boxes.view(),
                self.input_size as f32,
                self.confidence_threshold,
                &letterbox,
            )?,
            RawOutput::Ultralytics(preds) => {
                let candidates = postprocess_ultralytics(
                    &preds.view(),
                    self.confidence_threshold,
                    &letterbox,
                )?;
                non_max_suppression(candidates, self.iou_threshold)
            }
        };
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        tracing::trace!(count = detections.len(), "frame detected");
        Ok(detections)
    }
}

/// End-to-end exports: `logits` [1, N, C] plus `pred_boxes` [1, N, 4] holding
/// normalised centre boxes. Already deduplicated, so no NMS.
fn postprocess_end_to_end(
    logits: &ArrayViewD<f32>,
    boxes: &ArrayViewD<f32>,
    input_size: f32,
    confidence_threshold: f32,
    letterbox: &Letterbox,
) -> Result<Vec<Detection>, DetectionError> {
    let logits_shape = logits.shape();
    if logits_shape.len() < 2 || boxes.shape().len() < 2 {
        return Ok(Vec::new());
    }

    let (num_detections, num_classes) = if logits_shape.len() == 3 {
        (logits_shape[1], logits_shape[2])
    } else {
        (logits_shape[0], logits_shape[1])
    };

    let logits_flat = logits
        .as_slice()
        .ok_or_else(|| inference_error("logits are not contiguous"))?;
    let boxes_flat = boxes
        .as_slice()
        .ok_or_else(|| inference_error("boxes are not contiguous"))?;
    if logits_flat.len() < num_detections * num_classes || boxes_flat.len() < num_detections * 4 {
        return Err(DetectionError::UnsupportedModel(
            "logits and boxes disagree on detection count".to_string(),
        ));
    }

    let mut detections = Vec::new();
    for i in 0..num_detections {
        let mut max_score = 0.0f32;
        let mut max_class = 0usize;
        for j in 0..num_classes {
            let score = sigmoid(logits_flat[i * num_classes + j]);
            if score > max_score {
                max_score = score;
                max_class = j;
            }
        }

        if max_score < confidence_threshold {
            continue;
        }

        let cx = boxes_flat[i * 4] * input_size;
        let cy = boxes_flat[i * 4 + 1] * input_size;
        let w = boxes_flat[i * 4 + 2] * input_size;
        let h = boxes_flat[i * 4 + 3] * input_size;

        detections.push(Detection {
            bbox: letterbox.to_frame(cx, cy, w, h),
            confidence: max_score,
            class_id: max_class,
        });
    }

    Ok(detections)
}

/// Ultralytics exports: `output0` [1, 4 + C, N], centre boxes in input pixels
/// followed by per-class scores.
fn postprocess_ultralytics(
    preds: &ArrayViewD<f32>,
    confidence_threshold: f32,
    letterbox: &Letterbox,
) -> Result<Vec<Detection>, DetectionError> {
    let preds = preds
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|e| DetectionError::UnsupportedModel(e.to_string()))?;

    let (_, rows, anchors) = preds.dim();
    if rows < 5 {
        return Err(DetectionError::UnsupportedModel(format!(
            "expected at least 5 rows per anchor, got {rows}"
        )));
    }

    let mut detections = Vec::new();
    for i in 0..anchors {
        let (class_id, confidence) = (4..rows)
            .map(|row| (row - 4, preds[[0, row, i]]))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if confidence < confidence_threshold {
            continue;
        }

        detections.push(Detection {
            bbox: letterbox.to_frame(
                preds[[0, 0, i]],
                preds[[0, 1, i]],
                preds[[0, 2, i]],
                preds[[0, 3, i]],
            ),
            confidence,
            class_id,
        });
    }

    Ok(detections)
}

/// Greedy NMS: keeps the most confident box of every overlapping cluster.
fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let overlaps = kept
            .iter()
            .any(|k| k.bbox.iou(&candidate.bbox) > iou_threshold);
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}


#[cfg(test)]
mod tests {
    use ndarray::{Array3, ArrayD, IxDyn};

    use super::*;

    fn identity_letterbox(size: f32) -> Letterbox {
        Letterbox::new(size, size, size)
    }

    #[test]
    fn area_and_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert_eq!(a.area(), 100.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&BoundingBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
    }

    #[test]
    fn letterbox_undoes_padding_and_scale() {
        // 1280x640 frame into 640 input: scale 0.5, 160px vertical padding.
        let letterbox = Letterbox::new(1280.0, 640.0, 640.0);
        assert_eq!(letterbox.scale, 0.5);
        assert_eq!(letterbox.pad_x, 0.0);
        assert_eq!(letterbox.pad_y, 160.0);

        let bbox = letterbox.to_frame(320.0, 320.0, 100.0, 50.0);
        assert_eq!(bbox, BoundingBox::new(540.0, 270.0, 740.0, 370.0));
    }

    #[test]
    fn letterbox_clamps_to_frame() {
        let letterbox = identity_letterbox(100.0);
        let bbox = letterbox.to_frame(0.0, 95.0, 20.0, 20.0);
        assert_eq!(bbox, BoundingBox::new(0.0, 85.0, 10.0, 100.0));
    }

    #[test]
    fn end_to_end_filters_by_confidence() {
        // Two queries, one class: logit 3.0 passes, -3.0 does not.
        let logits = ArrayD::from_shape_vec(IxDyn(&[1, 2, 1]), vec![3.0, -3.0]).unwrap();
        let boxes = ArrayD::from_shape_vec(
            IxDyn(&[1, 2, 4]),
            vec![0.5, 0.5, 0.1, 0.1, 0.2, 0.2, 0.1, 0.1],
        )
        .unwrap();

        let detections = postprocess_end_to_end(
            &logits.view(),
            &boxes.view(),
            100.0,
            0.25,
            &identity_letterbox(100.0),
        )
        .unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox, BoundingBox::new(45.0, 45.0, 55.0, 55.0));
        assert!(detections[0].confidence > 0.9);
    }

    #[test]
    fn ultralytics_picks_best_class() {
        // [1, 4 + 2 classes, 2 anchors]
        let mut preds = Array3::<f32>::zeros((1, 6, 2));
        for (row, value) in [50.0, 50.0, 20.0, 10.0, 0.1, 0.8].into_iter().enumerate() {
            preds[[0, row, 0]] = value;
        }
        for (row, value) in [10.0, 10.0, 4.0, 4.0, 0.05, 0.1].into_iter().enumerate() {
            preds[[0, row, 1]] = value;
        }
        let preds = preds.into_dyn();

        let detections =
            postprocess_ultralytics(&preds.view(), 0.25, &identity_letterbox(100.0)).unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 1);
        assert_eq!(detections[0].bbox, BoundingBox::new(40.0, 45.0, 60.0, 55.0));
    }

    #[test]
    fn ultralytics_rejects_wrong_rank() {
        let preds = ArrayD::<f32>::zeros(IxDyn(&[6, 2]));
        let err = postprocess_ultralytics(&preds.view(), 0.25, &identity_letterbox(100.0))
            .unwrap_err();
        assert!(matches!(err, DetectionError::UnsupportedModel(_)));
    }

    #[test]
    fn nms_drops_overlapping_lower_confidence() {
        let candidates = vec![
            Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.6),
            Detection::new(BoundingBox::new(1.0, 1.0, 11.0, 11.0), 0.9),
            Detection::new(BoundingBox::new(50.0, 50.0, 60.0, 60.0), 0.5),
        ];

        let kept = non_max_suppression(candidates, 0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.5);
    }

    #[test]
    fn missing_model_file_is_not_found() {
        let loader = OnnxModelLoader::new(ModelConfig::default());
        let err = loader
            .load(Path::new("/nonexistent/larvae.onnx"))
            .err()
            .unwrap();
        assert!(matches!(err, ModelLoadError::NotFound(_)));
    }
}
