//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three stride levels with NMS post-processing.
//! The confidence threshold is fixed when the detector is constructed.

use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied by the letterbox resize, kept to map
/// detections back into original-frame coordinates.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// SCRFD-based face detector.
///
/// Output tensor ordering follows the standard SCRFD export:
/// [0-2] = scores, [3-5] = bboxes, [6-8] = landmarks, strides 8/16/32.
pub struct FaceDetector {
    session: Session,
    input_size: usize,
    confidence_threshold: f32,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model, fixing the confidence threshold for the
    /// lifetime of the detector.
    pub fn load(model_path: &str, confidence_threshold: f32) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        tracing::info!(
            path = model_path,
            outputs = num_outputs,
            threshold = confidence_threshold,
            "loaded SCRFD model"
        );

        if num_outputs < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {num_outputs}"
            )));
        }

        Ok(Self {
            session,
            input_size: SCRFD_INPUT_SIZE,
            confidence_threshold,
        })
    }

    /// Detect faces in a grayscale frame, returning bounding boxes sorted
    /// by descending confidence.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = self.letterbox_tensor(frame, width as usize, height as usize);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();

        for (level, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (_, scores) = outputs[level]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[level + 3]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("boxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[level + 6]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            decode_level(
                scores,
                boxes,
                kps,
                stride,
                self.input_size,
                &letterbox,
                self.confidence_threshold,
                &mut candidates,
            );
        }

        let mut faces = suppress(candidates, SCRFD_NMS_THRESHOLD);
        faces.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(faces)
    }

    /// Resize the grayscale frame into the letterboxed NCHW input tensor.
    ///
    /// Bilinear resize, centered padding filled with the model mean so the
    /// padding normalizes to zero.
    fn letterbox_tensor(&self, frame: &[u8], width: usize, height: usize) -> (Array4<f32>, Letterbox) {
        let side = self.input_size;
        let scale = (side as f32 / width as f32).min(side as f32 / height as f32);

        let new_w = (width as f32 * scale).round() as usize;
        let new_h = (height as f32 * scale).round() as usize;
        let pad_x = (side - new_w) as f32 / 2.0;
        let pad_y = (side - new_h) as f32 / 2.0;

        let resized = bilinear_resize(frame, width, height, new_w, new_h);

        let x0 = pad_x.floor() as usize;
        let y0 = pad_y.floor() as usize;

        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for y in 0..side {
            for x in 0..side {
                let pixel = if y >= y0 && y < y0 + new_h && x >= x0 && x < x0 + new_w {
                    resized[(y - y0) * new_w + (x - x0)] as f32
                } else {
                    SCRFD_MEAN
                };
                let value = (pixel - SCRFD_MEAN) / SCRFD_STD;
                // Grayscale replicated into all three input channels.
                tensor[[0, 0, y, x]] = value;
                tensor[[0, 1, y, x]] = value;
                tensor[[0, 2, y, x]] = value;
            }
        }

        (tensor, Letterbox { scale, pad_x, pad_y })
    }
}

/// Bilinear grayscale resize.
fn bilinear_resize(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let scale_x = src_w as f32 / dst_w as f32;
    let scale_y = src_h as f32 / dst_h as f32;
    let mut dst = vec![0u8; dst_w * dst_h];

    for y in 0..dst_h {
        let sy = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (sy.floor() as i32).clamp(0, src_h as i32 - 1) as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let fy = (sy - sy.floor()).clamp(0.0, 1.0);

        for x in 0..dst_w {
            let sx = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (sx.floor() as i32).clamp(0, src_w as i32 - 1) as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let fx = (sx - sx.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * src_w + x0] as f32;
            let tr = src[y0 * src_w + x1] as f32;
            let bl = src[y1 * src_w + x0] as f32;
            let br = src[y1 * src_w + x1] as f32;

            let top = tl * (1.0 - fx) + tr * fx;
            let bot = bl * (1.0 - fx) + br * fx;
            let value = top * (1.0 - fy) + bot * fy;

            dst[y * dst_w + x] = value.round().clamp(0.0, 255.0) as u8;
        }
    }

    dst
}

/// Decode detections for one stride level into `out`.
///
/// SCRFD regresses box edges and landmarks as offsets from the anchor
/// center, in units of the stride.
#[allow(clippy::too_many_arguments)]
fn decode_level(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &Letterbox,
    threshold: f32,
    out: &mut Vec<BoundingBox>,
) {
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (cell % grid) as f32 * stride as f32;
        let anchor_cy = (cell / grid) as f32 * stride as f32;

        let b = idx * 4;
        if b + 3 >= boxes.len() {
            continue;
        }
        let x1 = anchor_cx - boxes[b] * stride as f32;
        let y1 = anchor_cy - boxes[b + 1] * stride as f32;
        let x2 = anchor_cx + boxes[b + 2] * stride as f32;
        let y2 = anchor_cy + boxes[b + 3] * stride as f32;

        let unmap = |x: f32, y: f32| {
            (
                (x - letterbox.pad_x) / letterbox.scale,
                (y - letterbox.pad_y) / letterbox.scale,
            )
        };

        let (ox1, oy1) = unmap(x1, y1);
        let (ox2, oy2) = unmap(x2, y2);

        let k = idx * 10;
        let landmarks = if k + 9 < kps.len() {
            let mut points = [(0.0f32, 0.0f32); 5];
            for (i, point) in points.iter_mut().enumerate() {
                let lx = anchor_cx + kps[k + i * 2] * stride as f32;
                let ly = anchor_cy + kps[k + i * 2 + 1] * stride as f32;
                *point = unmap(lx, ly);
            }
            Some(points)
        } else {
            None
        };

        out.push(BoundingBox {
            x: ox1,
            y: oy1,
            width: ox2 - ox1,
            height: oy2 - oy1,
            confidence: score,
            landmarks,
        });
    }
}

/// Non-maximum suppression: drop detections overlapping a higher-confidence one.
fn suppress(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| overlap(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Intersection-over-union of two boxes.
fn overlap(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
