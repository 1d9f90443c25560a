//! ArcFace signature encoder via ONNX Runtime.
//!
//! Warps a detected face to the canonical 112×112 InsightFace position
//! using its five landmarks, then extracts a 512-dimensional signature.

use crate::types::{BoundingBox, Signature};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric normalization, unlike SCRFD
const SIGNATURE_DIM: usize = 512;
const MODEL_VERSION: &str = "w600k_r50";

/// ArcFace reference landmarks for the 112×112 canonical crop.
const CANONICAL_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks — the detector must supply landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face signature encoder.
pub struct SignatureEncoder {
    session: Session,
}

impl SignatureEncoder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EncoderError> {
        if !Path::new(model_path).exists() {
            return Err(EncoderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded ArcFace model");

        Ok(Self { session })
    }

    /// Extract a signature for a detected face in a grayscale frame.
    ///
    /// The face is aligned in memory from the full frame; no intermediate
    /// crop artifact is written anywhere.
    pub fn extract(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Signature, EncoderError> {
        let landmarks = face.landmarks.as_ref().ok_or(EncoderError::NoLandmarks)?;

        let aligned = align_face(frame, width as usize, height as usize, landmarks);
        let input = preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("signature extraction: {e}")))?;

        if raw.len() != SIGNATURE_DIM {
            return Err(EncoderError::InferenceFailed(format!(
                "expected {SIGNATURE_DIM}-dim signature, got {}",
                raw.len()
            )));
        }

        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw.to_vec()
        };

        Ok(Signature {
            values,
            model: Some(MODEL_VERSION.to_string()),
        })
    }
}

/// Preprocess a 112×112 aligned grayscale crop into a NCHW float tensor.
fn preprocess(aligned: &[u8]) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        for x in 0..size {
            let pixel = aligned.get(y * size + x).copied().unwrap_or(0) as f32;
            let value = (pixel - ARCFACE_MEAN) / ARCFACE_STD;
            tensor[[0, 0, y, x]] = value;
            tensor[[0, 1, y, x]] = value;
            tensor[[0, 2, y, x]] = value;
        }
    }

    tensor
}

/// Warp a face to the canonical 112×112 position.
///
/// Estimates a 4-DOF similarity transform (scale, rotation, translation)
/// from the detected landmarks to the reference landmarks by least squares,
/// then inverse-maps every output pixel with bilinear sampling.
fn align_face(frame: &[u8], width: usize, height: usize, landmarks: &[(f32, f32); 5]) -> Vec<u8> {
    let size = ARCFACE_INPUT_SIZE;
    let [a, b, tx, ty] = estimate_similarity(landmarks, &CANONICAL_LANDMARKS);

    // Inverse of [a -b tx; b a ty]: rotate back by the transposed rotation,
    // divided by the squared scale.
    let s2 = a * a + b * b;
    let mut out = vec![0u8; size * size];
    if s2 <= f32::EPSILON {
        return out;
    }

    for dy in 0..size {
        for dx in 0..size {
            let rx = dx as f32 - tx;
            let ry = dy as f32 - ty;
            let sx = (a * rx + b * ry) / s2;
            let sy = (-b * rx + a * ry) / s2;
            out[dy * size + dx] = sample_bilinear(frame, width, height, sx, sy);
        }
    }

    out
}

/// Bilinear sample with zero padding outside the frame.
fn sample_bilinear(frame: &[u8], width: usize, height: usize, x: f32, y: f32) -> u8 {
    if x < -1.0 || y < -1.0 || x >= width as f32 || y >= height as f32 {
        return 0;
    }

    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let at = |px: i64, py: i64| -> f32 {
        if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
            0.0
        } else {
            frame[py as usize * width + px as usize] as f32
        }
    };

    let top = at(x0, y0) * (1.0 - fx) + at(x0 + 1, y0) * fx;
    let bot = at(x0, y0 + 1) * (1.0 - fx) + at(x0 + 1, y0 + 1) * fx;
    (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8
}

/// Least-squares 4-DOF similarity transform from `src` to `dst` landmarks.
///
/// Solves for [a, b, tx, ty] in:
///   sx*a - sy*b + tx = dx
///   sy*a + sx*b + ty = dy
/// Returns [a, b, tx, ty].
fn estimate_similarity(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 4] {
    let mut ata = [0.0f32; 16];
    let mut atb = [0.0f32; 4];

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];

        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    solve_4x4(&ata, &atb)
}

/// Gaussian elimination with partial pivoting on a 4×4 system.
fn solve_4x4(a: &[f32; 16], b: &[f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for r in 0..4 {
        for c in 0..4 {
            m[r][c] = a[r * 4 + c];
        }
        m[r][4] = b[r];
    }

    for col in 0..4 {
        let pivot = (col..4)
            .max_by(|&i, &j| {
                m[i][col]
                    .abs()
                    .partial_cmp(&m[j][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        m.swap(col, pivot);

        let diag = m[col][col];
        if diag.abs() <= f32::EPSILON {
            return [0.0; 4];
        }

        for row in 0..4 {
            if row == col {
                continue;
            }
            let factor = m[row][col] / diag;
            for c in col..5 {
                m[row][c] -= factor * m[col][c];
            }
        }
    }

    [
        m[0][4] / m[0][0],
        m[1][4] / m[1][1],
        m[2][4] / m[2][2],
        m[3][4] / m[3][3],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_similarity_identity() {
        let pts = CANONICAL_LANDMARKS;
        let [a, b, tx, ty] = estimate_similarity(&pts, &pts);
        assert!((a - 1.0).abs() < 1e-3, "a = {a}");
        assert!(b.abs() < 1e-3, "b = {b}");
        assert!(tx.abs() < 1e-2, "tx = {tx}");
        assert!(ty.abs() < 1e-2, "ty = {ty}");
    }

    #[test]
    fn test_estimate_similarity_translation() {
        let mut src = CANONICAL_LANDMARKS;
        for p in src.iter_mut() {
            p.0 -= 10.0;
            p.1 -= 20.0;
        }
        let [a, b, tx, ty] = estimate_similarity(&src, &CANONICAL_LANDMARKS);
        assert!((a - 1.0).abs() < 1e-3);
        assert!(b.abs() < 1e-3);
        assert!((tx - 10.0).abs() < 1e-2);
        assert!((ty - 20.0).abs() < 1e-2);
    }

    #[test]
    fn test_estimate_similarity_scale() {
        let mut src = CANONICAL_LANDMARKS;
        for p in src.iter_mut() {
            p.0 *= 0.5;
            p.1 *= 0.5;
        }
        let [a, b, _, _] = estimate_similarity(&src, &CANONICAL_LANDMARKS);
        assert!((a - 2.0).abs() < 1e-3, "a = {a}");
        assert!(b.abs() < 1e-3);
    }

    #[test]
    fn test_align_face_uniform_frame() {
        // Uniform frame stays uniform wherever the warp samples inside it.
        let (w, h) = (200usize, 200usize);
        let frame = vec![77u8; w * h];
        // Landmarks roughly centered so the whole crop samples in-bounds.
        let mut landmarks = CANONICAL_LANDMARKS;
        for p in landmarks.iter_mut() {
            p.0 += 44.0;
            p.1 += 44.0;
        }
        let aligned = align_face(&frame, w, h, &landmarks);
        assert_eq!(aligned.len(), ARCFACE_INPUT_SIZE * ARCFACE_INPUT_SIZE);
        assert!(aligned.iter().all(|&p| p == 77));
    }

    #[test]
    fn test_sample_bilinear_outside_is_zero() {
        let frame = vec![255u8; 4];
        assert_eq!(sample_bilinear(&frame, 2, 2, -5.0, 0.0), 0);
        assert_eq!(sample_bilinear(&frame, 2, 2, 0.0, 10.0), 0);
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let aligned = vec![128u8; ARCFACE_INPUT_SIZE * ARCFACE_INPUT_SIZE];
        let tensor = preprocess(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE]);

        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        let value = tensor[[0, 0, 0, 0]];
        assert!((value - expected).abs() < 1e-6);
        // Channels replicate the grayscale plane.
        assert_eq!(tensor[[0, 0, 5, 5]], tensor[[0, 1, 5, 5]]);
        assert_eq!(tensor[[0, 1, 5, 5]], tensor[[0, 2, 5, 5]]);
    }
}
