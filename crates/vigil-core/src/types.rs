use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
///
/// Coordinates are in original-frame pixel space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face signature vector (512-dimensional for ArcFace), L2-normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub values: Vec<f32>,
    /// Model that produced this signature (e.g., "w600k_r50").
    pub model: Option<String>,
}

impl Signature {
    /// Cosine similarity between two signatures, in [-1, 1].
    ///
    /// Higher means more similar. Always processes all dimensions.
    pub fn similarity(&self, other: &Signature) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(values: Vec<f32>) -> Signature {
        Signature {
            values,
            model: None,
        }
    }

    #[test]
    fn test_similarity_identical() {
        let a = sig(vec![1.0, 0.0, 0.0]);
        let b = sig(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_orthogonal() {
        let a = sig(vec![1.0, 0.0]);
        let b = sig(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_opposite() {
        let a = sig(vec![1.0, 0.0]);
        let b = sig(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_zero_vector() {
        let a = sig(vec![0.0, 0.0]);
        let b = sig(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }
}
