//! vigil-core — Face detection and identity matching engine.
//!
//! Uses SCRFD for face detection and ArcFace for face signatures, both
//! running via ONNX Runtime for CPU inference. The identity registry maps
//! a directory of reference photos to signatures at startup and answers
//! "who is this?" for each detected face.

pub mod detector;
pub mod encoder;
pub mod registry;
pub mod types;

pub use detector::FaceDetector;
pub use encoder::SignatureEncoder;
pub use registry::{IdentityRegistry, KnownIdentity};
pub use types::{BoundingBox, Signature};
