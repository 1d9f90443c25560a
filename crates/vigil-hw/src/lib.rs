//! vigil-hw — Hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access, grayscale frame processing and the
//! annotated-frame output sink.

pub mod annotate;
pub mod camera;
pub mod frame;

pub use annotate::{Annotation, FrameSink, Region, SnapshotSink};
pub use camera::{Camera, CameraError, CaptureStream, PixelFormat};
pub use frame::Frame;
