//! Frame annotation and the annotated-view output sink.
//!
//! The monitoring loop labels every detected face and presents the result
//! to a [`FrameSink`]. The default sink renders the boxes into the frame
//! and writes PNG snapshots to a directory, keeping only the most recent
//! files; labels go into the filename and the log.

use crate::frame::Frame;
use std::path::{Path, PathBuf};
use thiserror::Error;

const BOX_THICKNESS: u32 = 2;
const BOX_SHADE: u8 = 255;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("snapshot encode failed: {0}")]
    EncodeFailed(String),
    #[error("snapshot dir unavailable: {0}")]
    DirUnavailable(std::io::Error),
}

/// A face region in frame pixel coordinates, clipped on draw.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// One labelled face on a frame.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub region: Region,
    pub label: String,
}

/// Output sink for annotated frames.
pub trait FrameSink: Send {
    fn present(&mut self, frame: &Frame, annotations: &[Annotation]) -> Result<(), SinkError>;
}

/// Draw a rectangle outline onto a grayscale buffer, clipped to the frame.
pub fn draw_region(gray: &mut [u8], width: u32, height: u32, region: &Region) {
    let w = width as i64;
    let h = height as i64;
    let x0 = region.x as i64;
    let y0 = region.y as i64;
    let x1 = x0 + region.width as i64;
    let y1 = y0 + region.height as i64;
    let t = BOX_THICKNESS as i64;

    let mut put = |x: i64, y: i64| {
        if x >= 0 && y >= 0 && x < w && y < h {
            gray[(y * w + x) as usize] = BOX_SHADE;
        }
    };

    for i in 0..t {
        for x in x0..=x1 {
            put(x, y0 + i);
            put(x, y1 - i);
        }
        for y in y0..=y1 {
            put(x0 + i, y);
            put(x1 - i, y);
        }
    }
}

/// Writes annotated PNG snapshots into a directory, pruning old files.
pub struct SnapshotSink {
    dir: PathBuf,
    keep: usize,
    written: Vec<PathBuf>,
}

impl SnapshotSink {
    /// Create the sink, creating the directory if needed.
    pub fn new(dir: &Path, keep: usize) -> Result<Self, SinkError> {
        std::fs::create_dir_all(dir).map_err(SinkError::DirUnavailable)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            keep: keep.max(1),
            written: Vec::new(),
        })
    }

    fn snapshot_path(&self, frame: &Frame, annotations: &[Annotation]) -> PathBuf {
        let labels = if annotations.is_empty() {
            "clear".to_string()
        } else {
            annotations
                .iter()
                .map(|a| sanitize_label(&a.label))
                .collect::<Vec<_>>()
                .join("+")
        };
        self.dir.join(format!("frame-{:08}-{labels}.png", frame.sequence))
    }

    fn prune(&mut self) {
        while self.written.len() > self.keep {
            let oldest = self.written.remove(0);
            if let Err(e) = std::fs::remove_file(&oldest) {
                tracing::debug!(path = %oldest.display(), error = %e, "snapshot prune failed");
            }
        }
    }
}

impl FrameSink for SnapshotSink {
    fn present(&mut self, frame: &Frame, annotations: &[Annotation]) -> Result<(), SinkError> {
        let mut pixels = frame.data.clone();
        for annotation in annotations {
            draw_region(&mut pixels, frame.width, frame.height, &annotation.region);
            tracing::info!(
                label = %annotation.label,
                x = annotation.region.x,
                y = annotation.region.y,
                "annotated face"
            );
        }

        let img = image::GrayImage::from_raw(frame.width, frame.height, pixels)
            .ok_or_else(|| SinkError::EncodeFailed("buffer size mismatch".to_string()))?;

        let path = self.snapshot_path(frame, annotations);
        img.save(&path)
            .map_err(|e| SinkError::EncodeFailed(e.to_string()))?;

        self.written.push(path);
        self.prune();
        Ok(())
    }
}

/// Sink that drops every frame; used when snapshots are disabled and in tests.
#[derive(Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&mut self, _frame: &Frame, _annotations: &[Annotation]) -> Result<(), SinkError> {
        Ok(())
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "face".to_string()
    } else {
        cleaned
    }
}
