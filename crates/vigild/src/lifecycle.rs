//! Process lifecycle state.
//!
//! The init trigger must start the pipeline exactly once per process, no
//! matter how many times it is hit. The state object is transitioned under
//! a single mutex; there is no free-floating initialization flag.

use crate::engine::{PipelineError, PipelineHandle};
use std::sync::Mutex;

/// Current pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Stopped,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Running => "running",
            Phase::Stopped => "stopped",
        }
    }
}

/// Outcome of a start request.
#[derive(Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

enum Inner {
    Idle,
    Running(PipelineHandle),
    Stopped,
}

/// Single-writer lifecycle guard around the pipeline handle.
pub struct Lifecycle {
    inner: Mutex<Inner>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::Idle),
        }
    }

    /// Transition Idle → Running by invoking `start`. The closure runs
    /// under the lock, so two racing triggers cannot both start a
    /// pipeline. A failed start leaves the lifecycle Idle so a later
    /// trigger may retry.
    pub fn start_with<F>(&self, start: F) -> Result<StartOutcome, PipelineError>
    where
        F: FnOnce() -> Result<PipelineHandle, PipelineError>,
    {
        let mut inner = self.inner.lock().expect("lifecycle mutex poisoned");
        match &*inner {
            Inner::Running(_) => Ok(StartOutcome::AlreadyRunning),
            Inner::Stopped => Ok(StartOutcome::AlreadyRunning),
            Inner::Idle => {
                let handle = start()?;
                *inner = Inner::Running(handle);
                Ok(StartOutcome::Started)
            }
        }
    }

    pub fn phase(&self) -> Phase {
        match &*self.inner.lock().expect("lifecycle mutex poisoned") {
            Inner::Idle => Phase::Idle,
            Inner::Running(_) => Phase::Running,
            Inner::Stopped => Phase::Stopped,
        }
    }

    /// Stop the pipeline if it is running. Terminal: a stopped lifecycle
    /// never restarts.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("lifecycle mutex poisoned");
        if let Inner::Running(handle) = std::mem::replace(&mut *inner, Inner::Stopped) {
            drop(inner);
            handle.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// A stand-in pipeline: a thread that idles until its stop flag flips.
    fn fake_pipeline() -> PipelineHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let join = std::thread::spawn(move || {
            while !thread_stop.load(Ordering::Relaxed) {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
        });
        PipelineHandle::new(stop, join)
    }

    #[test]
    fn test_second_trigger_does_not_restart() {
        let lifecycle = Lifecycle::new();
        let starts = AtomicUsize::new(0);

        let first = lifecycle
            .start_with(|| {
                starts.fetch_add(1, Ordering::SeqCst);
                Ok(fake_pipeline())
            })
            .unwrap();
        let second = lifecycle
            .start_with(|| {
                starts.fetch_add(1, Ordering::SeqCst);
                Ok(fake_pipeline())
            })
            .unwrap();

        assert_eq!(first, StartOutcome::Started);
        assert_eq!(second, StartOutcome::AlreadyRunning);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.phase(), Phase::Running);

        lifecycle.shutdown();
        assert_eq!(lifecycle.phase(), Phase::Stopped);
    }

    #[test]
    fn test_failed_start_leaves_idle_for_retry() {
        let lifecycle = Lifecycle::new();

        let result = lifecycle.start_with(|| {
            Err(PipelineError::Camera(
                vigil_hw::CameraError::DeviceNotFound("/dev/video9".to_string()),
            ))
        });
        assert!(result.is_err());
        assert_eq!(lifecycle.phase(), Phase::Idle);

        let retry = lifecycle.start_with(|| Ok(fake_pipeline())).unwrap();
        assert_eq!(retry, StartOutcome::Started);
        lifecycle.shutdown();
    }

    #[test]
    fn test_shutdown_without_start_is_harmless() {
        let lifecycle = Lifecycle::new();
        lifecycle.shutdown();
        assert_eq!(lifecycle.phase(), Phase::Stopped);
    }
}
