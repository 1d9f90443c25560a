//! Orchestration pipeline.
//!
//! One worker thread per camera: read a frame, detect faces, resolve each
//! face against the registry, interrogate strangers, alert on UNKNOWN
//! decisions, annotate and present the frame, repeat until stopped. Every
//! external resource is acquired fail-fast before the thread starts.

use crate::config::Config;
use crate::facts::HouseholdFacts;
use crate::gate::{AnswerSource, PromptGate};
use crate::generate::{ChatClient, TextGenerator};
use crate::interview::{Classification, DecisionResult, Interviewer};
use crate::notify::{Notifier, TwilioSms};
use crate::store::{SessionStore, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use vigil_core::{
    detector::DetectorError, encoder::EncoderError, registry::RegistryError, BoundingBox,
    FaceDetector, IdentityRegistry, Signature, SignatureEncoder,
};
use vigil_hw::annotate::{Annotation, FrameSink, Region, SnapshotSink};
use vigil_hw::camera::CameraError;
use vigil_hw::{frame, Camera};

/// Label used for every face that is not a registered identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("session log error: {0}")]
    Store(#[from] StoreError),
    #[error("snapshot sink error: {0}")]
    Sink(#[from] vigil_hw::annotate::SinkError),
    #[error("generation client error: {0}")]
    Generation(#[from] crate::generate::GenerationError),
    #[error("notifier error: {0}")]
    Dispatch(#[from] crate::notify::DispatchError),
}

/// Handle to a running pipeline thread.
pub struct PipelineHandle {
    stop: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl PipelineHandle {
    pub(crate) fn new(stop: Arc<AtomicBool>, join: std::thread::JoinHandle<()>) -> Self {
        Self {
            stop,
            join: Some(join),
        }
    }

    /// Signal the loop to stop and wait for it to release the camera.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Acquire all resources fail-fast, then start the monitoring loop on a
/// dedicated thread. Called once per process lifetime (from the init
/// trigger) on a blocking-capable thread.
pub fn spawn_pipeline(
    config: &Config,
    gate: Arc<PromptGate>,
) -> Result<PipelineHandle, PipelineError> {
    let camera = Camera::open(&config.camera.device)?;
    tracing::info!(
        device = %config.camera.device,
        width = camera.width,
        height = camera.height,
        "camera ready"
    );

    let mut detector =
        FaceDetector::load(&config.scrfd_model_path(), config.models.detect_confidence)?;
    let mut encoder = SignatureEncoder::load(&config.arcface_model_path())?;

    let registry = IdentityRegistry::load(
        &config.registry.photos_dir,
        &mut detector,
        &mut encoder,
        config.registry.match_threshold,
    )?;
    tracing::info!(identities = registry.len(), "identity registry built");

    let store = SessionStore::open(&config.store.db_path)?;
    let facts = HouseholdFacts::load(&config.facts.path);
    let sink = SnapshotSink::new(&config.snapshots.dir, config.snapshots.keep)?;

    let generator = ChatClient::new(
        &config.generation.base_url,
        &config.generation.api_key,
        &config.generation.model,
        Duration::from_secs(config.generation.timeout_secs),
    )?;
    let notifier = TwilioSms::new(
        &config.alert.base_url,
        &config.alert.account_sid,
        &config.alert.auth_token,
        &config.alert.from_number,
        &config.alert.to_number,
        Duration::from_secs(config.alert.timeout_secs),
    )?;
    if config.alert.account_sid.is_empty() {
        tracing::warn!("alert credentials not configured; dispatches will fail and be logged");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let loop_stop = Arc::clone(&stop);
    let warmup = config.camera.warmup_frames;
    let enhance = config.camera.enhance_contrast;
    let question_count = config.interview.question_count;
    let answer_timeout = Duration::from_secs(config.interview.answer_timeout_secs);

    let join = std::thread::Builder::new()
        .name("vigil-pipeline".into())
        .spawn(move || {
            run_loop(LoopContext {
                camera,
                detector,
                encoder,
                registry,
                store,
                facts,
                gate,
                generator,
                notifier,
                sink,
                stop: loop_stop,
                warmup,
                enhance,
                question_count,
                answer_timeout,
            });
        })
        .expect("failed to spawn pipeline thread");

    Ok(PipelineHandle::new(stop, join))
}

struct LoopContext {
    camera: Camera,
    detector: FaceDetector,
    encoder: SignatureEncoder,
    registry: IdentityRegistry,
    store: SessionStore,
    facts: HouseholdFacts,
    gate: Arc<PromptGate>,
    generator: ChatClient,
    notifier: TwilioSms,
    sink: SnapshotSink,
    stop: Arc<AtomicBool>,
    warmup: usize,
    enhance: bool,
    question_count: usize,
    answer_timeout: Duration,
}

fn run_loop(mut ctx: LoopContext) {
    tracing::info!("pipeline thread started");

    let mut stream = match ctx.camera.stream() {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "cannot start capture stream; pipeline exiting");
            return;
        }
    };

    // Let the camera's AGC/AE settle before trusting frames.
    for _ in 0..ctx.warmup {
        let _ = stream.read_frame();
    }

    loop {
        if ctx.stop.load(Ordering::Relaxed) {
            tracing::info!("stop requested; releasing camera");
            break;
        }

        let mut current = match stream.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                // Source failure ends the loop; everything else is contained.
                tracing::error!(error = %e, "frame source failed; pipeline exiting");
                break;
            }
        };

        if current.is_dark {
            continue;
        }
        if ctx.enhance {
            frame::clahe_enhance(&mut current.data, current.width, current.height, 8, 0.02);
        }

        let faces = match ctx.detector.detect(&current.data, current.width, current.height) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "detection failed for this frame");
                continue;
            }
        };

        let mut annotations = Vec::with_capacity(faces.len());
        for face in &faces {
            let probe = match ctx
                .encoder
                .extract(&current.data, current.width, current.height, face)
            {
                Ok(signature) => Some(signature),
                Err(e) => {
                    tracing::warn!(error = %e, "signature extraction failed; treating as non-match");
                    None
                }
            };

            let label = resolve_face(
                probe.as_ref(),
                &ctx.registry,
                &ctx.generator,
                ctx.gate.as_ref(),
                &ctx.store,
                &ctx.facts,
                &ctx.notifier,
                ctx.question_count,
                ctx.answer_timeout,
            );

            annotations.push(Annotation {
                region: face_region(face),
                label,
            });
        }

        if let Err(e) = ctx.sink.present(&current, &annotations) {
            tracing::warn!(error = %e, "snapshot sink failed");
        }
    }

    drop(stream);
    tracing::info!("pipeline thread exiting");
}

/// Resolve one detected face to a display label.
///
/// A registry match resolves immediately. Anything else runs the
/// interrogation; an UNKNOWN decision additionally fires the alert, and
/// every failure past this point is contained to this face.
#[allow(clippy::too_many_arguments)]
pub fn resolve_face(
    probe: Option<&Signature>,
    registry: &IdentityRegistry,
    generator: &dyn TextGenerator,
    answers: &dyn AnswerSource,
    store: &SessionStore,
    facts: &HouseholdFacts,
    notifier: &dyn Notifier,
    question_count: usize,
    answer_timeout: Duration,
) -> String {
    if let Some(signature) = probe {
        if let Some(name) = registry.match_signature(signature) {
            return name.to_string();
        }
    }

    tracing::info!("unrecognized visitor; starting verification");
    let mut interviewer = Interviewer::new(
        generator,
        answers,
        store,
        facts,
        question_count,
        answer_timeout,
    );

    match interviewer.interrogate() {
        Ok(decision) => {
            if decision.classification == Classification::Unknown {
                dispatch_alert(notifier, &decision);
            } else {
                tracing::info!(
                    confidence = decision.confidence,
                    "visitor verified as known by interrogation"
                );
            }
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                state = ?interviewer.state(),
                "interrogation aborted; visitor unresolved for this frame"
            );
        }
    }

    UNKNOWN_LABEL.to_string()
}

/// Send the alert; delivery failure is logged and contained.
fn dispatch_alert(notifier: &dyn Notifier, decision: &DecisionResult) {
    let body = format!(
        "Alert: unknown person detected.\n\n{} (confidence {}%)",
        decision.summary, decision.confidence
    );
    match notifier.send(&body) {
        Ok(sid) => tracing::info!(sid = %sid, "alert dispatched"),
        Err(e) => tracing::warn!(error = %e, "alert dispatch failed"),
    }
}

fn face_region(face: &BoundingBox) -> Region {
    Region {
        x: face.x.round() as i32,
        y: face.y.round() as i32,
        width: face.width.max(0.0).round() as u32,
        height: face.height.max(0.0).round() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::AnswerError;
    use crate::generate::testing::ScriptedGenerator;
    use crate::notify::testing::RecordingNotifier;
    use std::sync::Mutex;

    struct CannedAnswers {
        answers: Mutex<Vec<String>>,
    }

    impl CannedAnswers {
        fn new(answers: &[&str]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().map(|s| s.to_string()).collect()),
            }
        }
    }

    impl AnswerSource for CannedAnswers {
        fn ask(&self, _question: &str, _timeout: Duration) -> Result<String, AnswerError> {
            let mut answers = self.answers.lock().expect("canned answers poisoned");
            if answers.is_empty() {
                Err(AnswerError::TimedOut)
            } else {
                Ok(answers.remove(0))
            }
        }
    }

    fn signature(values: Vec<f32>) -> Signature {
        Signature {
            values,
            model: None,
        }
    }

    const THREE_QUESTIONS: &str = "\
- What color is the front door?
- Do we have pets? If yes, name one.
- Where do we usually keep the keys?";

    #[test]
    fn test_unknown_visitor_end_to_end() {
        // Empty registry, one face, canned questions and answers, decision
        // UNKNOWN 80 → three records, one alert containing the summary,
        // label "Unknown".
        let registry = IdentityRegistry::from_entries(vec![], 0.4);
        let generator = ScriptedGenerator::new(vec![
            Ok(THREE_QUESTIONS.to_string()),
            Ok("Summary: Answers are wrong.\nDecision: UNKNOWN\nConfidence: 80".to_string()),
        ]);
        let answers = CannedAnswers::new(&["Blue", "No pets", "Under the mat"]);
        let store = SessionStore::open_in_memory().unwrap();
        let facts = HouseholdFacts::empty();
        let notifier = RecordingNotifier::new();
        let probe = signature(vec![1.0, 0.0]);

        let label = resolve_face(
            Some(&probe),
            &registry,
            &generator,
            &answers,
            &store,
            &facts,
            &notifier,
            3,
            Duration::from_secs(1),
        );

        assert_eq!(label, UNKNOWN_LABEL);
        assert_eq!(store.count().unwrap(), 3);

        let sent = notifier.sent_bodies();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Answers are wrong."));
    }

    #[test]
    fn test_registered_identity_skips_interrogation() {
        let registry = IdentityRegistry::from_entries(
            vec![vigil_core::KnownIdentity {
                name: "alice".to_string(),
                photo_path: "alice.jpg".into(),
                signature: signature(vec![1.0, 0.0]),
            }],
            0.4,
        );
        // Generator would fail if ever called.
        let generator = ScriptedGenerator::new(vec![]);
        let answers = CannedAnswers::new(&[]);
        let store = SessionStore::open_in_memory().unwrap();
        let facts = HouseholdFacts::empty();
        let notifier = RecordingNotifier::new();
        let probe = signature(vec![1.0, 0.0]);

        let label = resolve_face(
            Some(&probe),
            &registry,
            &generator,
            &answers,
            &store,
            &facts,
            &notifier,
            3,
            Duration::from_secs(1),
        );

        assert_eq!(label, "alice");
        assert_eq!(store.count().unwrap(), 0);
        assert!(notifier.sent_bodies().is_empty());
    }

    #[test]
    fn test_known_decision_sends_no_alert() {
        let registry = IdentityRegistry::from_entries(vec![], 0.4);
        let generator = ScriptedGenerator::new(vec![
            Ok(THREE_QUESTIONS.to_string()),
            Ok("Summary: All answers match.\nDecision: KNOWN\nConfidence: 95".to_string()),
        ]);
        let answers = CannedAnswers::new(&["Red", "A cat", "By the door"]);
        let store = SessionStore::open_in_memory().unwrap();
        let facts = HouseholdFacts::empty();
        let notifier = RecordingNotifier::new();
        let probe = signature(vec![1.0, 0.0]);

        let label = resolve_face(
            Some(&probe),
            &registry,
            &generator,
            &answers,
            &store,
            &facts,
            &notifier,
            3,
            Duration::from_secs(1),
        );

        // Still labelled Unknown on screen (not a registered identity),
        // but no alert fires.
        assert_eq!(label, UNKNOWN_LABEL);
        assert!(notifier.sent_bodies().is_empty());
    }

    #[test]
    fn test_decision_failure_sends_no_alert() {
        let registry = IdentityRegistry::from_entries(vec![], 0.4);
        let generator = ScriptedGenerator::new(vec![
            Ok(THREE_QUESTIONS.to_string()),
            Err("generation outage".to_string()),
        ]);
        let answers = CannedAnswers::new(&["a", "b", "c"]);
        let store = SessionStore::open_in_memory().unwrap();
        let facts = HouseholdFacts::empty();
        let notifier = RecordingNotifier::new();
        let probe = signature(vec![1.0, 0.0]);

        let label = resolve_face(
            Some(&probe),
            &registry,
            &generator,
            &answers,
            &store,
            &facts,
            &notifier,
            3,
            Duration::from_secs(1),
        );

        assert_eq!(label, UNKNOWN_LABEL);
        assert!(notifier.sent_bodies().is_empty());
    }

    #[test]
    fn test_extraction_failure_still_interrogates() {
        // probe = None models a failed signature extraction: treated as a
        // non-match, so the interrogation still runs.
        let registry = IdentityRegistry::from_entries(vec![], 0.4);
        let generator = ScriptedGenerator::new(vec![
            Ok("- Single question?".to_string()),
            Ok("Summary: S.\nDecision: UNKNOWN\nConfidence: 10".to_string()),
        ]);
        let answers = CannedAnswers::new(&["an answer"]);
        let store = SessionStore::open_in_memory().unwrap();
        let facts = HouseholdFacts::empty();
        let notifier = RecordingNotifier::new();

        let label = resolve_face(
            None,
            &registry,
            &generator,
            &answers,
            &store,
            &facts,
            &notifier,
            1,
            Duration::from_secs(1),
        );

        assert_eq!(label, UNKNOWN_LABEL);
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(notifier.sent_bodies().len(), 1);
    }

    #[test]
    fn test_alert_failure_is_contained() {
        let registry = IdentityRegistry::from_entries(vec![], 0.4);
        let generator = ScriptedGenerator::new(vec![
            Ok("- Q?".to_string()),
            Ok("Decision: UNKNOWN\nConfidence: 50".to_string()),
        ]);
        let answers = CannedAnswers::new(&["A"]);
        let store = SessionStore::open_in_memory().unwrap();
        let facts = HouseholdFacts::empty();
        let notifier = RecordingNotifier::failing();
        let probe = signature(vec![1.0, 0.0]);

        // Must not panic or propagate despite the failed dispatch.
        let label = resolve_face(
            Some(&probe),
            &registry,
            &generator,
            &answers,
            &store,
            &facts,
            &notifier,
            1,
            Duration::from_secs(1),
        );
        assert_eq!(label, UNKNOWN_LABEL);
        assert_eq!(notifier.sent_bodies().len(), 1);
    }

    #[test]
    fn test_face_region_rounds_and_clamps() {
        let face = BoundingBox {
            x: 10.6,
            y: -3.4,
            width: 20.2,
            height: -1.0,
            confidence: 0.9,
            landmarks: None,
        };
        let region = face_region(&face);
        assert_eq!(region.x, 11);
        assert_eq!(region.y, -3);
        assert_eq!(region.width, 20);
        assert_eq!(region.height, 0);
    }
}
