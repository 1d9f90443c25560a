//! Pending-question gate.
//!
//! Rendezvous point between the pipeline thread (which blocks waiting for
//! an answer) and the HTTP answer endpoint (which supplies one). At most
//! one question is pending at a time; the wait is bounded so a silent
//! visitor cannot stall the pipeline forever.

use serde::Serialize;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AnswerError {
    #[error("timed out waiting for an answer")]
    TimedOut,
}

/// A question currently waiting for an answer.
#[derive(Debug, Clone, Serialize)]
pub struct PendingQuestion {
    pub id: Uuid,
    pub question: String,
}

/// Source of answers to verification questions.
pub trait AnswerSource: Send + Sync {
    /// Block until an answer to `question` arrives, or the timeout passes.
    fn ask(&self, question: &str, timeout: Duration) -> Result<String, AnswerError>;
}

#[derive(Default)]
struct GateState {
    pending: Option<PendingQuestion>,
    answer: Option<(Uuid, String)>,
}

/// Shared pending-question slot with blocking hand-off.
#[derive(Default)]
pub struct PromptGate {
    state: Mutex<GateState>,
    answered: Condvar,
}

impl PromptGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// The question currently awaiting an answer, if any.
    pub fn pending(&self) -> Option<PendingQuestion> {
        self.state
            .lock()
            .expect("gate mutex poisoned")
            .pending
            .clone()
    }

    /// Submit an answer for the pending question. Returns false when the
    /// id does not match (stale or no pending question).
    pub fn submit(&self, id: Uuid, answer: String) -> bool {
        let mut state = self.state.lock().expect("gate mutex poisoned");
        match &state.pending {
            Some(pending) if pending.id == id => {
                state.answer = Some((id, answer));
                self.answered.notify_all();
                true
            }
            _ => false,
        }
    }
}

impl AnswerSource for PromptGate {
    fn ask(&self, question: &str, timeout: Duration) -> Result<String, AnswerError> {
        let id = Uuid::new_v4();
        let deadline = Instant::now() + timeout;

        let mut state = self.state.lock().expect("gate mutex poisoned");
        state.pending = Some(PendingQuestion {
            id,
            question: question.to_string(),
        });
        state.answer = None;

        loop {
            if let Some((answer_id, _)) = &state.answer {
                if *answer_id == id {
                    let (_, answer) = state.answer.take().expect("answer vanished under lock");
                    state.pending = None;
                    return Ok(answer);
                }
                // Answer for a previous ask; discard.
                state.answer = None;
            }

            let now = Instant::now();
            if now >= deadline {
                state.pending = None;
                state.answer = None;
                return Err(AnswerError::TimedOut);
            }

            let (guard, _) = self
                .answered
                .wait_timeout(state, deadline - now)
                .expect("gate mutex poisoned");
            state = guard;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ask_receives_submitted_answer() {
        let gate = Arc::new(PromptGate::new());

        let responder = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || {
                // Wait for the question to appear, then answer it.
                loop {
                    if let Some(pending) = gate.pending() {
                        assert_eq!(pending.question, "Do we have pets?");
                        assert!(gate.submit(pending.id, "Yes, a cat".to_string()));
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
            })
        };

        let answer = gate.ask("Do we have pets?", Duration::from_secs(5)).unwrap();
        assert_eq!(answer, "Yes, a cat");
        responder.join().unwrap();

        // Slot is clear afterwards.
        assert!(gate.pending().is_none());
    }

    #[test]
    fn test_ask_times_out_without_answer() {
        let gate = PromptGate::new();
        let result = gate.ask("Anyone there?", Duration::from_millis(50));
        assert_eq!(result, Err(AnswerError::TimedOut));
        assert!(gate.pending().is_none());
    }

    #[test]
    fn test_submit_with_stale_id_is_rejected() {
        let gate = PromptGate::new();
        assert!(!gate.submit(Uuid::new_v4(), "hello".to_string()));
    }

    #[test]
    fn test_submit_requires_matching_id() {
        let gate = Arc::new(PromptGate::new());

        let responder = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || loop {
                if let Some(pending) = gate.pending() {
                    // Wrong id first: rejected and the asker keeps waiting.
                    assert!(!gate.submit(Uuid::new_v4(), "spoofed".to_string()));
                    assert!(gate.submit(pending.id, "genuine".to_string()));
                    break;
                }
                std::thread::sleep(Duration::from_millis(5));
            })
        };

        let answer = gate.ask("q", Duration::from_secs(5)).unwrap();
        assert_eq!(answer, "genuine");
        responder.join().unwrap();
    }
}
