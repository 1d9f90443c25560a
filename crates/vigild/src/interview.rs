//! Verification interviewer.
//!
//! Runs the interrogation of an unrecognized visitor: request a handful of
//! household-familiarity questions from the text-generation service,
//! collect an answer to each, then ask the service to decide KNOWN or
//! UNKNOWN against the household fact base. Each answered question is
//! persisted the moment its answer arrives.

use crate::facts::HouseholdFacts;
use crate::gate::{AnswerError, AnswerSource};
use crate::generate::{GenerationError, TextGenerator};
use crate::store::{SessionStore, StoreError};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum InterviewError {
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
    #[error("question response contained no questions")]
    NoQuestions,
    #[error("session log write failed: {0}")]
    Store(#[from] StoreError),
}

/// Interrogation progress. `Failed` and `DecisionReceived` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterviewState {
    Idle,
    QuestionsRequested,
    AnswersCollected,
    DecisionRequested,
    DecisionReceived,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Known,
    Unknown,
}

/// Parsed outcome of the decision request.
#[derive(Debug, Clone)]
pub struct DecisionResult {
    pub summary: String,
    pub classification: Classification,
    /// 0–100.
    pub confidence: u8,
}

/// One interrogation of one unrecognized face.
pub struct Interviewer<'a> {
    generator: &'a dyn TextGenerator,
    answers: &'a dyn AnswerSource,
    store: &'a SessionStore,
    facts: &'a HouseholdFacts,
    question_count: usize,
    answer_timeout: Duration,
    state: InterviewState,
}

impl<'a> Interviewer<'a> {
    pub fn new(
        generator: &'a dyn TextGenerator,
        answers: &'a dyn AnswerSource,
        store: &'a SessionStore,
        facts: &'a HouseholdFacts,
        question_count: usize,
        answer_timeout: Duration,
    ) -> Self {
        Self {
            generator,
            answers,
            store,
            facts,
            question_count,
            answer_timeout,
            state: InterviewState::Idle,
        }
    }

    pub fn state(&self) -> InterviewState {
        self.state
    }

    /// Run the full interrogation.
    ///
    /// Any generation failure aborts with `Failed`; a visitor who lets the
    /// answer window lapse yields a synthetic UNKNOWN decision with zero
    /// confidence. Only answered questions reach the session log.
    pub fn interrogate(&mut self) -> Result<DecisionResult, InterviewError> {
        let interrogation = Uuid::new_v4();
        tracing::info!(id = %interrogation, "starting interrogation");

        self.state = InterviewState::QuestionsRequested;
        let response = match self.generator.generate(&question_prompt(self.question_count)) {
            Ok(text) => text,
            Err(e) => {
                self.state = InterviewState::Failed;
                return Err(e.into());
            }
        };

        let questions = parse_questions(&response);
        if questions.is_empty() {
            self.state = InterviewState::Failed;
            return Err(InterviewError::NoQuestions);
        }

        let mut transcript: Vec<(String, String)> = Vec::with_capacity(questions.len());
        for question in &questions {
            match self.answers.ask(question, self.answer_timeout) {
                Ok(answer) => {
                    self.store.append(&interrogation, question, &answer)?;
                    transcript.push((question.clone(), answer));
                }
                Err(AnswerError::TimedOut) => {
                    tracing::warn!(
                        id = %interrogation,
                        question = %question,
                        "no answer before timeout; treating visitor as unknown"
                    );
                    self.state = InterviewState::DecisionReceived;
                    return Ok(DecisionResult {
                        summary: "Visitor gave no answer to the verification questions."
                            .to_string(),
                        classification: Classification::Unknown,
                        confidence: 0,
                    });
                }
            }
        }
        self.state = InterviewState::AnswersCollected;

        self.state = InterviewState::DecisionRequested;
        let decision_text = match self
            .generator
            .generate(&decision_prompt(self.facts, &transcript))
        {
            Ok(text) => text,
            Err(e) => {
                self.state = InterviewState::Failed;
                return Err(e.into());
            }
        };

        let decision = parse_decision(&decision_text);
        self.state = InterviewState::DecisionReceived;
        tracing::info!(
            id = %interrogation,
            classification = ?decision.classification,
            confidence = decision.confidence,
            "interrogation decision received"
        );
        Ok(decision)
    }
}

/// Fixed-intent prompt for the question request.
fn question_prompt(count: usize) -> String {
    format!(
        "Generate {count} very simple and easy questions that can verify if someone \
         is familiar with a household. Avoid technical or detailed questions. Prefer \
         questions like:\n\
         - What color is the front door?\n\
         - Do we have pets? If yes, name one.\n\
         - Where do we usually keep the keys?\n\
         The questions should be suitable for someone who casually lives in or \
         visits the home. Reply with one question per line and nothing else."
    )
}

/// Prompt for the decision request: fact base plus full transcript.
fn decision_prompt(facts: &HouseholdFacts, transcript: &[(String, String)]) -> String {
    let conversation = transcript
        .iter()
        .map(|(q, a)| format!("{q}\nAnswer: {a}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "The following is the JSON household data:\n{}\n\n\
         The person has answered the following questions:\n{}\n\n\
         Based on the household data, determine if this person is familiar with \
         the household.\n\
         Respond in this format:\n\
         Summary: <brief summary of answers>\n\
         Decision: <KNOWN or UNKNOWN>\n\
         Confidence: <0-100>",
        facts.as_context(),
        conversation
    )
}

/// Split a generated response into discrete questions: one per line,
/// leading list markers stripped, blank lines discarded.
fn parse_questions(text: &str) -> Vec<String> {
    text.lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let unmarked = line.trim_start_matches(['-', '*', '•']).trim_start();
    // Numbered markers: "1." or "2)".
    let digits = unmarked.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &unmarked[digits..];
        if let Some(stripped) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return stripped.trim();
        }
    }
    unmarked
}

/// Parse the decision response defensively.
///
/// Free-form text in, structure out: the decision token is matched by
/// case-insensitive substring (UNKNOWN checked first, since KNOWN is a
/// substring of it). Anything unparseable defaults to UNKNOWN with zero
/// confidence — a garbled decision must not silently admit a visitor.
fn parse_decision(text: &str) -> DecisionResult {
    let upper = text.to_uppercase();

    let classification = if upper.contains("UNKNOWN") {
        Classification::Unknown
    } else if upper.contains("KNOWN") {
        Classification::Known
    } else {
        tracing::warn!("decision response has no KNOWN/UNKNOWN token; defaulting to UNKNOWN");
        Classification::Unknown
    };

    let summary = text
        .lines()
        .map(str::trim)
        .find_map(|line| {
            line.get(..8)
                .filter(|prefix| prefix.eq_ignore_ascii_case("summary:"))
                .map(|_| line[8..].trim().to_string())
        })
        .or_else(|| {
            text.lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_default();

    let confidence = text
        .lines()
        .find(|line| line.trim().to_lowercase().starts_with("confidence"))
        .and_then(|line| {
            let digits: String = line
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse::<u32>().ok()
        })
        .map(|n| n.min(100) as u8)
        .unwrap_or(0);

    DecisionResult {
        summary,
        classification,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::testing::ScriptedGenerator;
    use std::sync::Mutex;

    /// Answer source that replays canned answers, or times out when empty.
    struct CannedAnswers {
        answers: Mutex<Vec<String>>,
    }

    impl CannedAnswers {
        fn new(answers: &[&str]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().map(|s| s.to_string()).collect()),
            }
        }

        fn silent() -> Self {
            Self {
                answers: Mutex::new(Vec::new()),
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

    const THREE_QUESTIONS: &str = "\
- What color is the front door?
- Do we have pets? If yes, name one.
- Where do we usually keep the keys?";

    const UNKNOWN_DECISION: &str = "\
Summary: The answers contradict the household data.
Decision: UNKNOWN
Confidence: 80";

    fn facts() -> HouseholdFacts {
        HouseholdFacts::from_value(serde_json::json!({
            "front_door": "red",
            "pets": ["cat"],
        }))
    }

    #[test]
    fn test_full_interrogation_persists_all_answers() {
        let generator = ScriptedGenerator::new(vec![
            Ok(THREE_QUESTIONS.to_string()),
            Ok(UNKNOWN_DECISION.to_string()),
        ]);
        let answers = CannedAnswers::new(&["Blue", "A dog", "No idea"]);
        let store = SessionStore::open_in_memory().unwrap();
        let facts = facts();
        let start = chrono::Utc::now();

        let mut interviewer = Interviewer::new(
            &generator,
            &answers,
            &store,
            &facts,
            3,
            Duration::from_secs(1),
        );
        let decision = interviewer.interrogate().unwrap();

        assert_eq!(interviewer.state(), InterviewState::DecisionReceived);
        assert_eq!(decision.classification, Classification::Unknown);
        assert_eq!(decision.confidence, 80);
        assert_eq!(decision.summary, "The answers contradict the household data.");

        // Exactly three records, non-empty, timestamped at or after start,
        // all tagged with the same interrogation id.
        let records = store.recent(10).unwrap();
        assert_eq!(records.len(), 3);
        let interrogation = records[0].interrogation.clone();
        for record in &records {
            assert!(!record.question.is_empty());
            assert!(!record.answer.is_empty());
            assert_eq!(record.interrogation, interrogation);
            let ts = chrono::DateTime::parse_from_rfc3339(&record.timestamp).unwrap();
            assert!(ts >= start - chrono::Duration::seconds(1));
        }
    }

    #[test]
    fn test_question_request_failure_is_terminal() {
        let generator = ScriptedGenerator::new(vec![Err("service down".to_string())]);
        let answers = CannedAnswers::new(&[]);
        let store = SessionStore::open_in_memory().unwrap();
        let facts = facts();

        let mut interviewer = Interviewer::new(
            &generator,
            &answers,
            &store,
            &facts,
            3,
            Duration::from_secs(1),
        );
        assert!(matches!(
            interviewer.interrogate(),
            Err(InterviewError::Generation(_))
        ));
        assert_eq!(interviewer.state(), InterviewState::Failed);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_decision_request_failure_is_terminal_after_persisting_answers() {
        let generator = ScriptedGenerator::new(vec![
            Ok(THREE_QUESTIONS.to_string()),
            Err("service down".to_string()),
        ]);
        let answers = CannedAnswers::new(&["a", "b", "c"]);
        let store = SessionStore::open_in_memory().unwrap();
        let facts = facts();

        let mut interviewer = Interviewer::new(
            &generator,
            &answers,
            &store,
            &facts,
            3,
            Duration::from_secs(1),
        );
        assert!(matches!(
            interviewer.interrogate(),
            Err(InterviewError::Generation(_))
        ));
        assert_eq!(interviewer.state(), InterviewState::Failed);
        // The answered questions were already persisted.
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_silent_visitor_yields_unknown_with_zero_confidence() {
        let generator = ScriptedGenerator::new(vec![Ok(THREE_QUESTIONS.to_string())]);
        let answers = CannedAnswers::silent();
        let store = SessionStore::open_in_memory().unwrap();
        let facts = facts();

        let mut interviewer = Interviewer::new(
            &generator,
            &answers,
            &store,
            &facts,
            3,
            Duration::from_millis(10),
        );
        let decision = interviewer.interrogate().unwrap();

        assert_eq!(decision.classification, Classification::Unknown);
        assert_eq!(decision.confidence, 0);
        // No orphan records for unanswered questions.
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_empty_question_response_fails() {
        let generator = ScriptedGenerator::new(vec![Ok("\n\n  \n".to_string())]);
        let answers = CannedAnswers::new(&[]);
        let store = SessionStore::open_in_memory().unwrap();
        let facts = facts();

        let mut interviewer = Interviewer::new(
            &generator,
            &answers,
            &store,
            &facts,
            3,
            Duration::from_secs(1),
        );
        assert!(matches!(
            interviewer.interrogate(),
            Err(InterviewError::NoQuestions)
        ));
        assert_eq!(interviewer.state(), InterviewState::Failed);
    }

    #[test]
    fn test_parse_questions_strips_markers() {
        let parsed = parse_questions(
            "- What color is the front door?\n\
             * Do we have pets?\n\
             1. Where are the keys?\n\
             2) Who lives upstairs?\n\
             \n\
             Plain question with no marker?",
        );
        assert_eq!(
            parsed,
            vec![
                "What color is the front door?",
                "Do we have pets?",
                "Where are the keys?",
                "Who lives upstairs?",
                "Plain question with no marker?",
            ]
        );
    }

    #[test]
    fn test_parse_decision_known() {
        let decision = parse_decision(
            "Summary: Answers all match.\nDecision: KNOWN\nConfidence: 95",
        );
        assert_eq!(decision.classification, Classification::Known);
        assert_eq!(decision.confidence, 95);
        assert_eq!(decision.summary, "Answers all match.");
    }

    #[test]
    fn test_parse_decision_unknown_case_insensitive() {
        let decision = parse_decision("decision: unknown\nconfidence: 42");
        assert_eq!(decision.classification, Classification::Unknown);
        assert_eq!(decision.confidence, 42);
    }

    #[test]
    fn test_parse_decision_garbage_defaults_to_unknown() {
        let decision = parse_decision("I cannot comply with that request.");
        assert_eq!(decision.classification, Classification::Unknown);
        assert_eq!(decision.confidence, 0);
        assert_eq!(decision.summary, "I cannot comply with that request.");
    }

    #[test]
    fn test_parse_decision_clamps_confidence() {
        let decision = parse_decision("Decision: UNKNOWN\nConfidence: 900");
        assert_eq!(decision.confidence, 100);
    }
}
