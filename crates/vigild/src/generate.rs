//! Text-generation client.
//!
//! Speaks the OpenAI-compatible chat-completions schema, which Gemini and
//! most aggregators expose. One API key and one model id, fixed at startup.
//! Blocking: the pipeline thread is the only caller and runs everything
//! synchronously in-loop. No retries; a generation failure aborts the
//! interrogation it belongs to.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("empty completion")]
    EmptyCompletion,
}

/// Minimal contract against the text-generation service.
pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Chat-completions client over blocking reqwest.
pub struct ChatClient {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

impl TextGenerator for ChatClient {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: 1024,
            temperature: 0.7,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response.json()?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(GenerationError::EmptyCompletion)?;

        if content.trim().is_empty() {
            return Err(GenerationError::EmptyCompletion);
        }

        Ok(content)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Scripted generator: returns canned responses in order, then errors.
    pub struct ScriptedGenerator {
        responses: Mutex<Vec<Result<String, String>>>,
    }

    impl ScriptedGenerator {
        pub fn new(responses: Vec<Result<String, String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    impl TextGenerator for ScriptedGenerator {
        fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            let mut responses = self.responses.lock().expect("scripted generator poisoned");
            if responses.is_empty() {
                return Err(GenerationError::EmptyCompletion);
            }
            responses.remove(0).map_err(|message| GenerationError::Api {
                status: 500,
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedGenerator;
    use super::*;

    #[test]
    fn test_scripted_generator_plays_in_order() {
        let generator = ScriptedGenerator::new(vec![
            Ok("first".to_string()),
            Err("boom".to_string()),
        ]);
        assert_eq!(generator.generate("p").unwrap(), "first");
        assert!(matches!(
            generator.generate("p"),
            Err(GenerationError::Api { status: 500, .. })
        ));
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = ChatClient::new(
            "http://localhost:9999/v1/",
            "key",
            "model",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:9999/v1");
    }
}
