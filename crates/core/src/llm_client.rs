use crate::{
    error::StreamError,
    sse::CompletionStream,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Author of a conversation turn, named the way the generation API names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One finished turn of the tutor conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Everything needed for one streaming call. Built per action and never
/// modified after it is handed to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub user_prompt: String,
    pub system_prompt: String,
    pub prior_turns: Vec<ChatTurn>,
}

impl GenerationRequest {
    pub fn new(user_prompt: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            system_prompt: system_prompt.into(),
            prior_turns: Vec::new(),
        }
    }

    pub fn with_prior_turns(mut self, turns: Vec<ChatTurn>) -> Self {
        self.prior_turns = turns;
        self
    }
}

/// A client able to stream a completion for a [`GenerationRequest`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Opens the stream. Fails before yielding anything if the request cannot
    /// be sent or the endpoint answers with a non-success status.
    async fn stream_completion(
        &self,
        request: &GenerationRequest,
    ) -> Result<CompletionStream, StreamError>;
}

/// Connection settings for the Gemini generative language API.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: SystemInstruction<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: Role,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

fn build_payload(request: &GenerationRequest) -> GenerateContentRequest<'_> {
    let contents = request
        .prior_turns
        .iter()
        .map(|turn| Content {
            role: turn.role,
            parts: vec![Part { text: &turn.text }],
        })
        .chain(std::iter::once(Content {
            role: Role::User,
            parts: vec![Part {
                text: &request.user_prompt,
            }],
        }))
        .collect();

    GenerateContentRequest {
        contents,
        system_instruction: SystemInstruction {
            parts: vec![Part {
                text: &request.system_prompt,
            }],
        },
    }
}

/// Streams completions from `streamGenerateContent` over server-sent events.
pub struct GeminiClient {
    config: GeminiConfig,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LLMClient for GeminiClient {
    #[instrument(skip_all, fields(model = %self.config.model, prior_turns = request.prior_turns.len()))]
    async fn stream_completion(
        &self,
        request: &GenerationRequest,
    ) -> Result<CompletionStream, StreamError> {
        let response = self
            .http
            .post(self.config.stream_url())
            .header("x-goog-api-key", &self.config.api_key)
            .header("accept", "text/event-stream")
            .json(&build_payload(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .ok()
                .filter(|b| !b.is_empty())
                .or_else(|| status.canonical_reason().map(str::to_owned))
                .unwrap_or_default();
            return Err(StreamError::Service {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Generation stream opened");
        let body = response.bytes_stream().map_err(StreamError::from);
        Ok(CompletionStream::new(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::StreamEvent;
    use futures::StreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_body(chunks: &[&str]) -> String {
        chunks
            .iter()
            .map(|text| {
                format!(
                    "data: {}\r\n\r\n",
                    serde_json::json!({"candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}]})
                )
            })
            .collect()
    }

    fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new(GeminiConfig::new("test-key", "gemini-test").with_base_url(server.uri()))
    }

    #[test]
    fn test_payload_shape() {
        let request = GenerationRequest::new("What is ownership?", "You are a tutor.")
            .with_prior_turns(vec![ChatTurn::user("Hi"), ChatTurn::model("Hello!")]);

        let json = serde_json::to_value(build_payload(&request)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "Hi"}]},
                    {"role": "model", "parts": [{"text": "Hello!"}]},
                    {"role": "user", "parts": [{"text": "What is ownership?"}]}
                ],
                "systemInstruction": {"parts": [{"text": "You are a tutor."}]}
            })
        );
    }

    #[test]
    fn test_stream_url() {
        let config = GeminiConfig::new("k", "gemini-2.5-flash").with_base_url("http://localhost:9/v1beta/");
        assert_eq!(
            config.stream_url(),
            "http://localhost:9/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse"
        );
    }

    #[tokio::test]
    async fn test_streams_deltas_then_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-test:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "systemInstruction": {"parts": [{"text": "sys"}]}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&["## Rust", " Basics"])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let stream = client_for(&server)
            .stream_completion(&GenerationRequest::new("Rust", "sys"))
            .await
            .unwrap();
        let events: Vec<StreamEvent> = stream.map(Result::unwrap).collect().await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("## Rust".to_string()),
                StreamEvent::Delta(" Basics".to_string()),
                StreamEvent::Completed("## Rust Basics".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_non_success_status_fails_without_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .stream_completion(&GenerationRequest::new("Rust", "sys"))
            .await;

        match result {
            Err(StreamError::Service { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "overloaded");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected a service error"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let client = GeminiClient::new(
            GeminiConfig::new("k", "m").with_base_url("http://127.0.0.1:1"),
        );
        let result = client
            .stream_completion(&GenerationRequest::new("Rust", "sys"))
            .await;
        assert!(matches!(result, Err(StreamError::Network(_))));
    }
}
