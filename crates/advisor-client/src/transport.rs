//! Advisory transports.
//!
//! A transport performs exactly one request. Retries, timeouts and
//! cancellation live in [`crate::AdvisoryClient`].

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use llm_advisor_core::config::{AdvisoryConfig, ApiStyle, Secret};

use crate::error::AdvisoryError;

/// Longest upstream error body kept in an error message
const ERROR_BODY_LIMIT: usize = 512;

/// One request to the advisory service
#[async_trait]
pub trait AdvisoryTransport: Send + Sync {
    /// Send `prompt` and return the advice text
    async fn complete(&self, prompt: &str) -> Result<String, AdvisoryError>;

    /// Transport name for logs
    fn name(&self) -> &str {
        "advisory"
    }
}

/// Transport for OpenAI-compatible completion endpoints
#[derive(Debug, Clone)]
pub struct OpenAiTransport {
    client: Client,
    endpoint: String,
    api_key: Option<Secret>,
    model: String,
    api_style: ApiStyle,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiTransport {
    /// Build a transport from the advisory settings
    pub fn new(config: &AdvisoryConfig) -> llm_advisor_core::Result<Self> {
        if config.endpoint.is_empty() {
            return Err(llm_advisor_core::Error::config("advisory endpoint must be set"));
        }
        let client = Client::builder()
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| llm_advisor_core::Error::http(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            api_style: config.api_style,
            max_tokens: config.max_tokens,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, prompt: &str) -> serde_json::Result<Vec<u8>> {
        match self.api_style {
            ApiStyle::Chat => serde_json::to_vec(&ChatRequest {
                model: &self.model,
                messages: [ChatMessage {
                    role: "user",
                    content: prompt,
                }],
                max_tokens: self.max_tokens,
            }),
            ApiStyle::Completions => serde_json::to_vec(&CompletionRequest {
                model: &self.model,
                prompt,
                max_tokens: self.max_tokens,
            }),
        }
    }
}

#[async_trait]
impl AdvisoryTransport for OpenAiTransport {
    async fn complete(&self, prompt: &str) -> Result<String, AdvisoryError> {
        let body = self
            .request_body(prompt)
            .map_err(|e| AdvisoryError::transport(format!("failed to encode request: {}", e)))?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(ref api_key) = self.api_key {
            request = request.bearer_auth(api_key.expose());
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        debug!(status = status.as_u16(), bytes = text.len(), "Advisory response received");

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }
        parse_completion(&text)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Map a non-success status onto the error taxonomy
fn classify_status(status: StatusCode, body: &str) -> AdvisoryError {
    let message = snippet(body);
    match status.as_u16() {
        408 | 429 => AdvisoryError::transport(format!("HTTP {}: {}", status.as_u16(), message)),
        code if status.is_server_error() => {
            AdvisoryError::transport(format!("HTTP {}: {}", code, message))
        }
        code => AdvisoryError::Rejected {
            status: code,
            message,
        },
    }
}

/// Extract the advice text from a successful response body
fn parse_completion(body: &str) -> Result<String, AdvisoryError> {
    let response: CompletionResponse = serde_json::from_str(body).map_err(|e| {
        AdvisoryError::transport(format!("undecodable response body: {}", e))
    })?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AdvisoryError::malformed("response has no choices"))?;

    let text = choice
        .message
        .and_then(|m| m.content)
        .or(choice.text)
        .ok_or_else(|| AdvisoryError::malformed("first choice has no text"))?;

    if text.trim().is_empty() {
        return Err(AdvisoryError::malformed("first choice text is empty"));
    }
    Ok(text)
}

fn snippet(body: &str) -> String {
    let body = body.trim();
    if body.len() <= ERROR_BODY_LIMIT {
        return body.to_string();
    }
    let mut end = ERROR_BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
