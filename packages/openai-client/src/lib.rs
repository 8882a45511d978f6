//! Pure OpenAI REST API client
//!
//! A small client for the chat completions endpoint, including multimodal
//! (image) input. No crawl logic lives here.
//!
//! # Example
//!
//! ```rust,ignore
//! use openai_client::{ChatRequest, ContentPart, Message, OpenAIClient};
//!
//! let client = OpenAIClient::from_env()?;
//!
//! let response = client
//!     .chat_completion(
//!         ChatRequest::new("gpt-4o").message(Message::user_parts(vec![
//!             ContentPart::text("What is in this image?"),
//!             ContentPart::image_base64("image/jpeg", &encoded),
//!         ])),
//!     )
//!     .await?;
//! ```

pub mod error;
pub mod types;

pub use error::{OpenAIError, Result};
pub use types::{
    ChatRequest, ChatResponse, ContentPart, ImageUrl, Message, MessageContent, Role, Usage,
};

use types::CompletionBody;

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat completions client. Cheap to clone.
#[derive(Clone)]
pub struct OpenAIClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAIClient {
    /// Client for the public endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create from environment variable `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| OpenAIError::Config("OPENAI_API_KEY not set".into()))?;
        Ok(Self::new(api_key))
    }

    /// Point at a compatible endpoint (proxy, self-hosted gateway).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Bound every request by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OpenAIError::Config(e.to_string()))?;
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `/chat/completions` and return the first choice.
    pub async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse> {
        let start = std::time::Instant::now();

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "OpenAI request failed");
                OpenAIError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %message, "OpenAI API error");
            return Err(OpenAIError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: CompletionBody = response
            .json()
            .await
            .map_err(|e| OpenAIError::Parse(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or(OpenAIError::EmptyResponse)?;

        debug!(
            model = %request.model,
            duration_ms = start.elapsed().as_millis() as u64,
            prompt_tokens = body.usage.map(|u| u.prompt_tokens),
            completion_tokens = body.usage.map(|u| u.completion_tokens),
            "OpenAI chat completion"
        );

        Ok(ChatResponse {
            content: choice.message.content,
            usage: body.usage,
        })
    }
}
