//! Challenge solving through a vision-capable chat model.

use async_trait::async_trait;
use base64::Engine;
use openai_client::{ChatRequest, ContentPart, Message, OpenAIClient};
use tracing::{debug, warn};

use crate::error::CrawlResult;
use crate::traits::{Challenge, ChallengeSolver};

pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Sends the challenge screenshot with a fixed instruction and keeps the
/// digits of the reply.
#[derive(Debug, Clone)]
pub struct VisionChallengeSolver {
    client: OpenAIClient,
    model: String,
    instruction: String,
}

impl VisionChallengeSolver {
    pub fn new(client: OpenAIClient, instruction: impl Into<String>) -> Self {
        Self {
            client,
            model: DEFAULT_MODEL.to_string(),
            instruction: instruction.into(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn build_request(&self, challenge: &Challenge) -> ChatRequest {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&challenge.screenshot);
        ChatRequest::new(&self.model)
            .message(Message::user_parts(vec![
                ContentPart::text(&self.instruction),
                ContentPart::image_base64(challenge.mime, &encoded),
            ]))
            .temperature(0.0)
    }
}

#[async_trait]
impl ChallengeSolver for VisionChallengeSolver {
    async fn solve(&self, challenge: &Challenge) -> CrawlResult<Option<String>> {
        let response = self
            .client
            .chat_completion(self.build_request(challenge))
            .await?;

        let reply = response.content.unwrap_or_default();
        let digits = digits_only(&reply);
        debug!(reply = %reply.trim(), digits = %digits, "Challenge solver replied");

        if digits.is_empty() {
            return Ok(None);
        }
        if let Some(expected) = challenge.expected_digits {
            if digits.len() != expected {
                warn!(expected, got = digits.len(), "Unexpected digit count");
                return Ok(None);
            }
        }
        Ok(Some(digits))
    }
}

/// Keep ASCII digits, in order.
pub fn digits_only(reply: &str) -> String {
    reply.chars().filter(|c| c.is_ascii_digit()).collect()
}
