//! Chat completion request and response types, including image input.

use serde::{Deserialize, Serialize};

// =============================================================================
// Request
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// 0.0 for deterministic transcription
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    /// A user turn mixing text and images.
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }
}

/// Either a bare string or an array of typed parts on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Inline image sent as a `data:` URL.
    pub fn image_base64(mime: &str, base64_data: &str) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{};base64,{}", mime, base64_data),
                detail: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,

    /// `low`, `high` or `auto`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// =============================================================================
// Response
// =============================================================================

#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// `None` when the model returned no text
    pub content: Option<String>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionBody {
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChoiceMessage {
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_request_builder() {
        let req = ChatRequest::new("gpt-4o")
            .message(Message::system("Reply with digits only"))
            .message(Message::user("Hello"))
            .temperature(0.0)
            .max_tokens(16);

        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages[1].role, Role::User);
        assert_eq!(req.temperature, Some(0.0));
        assert_eq!(req.max_tokens, Some(16));
    }

    #[test]
    fn test_unset_options_are_omitted() {
        let value = serde_json::to_value(ChatRequest::new("gpt-4o")).unwrap();
        assert_eq!(value, json!({ "model": "gpt-4o", "messages": [] }));
    }

    #[test]
    fn test_text_message_serializes_as_string() {
        let value = serde_json::to_value(Message::user("Hello")).unwrap();
        assert_eq!(value, json!({ "role": "user", "content": "Hello" }));
    }

    #[test]
    fn test_image_parts_serialize_as_data_url() {
        let message = Message::user_parts(vec![
            ContentPart::text("what are the digits?"),
            ContentPart::image_base64("image/jpeg", "QUJD"),
        ]);

        let value = serde_json::to_value(message).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "user",
                "content": [
                    { "type": "text", "text": "what are the digits?" },
                    { "type": "image_url", "image_url": { "url": "data:image/jpeg;base64,QUJD" } }
                ]
            })
        );
    }

    #[test]
    fn test_null_content_deserializes() {
        let body: CompletionBody = serde_json::from_value(json!({
            "choices": [{ "message": { "role": "assistant", "content": null } }],
            "usage": null
        }))
        .unwrap();
        assert!(body.choices[0].message.content.is_none());
    }
}
