//! Public types for the chat API
use serde::{Deserialize, Serialize};

use crate::ai::formatting::FormatPolicy;
use crate::openai::{Message, Role};

/// A chat message as sent by the browser. The `id` is only used by
/// the client to key its own list and is not forwarded to the model.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            id: None,
            role,
            content: content.to_string(),
        }
    }
}

impl From<ChatMessage> for Message {
    fn from(msg: ChatMessage) -> Self {
        Message {
            role: msg.role,
            content: msg.content,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    // Whether to ask the model for HTML output. Defaults to sniffing
    // the last message.
    #[serde(default)]
    pub format: FormatPolicy,
}
