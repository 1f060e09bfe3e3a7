//! Chat message abstraction shared by the preprocessor pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of a chat message array.
///
/// `content` is left as a raw JSON value because upstream APIs accept both a
/// plain string and a multimodal part array; preprocessors that only care
/// about text use [`text`](Self::text) / [`as_text`](Self::as_text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message author role: `system`, `user`, `assistant`, ...
    pub role: String,
    /// String content or multimodal part array.
    pub content: Value,
    /// Any additional keys the surrounding API carries (names, tool ids).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    /// Creates a plain-text message.
    pub fn text(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Value::String(content.into()),
            extra: Map::new(),
        }
    }

    /// The content as text, when it is a plain string.
    pub fn as_text(&self) -> Option<&str> {
        self.content.as_str()
    }
}
