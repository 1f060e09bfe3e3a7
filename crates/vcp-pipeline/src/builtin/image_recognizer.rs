//! Replaces multimodal image parts with text annotations.
//!
//! Upstream models without vision support reject message parts of type
//! `image_url`. This module rewrites each such part into a text part,
//! using the `AnnotationText` config key as the replacement (default
//! `[image omitted]`), leaving plain-string messages untouched.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use vcp_core::error::PreprocessResult;
use vcp_core::message::ChatMessage;

use crate::MessagePreprocessor;

const DEFAULT_ANNOTATION: &str = "[image omitted]";

pub struct ImageRecognizer;

#[async_trait]
impl MessagePreprocessor for ImageRecognizer {
    async fn process_messages(
        &self,
        mut messages: Vec<ChatMessage>,
        config: &Value,
    ) -> PreprocessResult<Vec<ChatMessage>> {
        let annotation = config
            .get("AnnotationText")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_ANNOTATION);

        let mut replaced = 0usize;
        for message in &mut messages {
            let Some(parts) = message.content.as_array_mut() else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(Value::as_str) == Some("image_url") {
                    *part = json!({ "type": "text", "text": annotation });
                    replaced += 1;
                }
            }
        }
        if replaced > 0 {
            debug!(replaced, "Replaced image parts with text annotations");
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rewrites_image_parts() {
        let message = ChatMessage {
            role: "user".into(),
            content: json!([
                { "type": "text", "text": "look:" },
                { "type": "image_url", "image_url": { "url": "http://x/cat.png" } }
            ]),
            extra: Default::default(),
        };
        let out = ImageRecognizer
            .process_messages(vec![message], &json!({"AnnotationText": "[cat photo]"}))
            .await
            .unwrap();
        let parts = out[0].content.as_array().unwrap();
        assert_eq!(parts[0]["text"], "look:");
        assert_eq!(parts[1]["type"], "text");
        assert_eq!(parts[1]["text"], "[cat photo]");
    }

    #[tokio::test]
    async fn plain_text_untouched() {
        let input = vec![ChatMessage::text("user", "no images here")];
        let out = ImageRecognizer
            .process_messages(input.clone(), &json!({}))
            .await
            .unwrap();
        assert_eq!(out, input);
    }
}
