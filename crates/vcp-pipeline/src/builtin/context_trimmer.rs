//! Caps the length of the chat message array.
//!
//! Long-running conversations can outgrow the model context. This module
//! keeps every leading `system` message plus the most recent tail of the
//! rest, bounded by the `MaxMessages` config key (0 or absent disables
//! trimming).

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use vcp_core::error::PreprocessResult;
use vcp_core::message::ChatMessage;

use crate::MessagePreprocessor;

pub struct ContextTrimmer;

#[async_trait]
impl MessagePreprocessor for ContextTrimmer {
    async fn process_messages(
        &self,
        messages: Vec<ChatMessage>,
        config: &Value,
    ) -> PreprocessResult<Vec<ChatMessage>> {
        let max = config
            .get("MaxMessages")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        if max == 0 || messages.len() <= max {
            return Ok(messages);
        }

        let system_count = messages
            .iter()
            .take_while(|m| m.role == "system")
            .count()
            .min(max);
        let tail_budget = max - system_count;
        let body = &messages[system_count..];
        let tail_start = body.len().saturating_sub(tail_budget);

        let mut trimmed = messages[..system_count].to_vec();
        trimmed.extend_from_slice(&body[tail_start..]);
        debug!(
            before = messages.len(),
            after = trimmed.len(),
            "Trimmed conversation context"
        );
        Ok(trimmed)
    }
}
