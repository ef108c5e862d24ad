//! Response normalization
//!
//! Maps each provider's native JSON into [`UnifiedChunk`]s. Missing or
//! unexpected fields fall back to an empty string, an empty usage map, or the
//! documented default stop reason; nothing here returns an error.

use serde_json::{Map, Value};

use crate::types::UnifiedChunk;

/// Stop reason reported when the provider does not give one
pub const DEFAULT_STOP_REASON: &str = "end_turn";

fn usage_object(value: Option<&Value>) -> Map<String, Value> {
    value
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default()
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(|v| v.as_str())
}

/// Anthropic messages response: `content[0].text`, `usage`, `stop_reason`
pub fn conversational_response(model: &str, body: &Value) -> UnifiedChunk {
    UnifiedChunk::terminal(
        model,
        str_at(body, "/content/0/text").unwrap_or_default(),
        usage_object(body.get("usage")),
        Some(
            body.get("stop_reason")
                .and_then(|v| v.as_str())
                .unwrap_or(DEFAULT_STOP_REASON)
                .to_string(),
        ),
    )
}

/// Titan text response: `results[0].outputText`; usage from the token
/// counts when the body carries them.
pub fn single_text_response(model: &str, body: &Value) -> UnifiedChunk {
    let mut usage = usage_object(body.get("usage"));
    if let Some(input) = body.get("inputTextTokenCount").and_then(|v| v.as_u64()) {
        usage.insert("input_tokens".to_string(), input.into());
    }
    if let Some(output) = body.pointer("/results/0/tokenCount").and_then(|v| v.as_u64()) {
        usage.insert("output_tokens".to_string(), output.into());
    }

    UnifiedChunk::terminal(
        model,
        str_at(body, "/results/0/outputText").unwrap_or_default(),
        usage,
        str_at(body, "/results/0/completionReason").map(String::from),
    )
}

/// Converse response: `output.message.content[0].text`, `usage`, `stopReason`
pub fn chat_message_response(model: &str, body: &Value) -> UnifiedChunk {
    UnifiedChunk::terminal(
        model,
        str_at(body, "/output/message/content/0/text").unwrap_or_default(),
        usage_object(body.get("usage")),
        Some(
            body.get("stopReason")
                .and_then(|v| v.as_str())
                .unwrap_or(DEFAULT_STOP_REASON)
                .to_string(),
        ),
    )
}

/// Accumulates usage and stop reason across an Anthropic event stream.
#[derive(Debug, Default)]
pub struct ConversationalStreamState {
    usage: Map<String, Value>,
    stop_reason: Option<String>,
}

impl ConversationalStreamState {
    fn merge_usage(&mut self, value: Option<&Value>) {
        if let Some(usage) = value.and_then(|v| v.as_object()) {
            for (k, v) in usage {
                self.usage.insert(k.clone(), v.clone());
            }
        }
    }

    fn merge_invocation_metrics(&mut self, metrics: Option<&Value>) {
        let Some(metrics) = metrics else {
            return;
        };
        for (field, key) in [
            ("inputTokenCount", "input_tokens"),
            ("outputTokenCount", "output_tokens"),
        ] {
            if let Some(n) = metrics.get(field).and_then(|v| v.as_u64()) {
                self.usage.entry(key.to_string()).or_insert(n.into());
            }
        }
    }

    /// Feed one native event; returns the chunk it produces, if any.
    ///
    /// `message_stop` and `error` events produce the terminal chunk.
    pub fn apply(&mut self, model: &str, event: &Value) -> Option<UnifiedChunk> {
        match event.get("type").and_then(|v| v.as_str()).unwrap_or_default() {
            "message_start" => {
                self.merge_usage(event.pointer("/message/usage"));
                None
            }
            "content_block_delta" => {
                str_at(event, "/delta/text").map(|text| UnifiedChunk::delta(model, text))
            }
            "message_delta" => {
                if let Some(reason) = str_at(event, "/delta/stop_reason") {
                    self.stop_reason = Some(reason.to_string());
                }
                self.merge_usage(event.get("usage"));
                None
            }
            "message_stop" => {
                self.merge_invocation_metrics(event.get("amazon-bedrock-invocationMetrics"));
                Some(UnifiedChunk::terminal(
                    model,
                    "",
                    std::mem::take(&mut self.usage),
                    Some(
                        self.stop_reason
                            .take()
                            .unwrap_or_else(|| DEFAULT_STOP_REASON.to_string()),
                    ),
                ))
            }
            "error" => Some(UnifiedChunk::failed(
                model,
                str_at(event, "/error/message").unwrap_or("Upstream stream error"),
            )),
            _ => None,
        }
    }
}
