//! Model catalog
//!
//! Best-effort listing of the foundation models the account can see. Any
//! failure yields the built-in set, so the listing is never empty.

use serde_json::Value;

use crate::logger;
use crate::types::ModelDescriptor;
use crate::upstream::BedrockApi;

const UNKNOWN_PROVIDER: &str = "Unknown";

pub fn builtin_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new(
            "anthropic.claude-3-5-sonnet-20240620-v1:0",
            "Anthropic",
            &["TEXT", "IMAGE"],
            &["TEXT"],
        ),
        ModelDescriptor::new(
            "amazon.nova-pro-v1:0",
            "Amazon",
            &["TEXT", "IMAGE", "VIDEO"],
            &["TEXT"],
        ),
        ModelDescriptor::new("openai.gpt-oss-120b-1:0", "OpenAI", &["TEXT"], &["TEXT"]),
        ModelDescriptor::new("meta.llama3-8b-instruct-v1:0", "Meta", &["TEXT"], &["TEXT"]),
    ]
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|m| m.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Active entries of a `ListFoundationModels` response
pub fn parse_listing(body: &Value) -> Vec<ModelDescriptor> {
    let Some(summaries) = body.get("modelSummaries").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    summaries
        .iter()
        .filter(|s| {
            s.pointer("/modelLifecycle/status")
                .and_then(|v| v.as_str())
                .is_some_and(|status| status == "ACTIVE")
        })
        .filter_map(|s| {
            let name = s.get("modelId").and_then(|v| v.as_str())?;
            Some(ModelDescriptor {
                name: name.to_string(),
                provider: s
                    .get("providerName")
                    .and_then(|v| v.as_str())
                    .unwrap_or(UNKNOWN_PROVIDER)
                    .to_string(),
                input_modalities: string_list(s.get("inputModalities")),
                output_modalities: string_list(s.get("outputModalities")),
            })
        })
        .collect()
}

pub async fn list_models<C: BedrockApi>(client: &C) -> Vec<ModelDescriptor> {
    match client.list_foundation_models().await {
        Ok(body) => {
            let models = parse_listing(&body);
            if models.is_empty() {
                logger::warn("catalog", "No active models in listing, using built-in set");
                builtin_models()
            } else {
                logger::debug("catalog", &format!("Listed {} active models", models.len()));
                models
            }
        }
        Err(e) => {
            logger::warn(
                "catalog",
                &format!("Model listing failed, using built-in set: {}", e),
            );
            builtin_models()
        }
    }
}
