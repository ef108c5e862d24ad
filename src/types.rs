//! Shared generation types
//!
//! Defines the unified request/response structures passed between the
//! dispatcher, the provider adapters and the stream relay.

use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Model used when the caller does not name one.
pub const DEFAULT_MODEL: &str = "meta.llama3-8b-instruct-v1:0";

/// Sampling options accepted on the unified request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1000,
            top_p: 0.9,
        }
    }
}

/// Unified "generate text" request as received from the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(rename = "model", default = "default_model")]
    pub model_id: String,
    pub prompt: String,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub options: GenerationOptions,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_stream() -> bool {
    true
}

impl GenerationRequest {
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>, stream: bool) -> Self {
        Self {
            model_id: model_id.into(),
            prompt: prompt.into(),
            stream,
            options: GenerationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

/// Normalized unit of generation output
///
/// Exactly one chunk per request carries `done = true`, and it is always the
/// last one produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedChunk {
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub response: String,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UnifiedChunk {
    /// Non-terminal chunk carrying one piece of text
    pub fn delta(model: &str, text: impl Into<String>) -> Self {
        Self {
            model: model.to_string(),
            created_at: Utc::now(),
            response: text.into(),
            done: false,
            usage: None,
            stop_reason: None,
            error: None,
        }
    }

    /// Terminal chunk
    pub fn terminal(
        model: &str,
        text: impl Into<String>,
        usage: Map<String, Value>,
        stop_reason: Option<String>,
    ) -> Self {
        Self {
            model: model.to_string(),
            created_at: Utc::now(),
            response: text.into(),
            done: true,
            usage: Some(usage),
            stop_reason,
            error: None,
        }
    }

    /// Terminal chunk reporting a failure that happened after output started
    pub fn failed(model: &str, error: impl Into<String>) -> Self {
        Self {
            model: model.to_string(),
            created_at: Utc::now(),
            response: String::new(),
            done: true,
            usage: None,
            stop_reason: None,
            error: Some(error.into()),
        }
    }
}

/// Lazily produced, single-pass chunk sequence.
///
/// Dropping the stream is the cancellation signal: any upstream connection it
/// owns is released and no further work is done.
pub type ChunkStream = Pin<Box<dyn Stream<Item = UnifiedChunk> + Send>>;

/// Outcome of a dispatched generation
pub enum Generation {
    /// Single terminal chunk
    Chunk(UnifiedChunk),
    /// Chunk sequence ending in exactly one terminal chunk
    Stream(ChunkStream),
}

impl Generation {
    /// Wrap a chunk as a one-element sequence
    pub fn single_stream(chunk: UnifiedChunk) -> Self {
        Generation::Stream(Box::pin(stream::once(async move { chunk })))
    }

    /// View the generation as a stream; a single chunk becomes a one-element
    /// sequence.
    pub fn into_stream(self) -> ChunkStream {
        match self {
            Generation::Chunk(chunk) => Box::pin(stream::once(async move { chunk })),
            Generation::Stream(stream) => stream,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Generation::Stream(_))
    }
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Generation::Chunk(chunk) => f.debug_tuple("Chunk").field(chunk).finish(),
            Generation::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Read-only catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub provider: String,
    pub input_modalities: Vec<String>,
    pub output_modalities: Vec<String>,
}

impl ModelDescriptor {
    pub fn new(name: &str, provider: &str, input: &[&str], output: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            provider: provider.to_string(),
            input_modalities: input.iter().map(|s| s.to_string()).collect(),
            output_modalities: output.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Whitespace-token count used for approximate usage figures
pub fn count_words(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}
