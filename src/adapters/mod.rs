//! Provider adapters module
//!
//! One adapter per provider wire format. Each builds the native request body,
//! calls the upstream and normalizes what comes back.

pub mod chat_message;
pub mod conversational;
pub mod single_text;

use std::future::Future;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::logger;
use crate::types::{Generation, GenerationRequest, UnifiedChunk};
use crate::upstream::{BedrockApi, UpstreamResult};

pub use chat_message::ChatMessageAdapter;
pub use conversational::ConversationalBlockAdapter;
pub use single_text::SingleTextAdapter;

/// Identifies an adapter variant in the routing table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    ConversationalBlock,
    SingleText,
    ChatMessage,
}

impl AdapterKind {
    pub fn adapter(self) -> ProviderAdapter {
        match self {
            AdapterKind::ConversationalBlock => {
                ProviderAdapter::ConversationalBlock(ConversationalBlockAdapter)
            }
            AdapterKind::SingleText => ProviderAdapter::SingleText(SingleTextAdapter),
            AdapterKind::ChatMessage => ProviderAdapter::ChatMessage(ChatMessageAdapter),
        }
    }
}

/// Provider adapter enum for dispatching to the correct implementation
pub enum ProviderAdapter {
    ConversationalBlock(ConversationalBlockAdapter),
    SingleText(SingleTextAdapter),
    ChatMessage(ChatMessageAdapter),
}

impl ProviderAdapter {
    pub fn kind(&self) -> AdapterKind {
        match self {
            ProviderAdapter::ConversationalBlock(_) => AdapterKind::ConversationalBlock,
            ProviderAdapter::SingleText(_) => AdapterKind::SingleText,
            ProviderAdapter::ChatMessage(_) => AdapterKind::ChatMessage,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderAdapter::ConversationalBlock(a) => a.name(),
            ProviderAdapter::SingleText(a) => a.name(),
            ProviderAdapter::ChatMessage(a) => a.name(),
        }
    }

    pub fn supports_incremental_streaming(&self) -> bool {
        match self {
            ProviderAdapter::ConversationalBlock(a) => a.supports_incremental_streaming(),
            ProviderAdapter::SingleText(a) => a.supports_incremental_streaming(),
            ProviderAdapter::ChatMessage(a) => a.supports_incremental_streaming(),
        }
    }

    pub fn build_request(&self, request: &GenerationRequest) -> Value {
        match self {
            ProviderAdapter::ConversationalBlock(a) => a.build_request(request),
            ProviderAdapter::SingleText(a) => a.build_request(request),
            ProviderAdapter::ChatMessage(a) => a.build_request(request),
        }
    }

    pub fn parse(&self, model_id: &str, response: &Value) -> UnifiedChunk {
        match self {
            ProviderAdapter::ConversationalBlock(a) => a.parse(model_id, response),
            ProviderAdapter::SingleText(a) => a.parse(model_id, response),
            ProviderAdapter::ChatMessage(a) => a.parse(model_id, response),
        }
    }

    pub async fn invoke<C: BedrockApi>(
        &self,
        client: &C,
        request: &GenerationRequest,
    ) -> UpstreamResult<Generation> {
        match self {
            ProviderAdapter::ConversationalBlock(a) => a.invoke(client, request).await,
            ProviderAdapter::SingleText(a) => a.invoke(client, request).await,
            ProviderAdapter::ChatMessage(a) => a.invoke(client, request).await,
        }
    }
}

/// Provider-specific marshaling
///
/// `invoke` surfaces upstream failures that happen before any output as `Err`
/// so the caller can classify them; failures after output has started are
/// reported in-band as a terminal chunk carrying `error`.
pub trait ProviderAdapterImpl: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the provider emits text incrementally; when false a streaming
    /// request gets the full reply as one terminal chunk.
    fn supports_incremental_streaming(&self) -> bool;

    /// Native request body for `request`
    fn build_request(&self, request: &GenerationRequest) -> Value;

    /// Normalize a single-shot native response
    fn parse(&self, model_id: &str, response: &Value) -> UnifiedChunk;

    fn invoke<C: BedrockApi>(
        &self,
        client: &C,
        request: &GenerationRequest,
    ) -> impl Future<Output = UpstreamResult<Generation>> + Send;
}

/// Priority-ordered model-id pattern table
pub struct AdapterRegistry {
    routes: Vec<(Regex, AdapterKind)>,
    default: AdapterKind,
}

const BUILTIN_ROUTES: [(&str, AdapterKind); 3] = [
    (r"anthropic\.claude", AdapterKind::ConversationalBlock),
    (r"amazon\.titan", AdapterKind::SingleText),
    (r"meta\.llama", AdapterKind::ChatMessage),
];

impl AdapterRegistry {
    pub fn new(default: AdapterKind) -> Self {
        Self {
            routes: Vec::new(),
            default,
        }
    }

    /// Registry with the built-in providers, unmatched ids go to the
    /// conversational-block adapter.
    pub fn builtin() -> Self {
        let mut registry = Self::new(AdapterKind::ConversationalBlock);
        for (pattern, kind) in BUILTIN_ROUTES {
            if let Err(e) = registry.register(pattern, kind) {
                logger::error(
                    "adapters",
                    &format!("Invalid route pattern {}: {}", pattern, e),
                );
            }
        }
        registry
    }

    /// Append a route; earlier registrations win. Patterns match anywhere in
    /// the model id.
    pub fn register(&mut self, pattern: &str, kind: AdapterKind) -> Result<(), regex::Error> {
        self.routes.push((Regex::new(pattern)?, kind));
        Ok(())
    }

    pub fn route(&self, model_id: &str) -> AdapterKind {
        self.routes
            .iter()
            .find(|(re, _)| re.is_match(model_id))
            .map(|(_, kind)| *kind)
            .unwrap_or(self.default)
    }
}

/// Process-wide read-only registry
pub static DEFAULT_REGISTRY: Lazy<AdapterRegistry> = Lazy::new(AdapterRegistry::builtin);

/// Single-shot adapters: one terminal chunk, wrapped as a one-element
/// sequence when streaming was requested.
fn emulate_stream(request: &GenerationRequest, chunk: UnifiedChunk) -> Generation {
    if request.stream {
        Generation::single_stream(chunk)
    } else {
        Generation::Chunk(chunk)
    }
}
