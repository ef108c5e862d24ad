//! Model dispatch
//!
//! Routes a [`GenerationRequest`] to its provider adapter, runs it against
//! the upstream and decides what to do with upstream failures: credential
//! and validation problems become the demo fallback, everything else is a
//! generation error.

use serde_json::json;
use uuid::Uuid;

use crate::adapters::{AdapterRegistry, ProviderAdapter, DEFAULT_REGISTRY};
use crate::error::{RelayError, RelayResult};
use crate::fallback;
use crate::logger::{self, LogLevel};
use crate::types::{Generation, GenerationRequest};
use crate::upstream::{BedrockApi, UpstreamError, UpstreamErrorKind};

/// Messages that mean "no usable credentials" when the error carries no kind
const CREDENTIAL_MARKERS: &[&str] = &[
    "Unable to locate credentials",
    "InvalidAccessKeyId",
    "AccessDeniedException",
    "UnrecognizedClient",
    "security token",
];

/// What to do with an upstream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Substitute the demo reply
    Fallback,
    /// Surface as a generation error
    Propagate,
}

pub fn classify_failure(err: &UpstreamError) -> FailureAction {
    match err.kind {
        UpstreamErrorKind::AccessDenied
        | UpstreamErrorKind::Validation
        | UpstreamErrorKind::Unauthenticated => FailureAction::Fallback,
        UpstreamErrorKind::Unclassified
            if CREDENTIAL_MARKERS
                .iter()
                .any(|marker| err.message.contains(marker)) =>
        {
            FailureAction::Fallback
        }
        _ => FailureAction::Propagate,
    }
}

pub struct Dispatcher<'r, C> {
    client: C,
    registry: &'r AdapterRegistry,
}

impl<C: BedrockApi> Dispatcher<'static, C> {
    pub fn new(client: C) -> Self {
        Self::with_registry(client, &DEFAULT_REGISTRY)
    }
}

impl<'r, C: BedrockApi> Dispatcher<'r, C> {
    pub fn with_registry(client: C, registry: &'r AdapterRegistry) -> Self {
        Self { client, registry }
    }

    /// Adapter for `model_id`; a pure function of the id
    pub fn route(&self, model_id: &str) -> ProviderAdapter {
        self.registry.route(model_id).adapter()
    }

    pub async fn generate(&self, request: &GenerationRequest) -> RelayResult<Generation> {
        let request_id = Uuid::new_v4().to_string();
        let metadata = json!({ "request_id": request_id, "model": request.model_id }).to_string();
        let log = |level: LogLevel, message: String| {
            logger::log_with_metadata(level, "dispatch", &message, Some(&metadata));
        };

        let adapter = self.route(&request.model_id);
        log(
            LogLevel::Info,
            format!(
                "[{}] model={} adapter={} stream={} incremental={}",
                request_id,
                request.model_id,
                adapter.name(),
                request.stream,
                adapter.supports_incremental_streaming()
            ),
        );

        match adapter.invoke(&self.client, request).await {
            Ok(generation) => {
                log(
                    LogLevel::Debug,
                    format!(
                        "[{}] upstream accepted ({})",
                        request_id,
                        if generation.is_stream() { "stream" } else { "single" }
                    ),
                );
                Ok(generation)
            }
            Err(err) => match classify_failure(&err) {
                FailureAction::Fallback => {
                    log(
                        LogLevel::Warn,
                        format!(
                            "[{}] upstream unusable, serving demo reply: kind={}, error={}",
                            request_id, err.kind, err
                        ),
                    );
                    Ok(fallback::fallback(
                        &request.model_id,
                        &request.prompt,
                        request.stream,
                    ))
                }
                FailureAction::Propagate => {
                    log(
                        LogLevel::Error,
                        format!(
                            "[{}] generation failed: kind={}, error={}",
                            request_id, err.kind, err
                        ),
                    );
                    Err(RelayError::Generation(err))
                }
            },
        }
    }
}
