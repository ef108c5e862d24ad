//! Upstream module
//!
//! The hosted-inference collaborator the relay talks to: AWS Bedrock's
//! runtime plane (invoke, invoke-with-stream, converse) and control plane
//! (foundation-model listing).
//!
//! ## Components
//!
//! - `client`: reqwest-based [`BedrockClient`]
//! - `auth`: bearer API key or SigV4 request signing
//! - `eventstream`: decoder for the binary streaming framing
//! - `error`: structured [`UpstreamError`] classification

pub mod auth;
pub mod client;
pub mod error;
pub mod eventstream;

#[cfg(test)]
pub(crate) mod fake;

use std::future::Future;
use std::pin::Pin;

use futures_util::Stream;
use serde_json::Value;

pub use client::BedrockClient;
pub use error::{UpstreamError, UpstreamErrorKind, UpstreamResult};

/// Decoded JSON events of a streaming invocation, in arrival order.
///
/// A mid-stream failure is yielded as an `Err` item and ends the stream.
pub type EventPayloadStream = Pin<Box<dyn Stream<Item = UpstreamResult<Value>> + Send>>;

/// Calls the relay needs from the inference service.
///
/// Implementations own their connection state; the relay builds one per
/// request and never shares it.
pub trait BedrockApi: Send + Sync {
    /// Single-shot invocation, returns the model's native JSON body
    fn invoke_model(
        &self,
        model_id: &str,
        body: &Value,
    ) -> impl Future<Output = UpstreamResult<Value>> + Send;

    /// Streaming invocation, returns the model's native JSON events
    fn invoke_model_with_response_stream(
        &self,
        model_id: &str,
        body: &Value,
    ) -> impl Future<Output = UpstreamResult<EventPayloadStream>> + Send;

    /// Chat-style converse call, returns the converse JSON response
    fn converse(
        &self,
        model_id: &str,
        body: &Value,
    ) -> impl Future<Output = UpstreamResult<Value>> + Send;

    /// Foundation-model listing, returns the raw listing JSON
    fn list_foundation_models(&self) -> impl Future<Output = UpstreamResult<Value>> + Send;
}
