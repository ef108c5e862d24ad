//! In-memory [`BedrockApi`] used by unit tests

use std::sync::Mutex;

use futures_util::stream;
use serde_json::Value;

use super::{BedrockApi, EventPayloadStream, UpstreamError, UpstreamResult};

/// Scripted upstream. Each call returns the configured outcome and records
/// the `(operation, model_id, body)` it received.
#[derive(Default)]
pub struct FakeBedrock {
    pub invoke: Option<UpstreamResult<Value>>,
    pub stream_events: Option<UpstreamResult<Vec<UpstreamResult<Value>>>>,
    pub converse: Option<UpstreamResult<Value>>,
    pub listing: Option<UpstreamResult<Value>>,
    calls: Mutex<Vec<(String, String, Value)>>,
}

impl FakeBedrock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation fails with `err`
    pub fn failing(err: UpstreamError) -> Self {
        Self {
            invoke: Some(Err(err.clone())),
            stream_events: Some(Err(err.clone())),
            converse: Some(Err(err.clone())),
            listing: Some(Err(err)),
            calls: Mutex::default(),
        }
    }

    pub fn with_invoke(mut self, body: Value) -> Self {
        self.invoke = Some(Ok(body));
        self
    }

    pub fn with_stream(mut self, events: Vec<UpstreamResult<Value>>) -> Self {
        self.stream_events = Some(Ok(events));
        self
    }

    pub fn with_converse(mut self, body: Value) -> Self {
        self.converse = Some(Ok(body));
        self
    }

    pub fn with_listing(mut self, body: Value) -> Self {
        self.listing = Some(Ok(body));
        self
    }

    pub fn calls(&self) -> Vec<(String, String, Value)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, op: &str, model_id: &str, body: &Value) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((op.to_string(), model_id.to_string(), body.clone()));
        }
    }

    fn outcome<T: Clone>(configured: &Option<UpstreamResult<T>>, op: &str) -> UpstreamResult<T> {
        configured
            .clone()
            .unwrap_or_else(|| Err(UpstreamError::untyped(format!("{} not scripted", op))))
    }
}

impl BedrockApi for FakeBedrock {
    async fn invoke_model(&self, model_id: &str, body: &Value) -> UpstreamResult<Value> {
        self.record("invoke", model_id, body);
        Self::outcome(&self.invoke, "invoke")
    }

    async fn invoke_model_with_response_stream(
        &self,
        model_id: &str,
        body: &Value,
    ) -> UpstreamResult<EventPayloadStream> {
        self.record("invoke_stream", model_id, body);
        let events = Self::outcome(&self.stream_events, "invoke_stream")?;
        Ok(Box::pin(stream::iter(events)))
    }

    async fn converse(&self, model_id: &str, body: &Value) -> UpstreamResult<Value> {
        self.record("converse", model_id, body);
        Self::outcome(&self.converse, "converse")
    }

    async fn list_foundation_models(&self) -> UpstreamResult<Value> {
        self.record("list", "", &Value::Null);
        Self::outcome(&self.listing, "list")
    }
}
