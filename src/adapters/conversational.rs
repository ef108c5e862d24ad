//! Conversational-block adapter (Anthropic Claude messages API)
//!
//! The only adapter with native incremental streaming: text deltas arrive as
//! `content_block_delta` events and `message_stop` closes the reply.

use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};

use super::ProviderAdapterImpl;
use crate::normalize::{self, ConversationalStreamState};
use crate::types::{ChunkStream, Generation, GenerationRequest, UnifiedChunk};
use crate::upstream::{BedrockApi, EventPayloadStream, UpstreamResult};

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

pub struct ConversationalBlockAdapter;

impl ProviderAdapterImpl for ConversationalBlockAdapter {
    fn name(&self) -> &'static str {
        "conversational-block"
    }

    fn supports_incremental_streaming(&self) -> bool {
        true
    }

    fn build_request(&self, request: &GenerationRequest) -> Value {
        json!({
            "anthropic_version": ANTHROPIC_VERSION,
            "max_tokens": request.options.max_tokens,
            "temperature": request.options.temperature,
            "top_p": request.options.top_p,
            "messages": [
                {"role": "user", "content": request.prompt}
            ]
        })
    }

    fn parse(&self, model_id: &str, response: &Value) -> UnifiedChunk {
        normalize::conversational_response(model_id, response)
    }

    async fn invoke<C: BedrockApi>(
        &self,
        client: &C,
        request: &GenerationRequest,
    ) -> UpstreamResult<Generation> {
        let body = self.build_request(request);

        if request.stream {
            let events = client
                .invoke_model_with_response_stream(&request.model_id, &body)
                .await?;
            Ok(Generation::Stream(chunk_stream(
                request.model_id.clone(),
                events,
            )))
        } else {
            let response = client.invoke_model(&request.model_id, &body).await?;
            Ok(Generation::Chunk(self.parse(&request.model_id, &response)))
        }
    }
}

/// Map native events to unified chunks, ending after the first terminal chunk.
///
/// An upstream error or a stream that ends without `message_stop` becomes a
/// terminal chunk carrying `error`.
fn chunk_stream(model: String, events: EventPayloadStream) -> ChunkStream {
    let state = Some((events, ConversationalStreamState::default()));

    Box::pin(stream::unfold(state, move |state| {
        let model = model.clone();
        async move {
            let (mut events, mut parser) = state?;
            loop {
                match events.next().await {
                    Some(Ok(event)) => {
                        if let Some(chunk) = parser.apply(&model, &event) {
                            let next = if chunk.done {
                                None
                            } else {
                                Some((events, parser))
                            };
                            return Some((chunk, next));
                        }
                    }
                    Some(Err(e)) => {
                        return Some((UnifiedChunk::failed(&model, e.to_string()), None));
                    }
                    None => {
                        return Some((
                            UnifiedChunk::failed(&model, "Upstream stream ended before message_stop"),
                            None,
                        ));
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenerationOptions;
    use crate::upstream::fake::FakeBedrock;
    use crate::upstream::UpstreamError;

    const MODEL: &str = "anthropic.claude-3-5-sonnet-20240620-v1:0";

    fn claude_events() -> Vec<UpstreamResult<Value>> {
        vec![
            Ok(json!({"type": "message_start", "message": {"usage": {"input_tokens": 3, "output_tokens": 1}}})),
            Ok(json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}})),
            Ok(json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": "Hel"}})),
            Ok(json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": "lo!"}})),
            Ok(json!({"type": "content_block_stop", "index": 0})),
            Ok(json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 2}})),
            Ok(json!({"type": "message_stop"})),
        ]
    }

    #[test]
    fn test_build_request() {
        let request = GenerationRequest::new(MODEL, "Hi", false).with_options(GenerationOptions {
            temperature: 0.2,
            max_tokens: 50,
            top_p: 0.5,
        });
        let body = ConversationalBlockAdapter.build_request(&request);

        assert_eq!(body["anthropic_version"], "bedrock-2023-05-31");
        assert_eq!(body["max_tokens"], 50);
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["top_p"], 0.5);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Hi");
    }

    #[tokio::test]
    async fn test_non_streaming_invoke() {
        let fake = FakeBedrock::new().with_invoke(json!({
            "content": [{"type": "text", "text": "Hello!"}],
            "usage": {"input_tokens": 1, "output_tokens": 2},
            "stop_reason": "end_turn"
        }));
        let request = GenerationRequest::new(MODEL, "Hi", false);

        let Generation::Chunk(chunk) = ConversationalBlockAdapter
            .invoke(&fake, &request)
            .await
            .unwrap()
        else {
            panic!("expected single chunk");
        };
        assert_eq!(chunk.response, "Hello!");
        assert!(chunk.done);
        assert_eq!(fake.calls()[0].0, "invoke");
        assert_eq!(fake.calls()[0].1, MODEL);
    }

    #[tokio::test]
    async fn test_streaming_invoke() {
        let fake = FakeBedrock::new().with_stream(claude_events());
        let request = GenerationRequest::new(MODEL, "Hi", true);

        let generation = ConversationalBlockAdapter
            .invoke(&fake, &request)
            .await
            .unwrap();
        assert!(generation.is_stream());
        let chunks: Vec<_> = generation.into_stream().collect().await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].response, "Hel");
        assert_eq!(chunks[1].response, "lo!");
        assert!(chunks[..2].iter().all(|c| !c.done));
        let last = &chunks[2];
        assert!(last.done);
        assert_eq!(last.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(last.usage.as_ref().unwrap()["output_tokens"], 2);
        assert_eq!(fake.calls()[0].0, "invoke_stream");
    }

    #[tokio::test]
    async fn test_nothing_follows_terminal_chunk() {
        let mut events = claude_events();
        events.push(Ok(json!({"type": "content_block_delta", "delta": {"text": "late"}})));
        let fake = FakeBedrock::new().with_stream(events);

        let chunks: Vec<_> = ConversationalBlockAdapter
            .invoke(&fake, &GenerationRequest::new(MODEL, "Hi", true))
            .await
            .unwrap()
            .into_stream()
            .collect()
            .await;

        assert_eq!(chunks.iter().filter(|c| c.done).count(), 1);
        assert!(chunks.last().unwrap().done);
        assert!(chunks.iter().all(|c| c.response != "late"));
    }

    #[tokio::test]
    async fn test_mid_stream_error_is_terminal() {
        let fake = FakeBedrock::new().with_stream(vec![
            Ok(json!({"type": "content_block_delta", "delta": {"text": "par"}})),
            Err(UpstreamError::from_code("ThrottlingException", "Too many tokens")),
            Ok(json!({"type": "message_stop"})),
        ]);

        let chunks: Vec<_> = ConversationalBlockAdapter
            .invoke(&fake, &GenerationRequest::new(MODEL, "Hi", true))
            .await
            .unwrap()
            .into_stream()
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].done);
        assert!(chunks[1].error.as_deref().unwrap().contains("Too many tokens"));
    }

    #[tokio::test]
    async fn test_truncated_stream_is_closed_with_error() {
        let fake = FakeBedrock::new().with_stream(vec![Ok(
            json!({"type": "content_block_delta", "delta": {"text": "half"}}),
        )]);

        let chunks: Vec<_> = ConversationalBlockAdapter
            .invoke(&fake, &GenerationRequest::new(MODEL, "Hi", true))
            .await
            .unwrap()
            .into_stream()
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].done);
        assert!(chunks[1].error.is_some());
    }

    #[tokio::test]
    async fn test_error_before_output_is_returned() {
        let fake = FakeBedrock::failing(UpstreamError::from_code(
            "AccessDeniedException",
            "denied",
        ));
        let result = ConversationalBlockAdapter
            .invoke(&fake, &GenerationRequest::new(MODEL, "Hi", true))
            .await;
        assert!(result.is_err());
    }
}
