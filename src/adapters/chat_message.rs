//! Chat-message adapter (Meta Llama through the converse API)

use serde_json::{json, Value};

use super::{emulate_stream, ProviderAdapterImpl};
use crate::normalize;
use crate::types::{Generation, GenerationRequest, UnifiedChunk};
use crate::upstream::{BedrockApi, UpstreamResult};

pub struct ChatMessageAdapter;

impl ProviderAdapterImpl for ChatMessageAdapter {
    fn name(&self) -> &'static str {
        "chat-message"
    }

    fn supports_incremental_streaming(&self) -> bool {
        false
    }

    fn build_request(&self, request: &GenerationRequest) -> Value {
        json!({
            "messages": [
                {"role": "user", "content": [{"text": request.prompt}]}
            ],
            "inferenceConfig": {
                "maxTokens": request.options.max_tokens,
                "temperature": request.options.temperature,
                "topP": request.options.top_p
            }
        })
    }

    fn parse(&self, model_id: &str, response: &Value) -> UnifiedChunk {
        normalize::chat_message_response(model_id, response)
    }

    async fn invoke<C: BedrockApi>(
        &self,
        client: &C,
        request: &GenerationRequest,
    ) -> UpstreamResult<Generation> {
        let body = self.build_request(request);
        let response = client.converse(&request.model_id, &body).await?;
        Ok(emulate_stream(request, self.parse(&request.model_id, &response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    use crate::upstream::fake::FakeBedrock;
    use crate::upstream::{UpstreamError, UpstreamErrorKind};

    const MODEL: &str = "meta.llama3-8b-instruct-v1:0";

    fn converse_body(text: &str) -> Value {
        json!({
            "output": {"message": {"role": "assistant", "content": [{"text": text}]}},
            "usage": {"inputTokens": 7, "outputTokens": 1, "totalTokens": 8},
            "stopReason": "end_turn"
        })
    }

    #[test]
    fn test_build_request() {
        let body = ChatMessageAdapter.build_request(&GenerationRequest::new(MODEL, "Capital?", true));
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["text"], "Capital?");
        assert_eq!(body["inferenceConfig"]["maxTokens"], 1000);
        assert_eq!(body["inferenceConfig"]["topP"], 0.9);
    }

    #[tokio::test]
    async fn test_stream_is_one_element_sequence() {
        let fake = FakeBedrock::new().with_converse(converse_body("Paris"));

        let generation = ChatMessageAdapter
            .invoke(&fake, &GenerationRequest::new(MODEL, "Capital of France?", true))
            .await
            .unwrap();
        assert!(generation.is_stream());

        let chunks: Vec<_> = generation.into_stream().collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].response, "Paris");
        assert!(chunks[0].done);
        assert_eq!(chunks[0].stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(fake.calls()[0].0, "converse");
    }

    #[tokio::test]
    async fn test_non_stream_matches_streamed_text() {
        let fake = FakeBedrock::new().with_converse(converse_body("Paris"));

        let generation = ChatMessageAdapter
            .invoke(&fake, &GenerationRequest::new(MODEL, "Capital of France?", false))
            .await
            .unwrap();
        assert!(!generation.is_stream());
        let Generation::Chunk(single) = generation else {
            panic!("expected a single chunk");
        };
        assert!(single.done);

        let streamed: String = ChatMessageAdapter
            .invoke(&fake, &GenerationRequest::new(MODEL, "Capital of France?", true))
            .await
            .unwrap()
            .into_stream()
            .map(|c| c.response)
            .collect::<Vec<_>>()
            .await
            .concat();
        assert_eq!(single.response, streamed);
        assert_eq!(single.response, "Paris");
    }

    #[tokio::test]
    async fn test_upstream_error_propagates() {
        let fake = FakeBedrock::failing(UpstreamError::from_code(
            "ValidationException",
            "invalid model",
        ));
        let err = ChatMessageAdapter
            .invoke(&fake, &GenerationRequest::new(MODEL, "Hi", true))
            .await
            .unwrap_err();
        assert_eq!(err.kind, UpstreamErrorKind::Validation);
    }
}
