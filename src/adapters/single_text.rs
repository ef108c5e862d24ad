//! Single-text adapter (Amazon Titan text models)

use serde_json::{json, Value};

use super::ProviderAdapterImpl;
use crate::normalize;
use crate::types::{Generation, GenerationRequest, UnifiedChunk};
use crate::upstream::{BedrockApi, UpstreamResult};

pub struct SingleTextAdapter;

impl ProviderAdapterImpl for SingleTextAdapter {
    fn name(&self) -> &'static str {
        "single-text"
    }

    fn supports_incremental_streaming(&self) -> bool {
        false
    }

    fn build_request(&self, request: &GenerationRequest) -> Value {
        json!({
            "inputText": request.prompt,
            "textGenerationConfig": {
                "maxTokenCount": request.options.max_tokens,
                "temperature": request.options.temperature,
                "topP": request.options.top_p
            }
        })
    }

    fn parse(&self, model_id: &str, response: &Value) -> UnifiedChunk {
        normalize::single_text_response(model_id, response)
    }

    /// Always one terminal chunk, whatever `stream` says.
    async fn invoke<C: BedrockApi>(
        &self,
        client: &C,
        request: &GenerationRequest,
    ) -> UpstreamResult<Generation> {
        let body = self.build_request(request);
        let response = client.invoke_model(&request.model_id, &body).await?;
        Ok(Generation::Chunk(self.parse(&request.model_id, &response)))
    }
}
