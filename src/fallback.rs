//! Demo reply used when the upstream cannot be reached or refuses the caller

use serde_json::Map;

use crate::types::{count_words, Generation, UnifiedChunk};

pub const DEMO_STOP_REASON: &str = "demo_mode";

const PROMPT_ECHO_CHARS: usize = 100;

/// Reply text: the leading prompt characters, then the demo notice.
pub fn fallback_text(prompt: &str) -> String {
    let mut echo: String = prompt.chars().take(PROMPT_ECHO_CHARS).collect();
    if prompt.chars().nth(PROMPT_ECHO_CHARS).is_some() {
        echo.push_str("...");
    }
    format!(
        "{}\n\n[Demo response] AWS Bedrock is currently unreachable or refused the \
         configured credentials, so this reply was generated locally. Check the \
         Bedrock API key and region configuration.",
        echo
    )
}

/// Build the fallback generation. Never fails.
pub fn fallback(model_id: &str, prompt: &str, stream: bool) -> Generation {
    let text = fallback_text(prompt);

    let mut usage = Map::new();
    usage.insert("input_tokens".to_string(), count_words(prompt).into());
    usage.insert("output_tokens".to_string(), count_words(&text).into());

    let chunk = UnifiedChunk::terminal(model_id, text, usage, Some(DEMO_STOP_REASON.to_string()));
    if stream {
        Generation::single_stream(chunk)
    } else {
        Generation::Chunk(chunk)
    }
}
