//! Stream relay
//!
//! Turns a chunk sequence into `text/event-stream` frames of the form
//! `data: <chunk json>\n\n`, stopping right after the terminal chunk.

use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::json;

use crate::logger;
use crate::types::{ChunkStream, Generation, UnifiedChunk};

/// Pass chunks through up to and including the first `done` chunk.
///
/// The source is dropped as soon as the terminal chunk is seen.
pub fn until_terminal(source: ChunkStream) -> ChunkStream {
    Box::pin(stream::unfold(Some(source), |state| async move {
        let mut source = state?;
        let chunk = source.next().await?;
        let next = if chunk.done { None } else { Some(source) };
        Some((chunk, next))
    }))
}

pub fn frame(chunk: &UnifiedChunk) -> Result<String, serde_json::Error> {
    Ok(format!("data: {}\n\n", serde_json::to_string(chunk)?))
}

pub fn error_frame(message: &str) -> String {
    format!("data: {}\n\n", json!({ "error": message }))
}

/// Frame every chunk; a chunk that cannot be serialized is replaced by an
/// error frame and ends the stream.
pub fn sse_frames(source: ChunkStream) -> impl Stream<Item = String> + Send {
    stream::unfold(Some(until_terminal(source)), |state| async move {
        let mut chunks = state?;
        let chunk = chunks.next().await?;
        match frame(&chunk) {
            Ok(text) => Some((text, Some(chunks))),
            Err(e) => {
                logger::error("relay", &format!("Failed to serialize chunk: {}", e));
                Some((error_frame(&e.to_string()), None))
            }
        }
    })
}

pub fn sse_response(source: ChunkStream) -> Response {
    let body = Body::from_stream(sse_frames(source).map(Ok::<_, std::io::Error>));

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .header("access-control-allow-origin", "*")
        .header("access-control-allow-headers", "Content-Type")
        .body(body)
        .unwrap_or_else(|e| {
            logger::error("relay", &format!("Failed to build stream response: {}", e));
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

/// Fold a sequence into one terminal chunk whose `response` is the
/// concatenated text.
pub async fn collapse(source: ChunkStream) -> Option<UnifiedChunk> {
    let mut chunks = until_terminal(source);
    let mut text = String::new();
    while let Some(chunk) = chunks.next().await {
        text.push_str(&chunk.response);
        if chunk.done {
            return Some(UnifiedChunk {
                response: text,
                ..chunk
            });
        }
    }
    None
}

/// Respond with SSE when streaming was requested, else with one JSON chunk.
pub async fn respond(stream_requested: bool, generation: Generation) -> Response {
    if stream_requested {
        return sse_response(generation.into_stream());
    }

    match generation {
        Generation::Chunk(chunk) => Json(chunk).into_response(),
        Generation::Stream(source) => match collapse(source).await {
            Some(chunk) => Json(chunk).into_response(),
            None => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Unexpected error: generation ended without a final chunk"})),
            )
                .into_response(),
        },
    }
}
