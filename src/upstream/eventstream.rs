//! Decoder for the `application/vnd.amazon.eventstream` framing
//!
//! Streaming invocations return a sequence of binary messages:
//!
//! ```text
//! [total_len u32][headers_len u32][prelude_crc u32][headers][payload][message_crc u32]
//! ```
//!
//! Headers are `[name_len u8][name][type u8][value]`. Frames may be split
//! across network reads, so bytes are buffered until a full message is
//! available. CRCs are not verified; the transport is TLS.

use std::collections::HashMap;

/// Prelude (12 bytes) plus trailing message CRC (4 bytes)
const FRAME_OVERHEAD: usize = 16;
const PRELUDE_LEN: usize = 12;
/// Upper bound on a single message, larger lengths mean a corrupt stream.
const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid event-stream frame length {0}")]
    InvalidLength(usize),
    #[error("malformed event-stream header: {0}")]
    MalformedHeader(String),
    #[error("unsupported event-stream header type {0}")]
    UnsupportedHeaderType(u8),
}

/// Typed header value
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(Vec<u8>),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

/// One decoded message
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub headers: HashMap<String, HeaderValue>,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        match self.headers.get(name) {
            Some(HeaderValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// `:message-type` header (`event`, `exception` or `error`)
    pub fn message_type(&self) -> &str {
        self.header_str(":message-type").unwrap_or("event")
    }

    /// `:event-type` header (e.g. `chunk`)
    pub fn event_type(&self) -> Option<&str> {
        self.header_str(":event-type")
    }
}

/// Incremental frame decoder
#[derive(Debug, Default)]
pub struct Decoder {
    buffer: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and drain every complete message now in the buffer.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Message>, DecodeError> {
        if !chunk.is_empty() {
            self.buffer.extend_from_slice(chunk);
        }

        let mut messages = Vec::new();
        loop {
            if self.buffer.len() < PRELUDE_LEN {
                break;
            }
            let total_len = read_u32(&self.buffer[0..4]) as usize;
            let headers_len = read_u32(&self.buffer[4..8]) as usize;
            if total_len < FRAME_OVERHEAD
                || total_len > MAX_MESSAGE_LEN
                || headers_len > total_len - FRAME_OVERHEAD
            {
                return Err(DecodeError::InvalidLength(total_len));
            }
            if self.buffer.len() < total_len {
                break;
            }

            let frame: Vec<u8> = self.buffer.drain(..total_len).collect();
            let headers_end = PRELUDE_LEN + headers_len;
            let headers = parse_headers(&frame[PRELUDE_LEN..headers_end])?;
            let payload = frame[headers_end..total_len - 4].to_vec();
            messages.push(Message { headers, payload });
        }

        Ok(messages)
    }

    /// Bytes received but not yet forming a complete message
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn take<'a>(input: &mut &'a [u8], len: usize, what: &str) -> Result<&'a [u8], DecodeError> {
    if input.len() < len {
        return Err(DecodeError::MalformedHeader(format!("truncated {}", what)));
    }
    let (head, rest) = input.split_at(len);
    *input = rest;
    Ok(head)
}

fn parse_headers(mut input: &[u8]) -> Result<HashMap<String, HeaderValue>, DecodeError> {
    let mut headers = HashMap::new();

    while !input.is_empty() {
        let name_len = take(&mut input, 1, "name length")?[0] as usize;
        let name = take(&mut input, name_len, "name")?;
        let name = String::from_utf8_lossy(name).to_string();
        let value_type = take(&mut input, 1, "value type")?[0];

        let value = match value_type {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => HeaderValue::Byte(take(&mut input, 1, "byte")?[0] as i8),
            3 => {
                let b = take(&mut input, 2, "short")?;
                HeaderValue::Short(i16::from_be_bytes([b[0], b[1]]))
            }
            4 => {
                let b = take(&mut input, 4, "int")?;
                HeaderValue::Int(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
            5 | 8 => {
                let b = take(&mut input, 8, "long")?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                let v = i64::from_be_bytes(raw);
                if value_type == 5 {
                    HeaderValue::Long(v)
                } else {
                    HeaderValue::Timestamp(v)
                }
            }
            6 | 7 => {
                let b = take(&mut input, 2, "value length")?;
                let len = u16::from_be_bytes([b[0], b[1]]) as usize;
                let raw = take(&mut input, len, "value")?;
                if value_type == 6 {
                    HeaderValue::Bytes(raw.to_vec())
                } else {
                    HeaderValue::String(String::from_utf8_lossy(raw).to_string())
                }
            }
            9 => {
                let b = take(&mut input, 16, "uuid")?;
                let mut raw = [0u8; 16];
                raw.copy_from_slice(b);
                HeaderValue::Uuid(raw)
            }
            other => return Err(DecodeError::UnsupportedHeaderType(other)),
        };

        headers.insert(name, value);
    }

    Ok(headers)
}

/// Encode a message with string headers. CRC fields are zeroed.
#[cfg(test)]
pub(crate) fn encode_message(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_bytes = Vec::new();
    for (name, value) in headers {
        header_bytes.push(name.len() as u8);
        header_bytes.extend_from_slice(name.as_bytes());
        header_bytes.push(7);
        header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_bytes.extend_from_slice(value.as_bytes());
    }

    let total_len = FRAME_OVERHEAD + header_bytes.len() + payload.len();
    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&(total_len as u32).to_be_bytes());
    out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(payload);
    out.extend_from_slice(&[0; 4]);
    out
}

/// Encode a Bedrock `chunk` event wrapping `event` as base64 JSON bytes.
#[cfg(test)]
pub(crate) fn encode_chunk_event(event: &serde_json::Value) -> Vec<u8> {
    use base64::Engine;

    let bytes = base64::engine::general_purpose::STANDARD.encode(event.to_string());
    let payload = serde_json::json!({ "bytes": bytes }).to_string();
    encode_message(
        &[
            (":message-type", "event"),
            (":event-type", "chunk"),
            (":content-type", "application/json"),
        ],
        payload.as_bytes(),
    )
}
