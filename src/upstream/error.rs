//! Upstream error types
//!
//! Bedrock reports failures as an HTTP status plus a JSON body shaped like
//! `{ "message": "...", "__type": "..." }` and an `x-amzn-errortype` header.
//! Streaming invocations can also fail mid-stream with exception frames.
//! Everything is folded into one [`UpstreamError`] carrying a structured kind.

use reqwest::header::HeaderMap;
use serde_json::Value;

/// Structured classification of an upstream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    /// Credentials were accepted but the caller may not use the resource
    AccessDenied,
    /// The request was rejected as malformed or for an unknown/invalid model
    Validation,
    /// Credentials are absent, malformed or not recognized
    Unauthenticated,
    /// Rate limiting or quota exhaustion
    Throttled,
    /// Resource does not exist
    NotFound,
    /// Service-side failure (5xx, model not ready, model timeout)
    Service,
    /// Connection, timeout or body transfer failure
    Transport,
    /// Response could not be decoded
    Decode,
    /// Nothing structured was available
    Unclassified,
}

impl UpstreamErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamErrorKind::AccessDenied => "access_denied",
            UpstreamErrorKind::Validation => "validation",
            UpstreamErrorKind::Unauthenticated => "unauthenticated",
            UpstreamErrorKind::Throttled => "throttled",
            UpstreamErrorKind::NotFound => "not_found",
            UpstreamErrorKind::Service => "service",
            UpstreamErrorKind::Transport => "transport",
            UpstreamErrorKind::Decode => "decode",
            UpstreamErrorKind::Unclassified => "unclassified",
        }
    }

    /// Map an AWS error code such as `AccessDeniedException` to a kind
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim().trim_end_matches("Exception").to_ascii_lowercase();
        let kind = match code.as_str() {
            "accessdenied" => UpstreamErrorKind::AccessDenied,
            "validation" => UpstreamErrorKind::Validation,
            "unrecognizedclient"
            | "invalidsignature"
            | "missingauthenticationtoken"
            | "incompletesignature"
            | "expiredtoken"
            | "invalidaccesskeyid"
            | "invalidclienttokenid" => UpstreamErrorKind::Unauthenticated,
            "throttling" | "servicequotaexceeded" | "toomanyrequests" => {
                UpstreamErrorKind::Throttled
            }
            "resourcenotfound" => UpstreamErrorKind::NotFound,
            "internalserver" | "serviceunavailable" | "modelnotready" | "modeltimeout"
            | "modelerror" | "modelstreamerror" => UpstreamErrorKind::Service,
            _ => return None,
        };
        Some(kind)
    }

    /// Map an HTTP status to a kind when no error code is available
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 413 | 415 | 422 => UpstreamErrorKind::Validation,
            401 => UpstreamErrorKind::Unauthenticated,
            403 => UpstreamErrorKind::AccessDenied,
            404 => UpstreamErrorKind::NotFound,
            429 => UpstreamErrorKind::Throttled,
            500..=599 => UpstreamErrorKind::Service,
            _ => UpstreamErrorKind::Unclassified,
        }
    }
}

impl std::fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure reported by (or on the way to) the upstream service
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", display_message(.code.as_deref(), .message))]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    /// AWS error code when one was reported (e.g. `AccessDeniedException`)
    pub code: Option<String>,
    pub status: Option<u16>,
    pub message: String,
}

fn display_message(code: Option<&str>, message: &str) -> String {
    match code {
        Some(code) => format!("{} ({})", message, code),
        None => message.to_string(),
    }
}

impl UpstreamError {
    pub fn new(kind: UpstreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            status: None,
            message: message.into(),
        }
    }

    /// Error without any structured information
    pub fn untyped(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Unclassified, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Transport, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Decode, message)
    }

    /// Error built from an AWS error code, kind derived from the code
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::from_code(code).unwrap_or(UpstreamErrorKind::Unclassified),
            code: Some(code.to_string()),
            status: None,
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP response.
    ///
    /// Kind resolution order: `x-amzn-errortype` header, `__type`/`code` body
    /// field, then the status code.
    pub fn from_http(status: u16, headers: &HeaderMap, body_text: &str) -> Self {
        let body = serde_json::from_str::<Value>(body_text).ok();

        let code = header_error_type(headers).or_else(|| body.as_ref().and_then(body_error_type));
        let message = body
            .as_ref()
            .and_then(body_message)
            .unwrap_or_else(|| {
                let trimmed = body_text.trim();
                if trimmed.is_empty() {
                    format!("HTTP {}", status)
                } else {
                    trimmed.chars().take(500).collect()
                }
            });

        let kind = code
            .as_deref()
            .and_then(UpstreamErrorKind::from_code)
            .unwrap_or_else(|| UpstreamErrorKind::from_status(status));

        Self {
            kind,
            code,
            status: Some(status),
            message,
        }
    }

    /// Convert a reqwest failure
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::transport(format!("Request timeout: {}", err))
        } else if err.is_connect() {
            Self::transport(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            Self::decode(format!("Failed to decode response: {}", err))
        } else {
            Self::transport(format!("Request error: {}", err))
        }
    }
}

/// `x-amzn-errortype: AccessDeniedException:http://internal.amazon.com/...`
fn header_error_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-amzn-errortype")
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.split(':').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn body_error_type(body: &Value) -> Option<String> {
    body.get("__type")
        .or_else(|| body.get("code"))
        .and_then(|v| v.as_str())
        .map(|s| s.rsplit('#').next().unwrap_or(s).trim().to_string())
        .filter(|s| !s.is_empty())
}

fn body_message(body: &Value) -> Option<String> {
    body.get("message")
        .or_else(|| body.get("Message"))
        .or_else(|| body.get("errorMessage"))
        .or_else(|| body.get("error").and_then(|e| e.get("message")))
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Result type alias for upstream operations
pub type UpstreamResult<T> = Result<T, UpstreamError>;

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_from_http_uses_header_error_type() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-amzn-errortype",
            HeaderValue::from_static("AccessDeniedException:http://internal.amazon.com/coral/"),
        );
        let err = UpstreamError::from_http(
            403,
            &headers,
            r#"{"message":"You don't have access to the model with the specified model ID."}"#,
        );

        assert_eq!(err.kind, UpstreamErrorKind::AccessDenied);
        assert_eq!(err.code.as_deref(), Some("AccessDeniedException"));
        assert_eq!(err.status, Some(403));
        assert!(err.message.starts_with("You don't have access"));
    }

    #[test]
    fn test_from_http_uses_body_type() {
        let err = UpstreamError::from_http(
            400,
            &HeaderMap::new(),
            r#"{"__type":"com.amazon.coral.validate#ValidationException","message":"The provided model identifier is invalid."}"#,
        );
        assert_eq!(err.kind, UpstreamErrorKind::Validation);
        assert_eq!(err.code.as_deref(), Some("ValidationException"));
    }

    #[test]
    fn test_from_http_falls_back_to_status() {
        let err = UpstreamError::from_http(429, &HeaderMap::new(), "slow down");
        assert_eq!(err.kind, UpstreamErrorKind::Throttled);
        assert_eq!(err.message, "slow down");

        let err = UpstreamError::from_http(503, &HeaderMap::new(), "");
        assert_eq!(err.kind, UpstreamErrorKind::Service);
        assert_eq!(err.message, "HTTP 503");
    }

    #[test]
    fn test_credential_codes_are_unauthenticated() {
        for code in [
            "UnrecognizedClientException",
            "InvalidSignatureException",
            "MissingAuthenticationTokenException",
            "ExpiredTokenException",
        ] {
            assert_eq!(
                UpstreamErrorKind::from_code(code),
                Some(UpstreamErrorKind::Unauthenticated),
                "{}",
                code
            );
        }
        assert_eq!(UpstreamErrorKind::from_code("SomethingNew"), None);
    }

    #[test]
    fn test_display_includes_code() {
        let err = UpstreamError::from_code("ThrottlingException", "Too many requests");
        assert_eq!(err.to_string(), "Too many requests (ThrottlingException)");
        assert_eq!(err.kind, UpstreamErrorKind::Throttled);
    }
}
