//! HTTP client for the Bedrock runtime and control planes
//!
//! Requests carry either a bearer API key or a SigV4 signature, see
//! [`Credentials`]. No retries are issued here; timeouts and proxies come
//! from the settings.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use base64::Engine;
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, NoProxy, Proxy};
use serde_json::Value;

use super::auth::Credentials;
use super::error::{UpstreamError, UpstreamResult};
use super::eventstream::{Decoder, Message};
use super::{BedrockApi, EventPayloadStream};
use crate::config::{ProxyConfig, Settings};
use crate::error::{RelayError, RelayResult};
use crate::logger;

const EVENTSTREAM_CONTENT_TYPE: &str = "application/vnd.amazon.eventstream";

fn normalize_proxy_url(raw: &str, default_scheme: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("{}://{}", default_scheme, trimmed)
    }
}

fn build_no_proxy(cfg: &ProxyConfig, extra_bypass: Option<&str>) -> Option<NoProxy> {
    let mut entries: Vec<String> = cfg
        .bypass
        .iter()
        .flatten()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if let Some(extra) = extra_bypass {
        entries.extend(
            extra
                .split(&[';', ','][..])
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        );
    }

    if entries.is_empty() {
        None
    } else {
        NoProxy::from_string(&entries.join(","))
    }
}

fn env_var(keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| std::env::var(k).ok())
        .filter(|v| !v.trim().is_empty())
}

fn create_proxies(cfg: &ProxyConfig) -> Vec<Proxy> {
    if !cfg.enabled {
        return Vec::new();
    }

    match cfg.proxy_type.as_str() {
        "none" => Vec::new(),
        "custom" => {
            let Some(url) = cfg.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) else {
                logger::warn(
                    "upstream",
                    "Proxy type is 'custom' but no URL configured, ignoring proxy",
                );
                return Vec::new();
            };
            let Ok(mut proxy) = Proxy::all(normalize_proxy_url(url, "http")) else {
                logger::warn("upstream", "Failed to parse custom proxy URL, ignoring proxy");
                return Vec::new();
            };
            if let (Some(username), Some(password)) = (&cfg.username, &cfg.password) {
                proxy = proxy.basic_auth(username, password);
            }
            if let Some(no_proxy) = build_no_proxy(cfg, None) {
                proxy = proxy.no_proxy(Some(no_proxy));
            }
            logger::debug("upstream", &format!("Using custom proxy: {}", url));
            vec![proxy]
        }
        _ => {
            let http = env_var(&["HTTP_PROXY", "http_proxy"]);
            let https = env_var(&["HTTPS_PROXY", "https_proxy"]);
            let bypass = env_var(&["NO_PROXY", "no_proxy"]);
            let no_proxy = build_no_proxy(cfg, bypass.as_deref());

            let mut proxies = Vec::new();
            if let Some(Ok(proxy)) = http.map(|u| Proxy::http(normalize_proxy_url(&u, "http"))) {
                proxies.push(proxy);
            }
            if let Some(Ok(proxy)) = https.map(|u| Proxy::https(normalize_proxy_url(&u, "http"))) {
                proxies.push(proxy);
            }
            if !proxies.is_empty() {
                logger::debug("upstream", "Using system proxy settings");
            }
            proxies
                .into_iter()
                .map(|proxy| proxy.no_proxy(no_proxy.clone()))
                .collect()
        }
    }
}

/// Create an HTTP client with the configured timeout and proxies
pub fn create_client(timeout_secs: u64, proxy: Option<&ProxyConfig>) -> RelayResult<Client> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10));

    if let Some(proxy_cfg) = proxy {
        let proxies = create_proxies(proxy_cfg);
        if proxies.is_empty() && proxy_cfg.enabled {
            logger::warn(
                "upstream",
                &format!(
                    "Proxy enabled but no proxy could be resolved (type: {}).",
                    proxy_cfg.proxy_type
                ),
            );
        }
        for p in proxies {
            builder = builder.proxy(p);
        }
    }

    builder
        .build()
        .map_err(|e| RelayError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

/// Bedrock client bound to one region and one set of credentials
#[derive(Clone)]
pub struct BedrockClient {
    http: Client,
    streaming_http: Client,
    runtime_endpoint: String,
    control_endpoint: String,
    region: String,
    credentials: Credentials,
}

impl std::fmt::Debug for BedrockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BedrockClient")
            .field("runtime_endpoint", &self.runtime_endpoint)
            .field("control_endpoint", &self.control_endpoint)
            .field("region", &self.region)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl BedrockClient {
    /// Build a client from settings.
    ///
    /// Fails with a configuration error when no usable credentials are
    /// configured.
    pub fn from_settings(settings: &Settings) -> RelayResult<Self> {
        let credentials = Credentials::from_settings(settings)?;

        Ok(Self {
            http: create_client(settings.request_timeout_secs, settings.proxy.as_ref())?,
            streaming_http: create_client(settings.stream_timeout_secs, settings.proxy.as_ref())?,
            runtime_endpoint: settings.runtime_base_url(),
            control_endpoint: settings.control_base_url(),
            region: settings.region.clone(),
            credentials,
        })
    }

    /// `{runtime}/model/{encoded id}/{action}`
    pub fn runtime_url(&self, model_id: &str, action: &str) -> String {
        format!(
            "{}/model/{}/{}",
            self.runtime_endpoint.trim_end_matches('/'),
            urlencoding::encode(model_id),
            action
        )
    }

    /// Build an authorized request; `body` is sent as JSON when present.
    fn build_request(
        &self,
        http: &Client,
        method: Method,
        url: &str,
        accept: &'static str,
        body: Option<&Value>,
    ) -> UpstreamResult<reqwest::RequestBuilder> {
        let payload = match body {
            Some(body) => serde_json::to_vec(body)
                .map_err(|e| UpstreamError::untyped(format!("Failed to encode request: {}", e)))?,
            None => Vec::new(),
        };

        let mut headers = HeaderMap::new();
        if body.is_some() {
            headers.insert("content-type", HeaderValue::from_static("application/json"));
        }
        headers.insert("accept", HeaderValue::from_static(accept));
        self.credentials
            .authorize(method.as_str(), url, &self.region, &mut headers, &payload)?;

        let request = http.request(method, url).headers(headers);
        Ok(if body.is_some() {
            request.body(payload)
        } else {
            request
        })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> UpstreamResult<reqwest::Response> {
        let start = Instant::now();
        logger::debug("upstream", &format!("Sending request to: {}", url));

        let response = request.send().await.map_err(|e| {
            logger::error("upstream", &format!("Request failed: url={}, error={}", url, e));
            UpstreamError::from(e)
        })?;

        let status = response.status();
        logger::debug(
            "upstream",
            &format!(
                "Response status: {} ({}ms)",
                status,
                start.elapsed().as_millis()
            ),
        );

        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();
        let err = UpstreamError::from_http(status.as_u16(), &headers, &text);
        logger::warn(
            "upstream",
            &format!(
                "Upstream returned {}: kind={}, message={}",
                status, err.kind, err.message
            ),
        );
        Err(err)
    }

    async fn read_json(response: reqwest::Response) -> UpstreamResult<Value> {
        let text = response.text().await.map_err(UpstreamError::from)?;
        serde_json::from_str::<Value>(&text).map_err(|e| {
            UpstreamError::decode(format!(
                "Failed to parse response JSON: {}, body: {}",
                e,
                text.chars().take(200).collect::<String>()
            ))
        })
    }

    async fn post_json(&self, url: &str, body: &Value) -> UpstreamResult<Value> {
        let request =
            self.build_request(&self.http, Method::POST, url, "application/json", Some(body))?;
        let response = self.send(request, url).await?;
        Self::read_json(response).await
    }
}

impl BedrockApi for BedrockClient {
    async fn invoke_model(&self, model_id: &str, body: &Value) -> UpstreamResult<Value> {
        let url = self.runtime_url(model_id, "invoke");
        self.post_json(&url, body).await
    }

    async fn invoke_model_with_response_stream(
        &self,
        model_id: &str,
        body: &Value,
    ) -> UpstreamResult<EventPayloadStream> {
        let url = self.runtime_url(model_id, "invoke-with-response-stream");
        let request = self.build_request(
            &self.streaming_http,
            Method::POST,
            &url,
            EVENTSTREAM_CONTENT_TYPE,
            Some(body),
        )?;
        let response = self.send(request, &url).await?;
        Ok(decode_event_stream(Box::pin(response.bytes_stream())))
    }

    async fn converse(&self, model_id: &str, body: &Value) -> UpstreamResult<Value> {
        let url = self.runtime_url(model_id, "converse");
        self.post_json(&url, body).await
    }

    async fn list_foundation_models(&self) -> UpstreamResult<Value> {
        let url = format!(
            "{}/foundation-models",
            self.control_endpoint.trim_end_matches('/')
        );
        let request =
            self.build_request(&self.http, Method::GET, &url, "application/json", None)?;
        let response = self.send(request, &url).await?;
        Self::read_json(response).await
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        UpstreamError::from_reqwest(&err)
    }
}

/// Turn one decoded frame into a JSON event; frames that carry no model
/// output (e.g. initial-response) yield `None`.
fn message_to_event(message: &Message) -> Option<UpstreamResult<Value>> {
    match message.message_type() {
        "exception" | "error" => {
            let code = message
                .header_str(":exception-type")
                .or_else(|| message.header_str(":error-code"))
                .unwrap_or("UnknownException");
            let text = serde_json::from_slice::<Value>(&message.payload)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .or_else(|| message.header_str(":error-message").map(String::from))
                .unwrap_or_else(|| String::from_utf8_lossy(&message.payload).to_string());
            Some(Err(UpstreamError::from_code(code, text)))
        }
        _ if message.event_type() == Some("chunk") => Some(decode_chunk_payload(&message.payload)),
        _ => None,
    }
}

fn decode_chunk_payload(payload: &[u8]) -> UpstreamResult<Value> {
    let envelope: Value = serde_json::from_slice(payload)
        .map_err(|e| UpstreamError::decode(format!("Invalid chunk envelope: {}", e)))?;
    let encoded = envelope
        .get("bytes")
        .and_then(|b| b.as_str())
        .ok_or_else(|| UpstreamError::decode("Chunk envelope has no bytes field"))?;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| UpstreamError::decode(format!("Invalid chunk encoding: {}", e)))?;
    serde_json::from_slice(&raw)
        .map_err(|e| UpstreamError::decode(format!("Invalid chunk JSON: {}", e)))
}

struct DecodeState<S> {
    bytes: S,
    decoder: Decoder,
    pending: VecDeque<UpstreamResult<Value>>,
    finished: bool,
}

/// Decode a raw body stream into JSON events.
///
/// The first error ends the stream. Dropping the returned stream drops the
/// body, which closes the upstream connection.
pub fn decode_event_stream<S, B, E>(bytes: S) -> EventPayloadStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<UpstreamError> + Send + 'static,
{
    let state = DecodeState {
        bytes,
        decoder: Decoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                if item.is_err() {
                    st.finished = true;
                    st.pending.clear();
                }
                return Some((item, st));
            }
            if st.finished {
                return None;
            }

            match st.bytes.next().await {
                Some(Ok(chunk)) => match st.decoder.push(chunk.as_ref()) {
                    Ok(messages) => {
                        st.pending
                            .extend(messages.iter().filter_map(message_to_event));
                    }
                    Err(e) => st.pending.push_back(Err(UpstreamError::decode(e.to_string()))),
                },
                Some(Err(e)) => st.pending.push_back(Err(e.into())),
                None => {
                    st.finished = true;
                    if st.decoder.pending() > 0 {
                        st.pending.push_back(Err(UpstreamError::decode(format!(
                            "Stream ended inside a frame ({} bytes left)",
                            st.decoder.pending()
                        ))));
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::eventstream::{encode_chunk_event, encode_message};
    use crate::upstream::UpstreamErrorKind;
    use axum::{
        body::Body,
        extract::Path,
        http::{HeaderMap as AxumHeaders, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;

    async fn spawn_upstream(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    fn settings_for(endpoint: &str) -> Settings {
        Settings {
            api_key: Some("test-key".to_string()),
            runtime_endpoint: Some(endpoint.to_string()),
            control_endpoint: Some(endpoint.to_string()),
            ..Settings::default()
        }
    }

    #[test]
    fn test_missing_api_key_is_configuration_error() {
        let settings = Settings {
            api_key: None,
            ..Settings::default()
        };
        let err = BedrockClient::from_settings(&settings).unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));

        let settings = Settings {
            api_key: Some("   ".to_string()),
            ..Settings::default()
        };
        assert!(BedrockClient::from_settings(&settings).is_err());
    }

    #[test]
    fn test_runtime_url_encodes_model_id() {
        let client = BedrockClient::from_settings(&settings_for("http://localhost:1/")).unwrap();
        assert_eq!(
            client.runtime_url("meta.llama3-8b-instruct-v1:0", "converse"),
            "http://localhost:1/model/meta.llama3-8b-instruct-v1%3A0/converse"
        );
    }

    #[tokio::test]
    async fn test_invoke_sends_bearer_and_body() {
        let app = Router::new().route(
            "/model/:model/invoke",
            post(
                |Path(model): Path<String>, headers: AxumHeaders, Json(body): Json<Value>| async move {
                    Json(json!({
                        "model": model,
                        "auth": headers.get("authorization").and_then(|v| v.to_str().ok()),
                        "echo": body
                    }))
                },
            ),
        );
        let url = spawn_upstream(app).await;
        let client = BedrockClient::from_settings(&settings_for(&url)).unwrap();

        let out = client
            .invoke_model("amazon.titan-text-express-v1", &json!({"inputText": "Hi"}))
            .await
            .unwrap();

        assert_eq!(out["model"], "amazon.titan-text-express-v1");
        assert_eq!(out["auth"], "Bearer test-key");
        assert_eq!(out["echo"]["inputText"], "Hi");
    }

    #[tokio::test]
    async fn test_access_key_requests_are_signed() {
        let app = Router::new().route(
            "/model/:model/converse",
            post(|headers: AxumHeaders, Json(body): Json<Value>| async move {
                let header = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(String::from)
                };
                Json(json!({
                    "auth": header("authorization"),
                    "date": header("x-amz-date"),
                    "echo": body
                }))
            }),
        );
        let url = spawn_upstream(app).await;
        let settings = Settings {
            api_key: Some("AKIDEXAMPLE:wJalrXUtnFEMI".to_string()),
            region: "eu-central-1".to_string(),
            ..settings_for(&url)
        };
        let client = BedrockClient::from_settings(&settings).unwrap();

        let out = client
            .converse("meta.llama3-8b-instruct-v1:0", &json!({"messages": []}))
            .await
            .unwrap();

        let auth = out["auth"].as_str().unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        assert!(auth.contains("/eu-central-1/bedrock/aws4_request"));
        assert!(!auth.contains("wJalrXUtnFEMI"));
        assert!(out["date"].is_string());
        assert_eq!(out["echo"]["messages"], json!([]));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let settings = Settings {
            api_key: Some("AKIDEXAMPLE:wJalrXUtnFEMI".to_string()),
            ..settings_for("http://localhost:1")
        };
        let client = BedrockClient::from_settings(&settings).unwrap();
        let text = format!("{:?}", client);
        assert!(text.contains("AKIDEXAMPLE"));
        assert!(!text.contains("wJalrXUtnFEMI"));
    }

    #[tokio::test]
    async fn test_access_denied_is_classified() {
        let app = Router::new().route(
            "/model/:model/converse",
            post(|| async {
                let mut response = (
                    StatusCode::FORBIDDEN,
                    Json(json!({"message": "You don't have access to the model"})),
                )
                    .into_response();
                response.headers_mut().insert(
                    "x-amzn-errortype",
                    "AccessDeniedException:http://internal.amazon.com/coral/"
                        .parse()
                        .unwrap(),
                );
                response
            }),
        );
        let url = spawn_upstream(app).await;
        let client = BedrockClient::from_settings(&settings_for(&url)).unwrap();

        let err = client
            .converse("meta.llama3-8b-instruct-v1:0", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, UpstreamErrorKind::AccessDenied);
        assert_eq!(err.status, Some(403));
    }

    #[tokio::test]
    async fn test_streaming_invocation_decodes_chunks() {
        let app = Router::new().route(
            "/model/:model/invoke-with-response-stream",
            post(|| async {
                let mut body = encode_chunk_event(&json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": "Hel"}}));
                body.extend(encode_chunk_event(&json!({"type": "message_stop"})));
                Response::builder()
                    .header("content-type", EVENTSTREAM_CONTENT_TYPE)
                    .body(Body::from(body))
                    .unwrap()
            }),
        );
        let url = spawn_upstream(app).await;
        let client = BedrockClient::from_settings(&settings_for(&url)).unwrap();

        let events: Vec<_> = client
            .invoke_model_with_response_stream("anthropic.claude-3-haiku", &json!({}))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap()["delta"]["text"], "Hel");
        assert_eq!(events[1].as_ref().unwrap()["type"], "message_stop");
    }

    #[tokio::test]
    async fn test_list_foundation_models() {
        let app = Router::new().route(
            "/foundation-models",
            get(|| async { Json(json!({"modelSummaries": []})) }),
        );
        let url = spawn_upstream(app).await;
        let client = BedrockClient::from_settings(&settings_for(&url)).unwrap();

        let out = client.list_foundation_models().await.unwrap();
        assert!(out["modelSummaries"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let client = BedrockClient::from_settings(&settings_for(&url)).unwrap();

        let err = client.list_foundation_models().await.unwrap_err();
        assert_eq!(err.kind, UpstreamErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_exception_frame_ends_stream() {
        let mut body = encode_chunk_event(&json!({"type": "message_start"}));
        body.extend(encode_message(
            &[
                (":message-type", "exception"),
                (":exception-type", "modelStreamErrorException"),
            ],
            br#"{"message":"model failed"}"#,
        ));
        body.extend(encode_chunk_event(&json!({"type": "message_stop"})));
        let source = stream::iter(vec![Ok::<_, UpstreamError>(body)]);

        let events: Vec<_> = decode_event_stream(source).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        let err = events[1].as_ref().unwrap_err();
        assert_eq!(err.kind, UpstreamErrorKind::Service);
        assert_eq!(err.message, "model failed");
    }

    #[tokio::test]
    async fn test_truncated_body_reports_decode_error() {
        let frame = encode_chunk_event(&json!({"type": "message_stop"}));
        let source = stream::iter(vec![Ok::<_, UpstreamError>(frame[..10].to_vec())]);

        let events: Vec<_> = decode_event_stream(source).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap_err().kind, UpstreamErrorKind::Decode);
    }

    #[test]
    fn test_non_chunk_events_are_skipped() {
        let frame = encode_message(&[(":event-type", "initial-response")], b"{}");
        let messages = Decoder::new().push(&frame).unwrap();
        assert!(message_to_event(&messages[0]).is_none());
    }
}
