//! Request authentication
//!
//! Bedrock accepts either an API key sent as a bearer token or IAM access
//! keys with SigV4-signed requests.

use std::time::SystemTime;

use aws_credential_types::Credentials as AwsCredentials;
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::error::{UpstreamError, UpstreamResult};
use crate::config::Settings;
use crate::error::{RelayError, RelayResult};

/// SigV4 signing name shared by the runtime and control planes
const SIGNING_NAME: &str = "bedrock";

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    ApiKey(String),
    AccessKey {
        access_key_id: String,
        secret_access_key: String,
        session_token: Option<String>,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::ApiKey(_) => f.write_str("ApiKey(..)"),
            Credentials::AccessKey { access_key_id, .. } => f
                .debug_struct("AccessKey")
                .field("access_key_id", access_key_id)
                .finish_non_exhaustive(),
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(String::from)
}

impl Credentials {
    /// Resolve credentials from settings.
    ///
    /// An explicit access key pair wins. An API key of the form
    /// `access:secret` is split into a pair, and an API key alongside a
    /// configured secret is used as the access key id. Anything else is a
    /// bearer key.
    pub fn from_settings(settings: &Settings) -> RelayResult<Self> {
        let api_key = non_empty(settings.api_key.as_ref());
        let access_key_id = non_empty(settings.access_key_id.as_ref());
        let secret = non_empty(settings.secret_access_key.as_ref());
        let session_token = non_empty(settings.session_token.as_ref());

        let pair = match (access_key_id, secret, api_key.as_deref()) {
            (Some(id), Some(secret), _) => Some((id, secret)),
            (_, _, Some(key)) if key.contains(':') => key
                .split_once(':')
                .map(|(id, secret)| (id.trim().to_string(), secret.trim().to_string()))
                .filter(|(id, secret)| !id.is_empty() && !secret.is_empty()),
            (_, Some(secret), Some(key)) => Some((key.to_string(), secret)),
            _ => None,
        };

        if let Some((access_key_id, secret_access_key)) = pair {
            return Ok(Credentials::AccessKey {
                access_key_id,
                secret_access_key,
                session_token,
            });
        }

        match api_key {
            Some(key) if key.contains(':') => Err(RelayError::Configuration(
                "AWS Bedrock API key looks like an access:secret pair but one half is empty"
                    .to_string(),
            )),
            Some(key) if HeaderValue::from_str(&format!("Bearer {}", key)).is_err() => {
                Err(RelayError::Configuration(
                    "AWS Bedrock API key contains characters not allowed in a header".to_string(),
                ))
            }
            Some(key) => Ok(Credentials::ApiKey(key)),
            None => Err(RelayError::Configuration(
                "AWS Bedrock API key not found in environment variables".to_string(),
            )),
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Credentials::AccessKey { .. })
    }

    /// Add the authentication headers for one request to `headers`.
    ///
    /// `headers` must already hold every other header that will be sent, and
    /// `body` must be the exact payload.
    pub fn authorize(
        &self,
        method: &str,
        url: &str,
        region: &str,
        headers: &mut HeaderMap,
        body: &[u8],
    ) -> UpstreamResult<()> {
        match self {
            Credentials::ApiKey(key) => {
                let value = HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(|e| UpstreamError::untyped(format!("Invalid API key header: {}", e)))?;
                headers.insert("authorization", value);
                Ok(())
            }
            Credentials::AccessKey {
                access_key_id,
                secret_access_key,
                session_token,
            } => sign_v4(
                access_key_id,
                secret_access_key,
                session_token.clone(),
                method,
                url,
                region,
                headers,
                body,
            ),
        }
    }
}

fn signing_error(e: impl std::fmt::Display) -> UpstreamError {
    UpstreamError::untyped(format!("Failed to sign request: {}", e))
}

#[allow(clippy::too_many_arguments)]
fn sign_v4(
    access_key_id: &str,
    secret_access_key: &str,
    session_token: Option<String>,
    method: &str,
    url: &str,
    region: &str,
    headers: &mut HeaderMap,
    body: &[u8],
) -> UpstreamResult<()> {
    let identity = AwsCredentials::new(
        access_key_id,
        secret_access_key,
        session_token,
        None,
        "bedrock-relay",
    )
    .into();
    let params = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name(SIGNING_NAME)
        .time(SystemTime::now())
        .settings(SigningSettings::default())
        .build()
        .map_err(signing_error)?
        .into();

    let signable_headers: Vec<(&str, &str)> = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect();
    let request = SignableRequest::new(
        method,
        url,
        signable_headers.into_iter(),
        SignableBody::Bytes(body),
    )
    .map_err(signing_error)?;

    let (instructions, _signature) = sign(request, &params).map_err(signing_error)?.into_parts();

    for (name, value) in instructions.headers() {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(signing_error)?;
        let value = HeaderValue::from_str(value).map_err(signing_error)?;
        headers.insert(name, value);
    }
    Ok(())
}
