use dirs::data_dir;
use std::{fs, path::PathBuf};

const APP_DIR: &str = "BedrockRelay";
const CONFIG_ENV: &str = "BEDROCK_RELAY_CONFIG";

#[derive(serde::Serialize, serde::Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    /// AWS region hosting the Bedrock endpoints
    pub region: String,
    /// Bedrock API key, sent as a bearer token. An `access:secret` pair is
    /// treated as IAM access keys instead.
    pub api_key: Option<String>,
    /// IAM access key id; requests are SigV4-signed when set with the secret
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Override for `https://bedrock-runtime.{region}.amazonaws.com`
    pub runtime_endpoint: Option<String>,
    /// Override for `https://bedrock.{region}.amazonaws.com`
    pub control_endpoint: Option<String>,
    /// Address the HTTP surface listens on
    pub bind_addr: String,
    /// Timeout for single-shot calls and the model listing
    pub request_timeout_secs: u64,
    /// Timeout for a whole streaming invocation
    pub stream_timeout_secs: u64,
    /// Proxy configuration for upstream requests
    pub proxy: Option<ProxyConfig>,
    /// SQLite file holding the log records
    pub log_db_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            api_key: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            runtime_endpoint: None,
            control_endpoint: None,
            bind_addr: "127.0.0.1:8000".to_string(),
            request_timeout_secs: 120,
            stream_timeout_secs: 300,
            proxy: None,
            log_db_path: None,
        }
    }
}

/// Proxy configuration
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ProxyConfig {
    /// Enable proxy for upstream requests
    pub enabled: bool,

    /// Proxy type: "system", "custom", or "none"
    #[serde(rename = "type")]
    pub proxy_type: String,

    /// Custom proxy URL (e.g., "http://127.0.0.1:8080")
    /// Only used when proxy_type is "custom"
    pub url: Option<String>,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Hosts/patterns to bypass the proxy (e.g., ["localhost", "127.0.0.1"])
    pub bypass: Option<Vec<String>>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            proxy_type: "system".to_string(),
            url: None,
            username: None,
            password: None,
            bypass: None,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

impl Settings {
    pub fn runtime_base_url(&self) -> String {
        non_empty(self.runtime_endpoint.as_deref())
            .unwrap_or_else(|| format!("https://bedrock-runtime.{}.amazonaws.com", self.region))
    }

    pub fn control_base_url(&self) -> String {
        non_empty(self.control_endpoint.as_deref())
            .unwrap_or_else(|| format!("https://bedrock.{}.amazonaws.com", self.region))
    }

    pub fn log_db_path(&self) -> PathBuf {
        match non_empty(self.log_db_path.as_deref()) {
            Some(path) => PathBuf::from(path),
            None => app_dir().join("relay.db"),
        }
    }

    /// Whether any credential source is configured at all
    pub fn has_credentials(&self) -> bool {
        non_empty(self.api_key.as_deref()).is_some()
            || (non_empty(self.access_key_id.as_deref()).is_some()
                && non_empty(self.secret_access_key.as_deref()).is_some())
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key).as_deref());

        if let Some(region) = get("AWS_REGION") {
            self.region = region;
        }
        if let Some(key) = get("AWS_BEDROCK_API_KEY").or_else(|| get("AWS_BEARER_TOKEN_BEDROCK")) {
            self.api_key = Some(key);
        }
        if let Some(id) = get("AWS_ACCESS_KEY_ID") {
            self.access_key_id = Some(id);
        }
        if let Some(secret) = get("AWS_SECRET_ACCESS_KEY") {
            self.secret_access_key = Some(secret);
        }
        if let Some(token) = get("AWS_SESSION_TOKEN") {
            self.session_token = Some(token);
        }
        if let Some(bind) = get("BEDROCK_RELAY_BIND") {
            self.bind_addr = bind;
        }
    }
}

fn app_dir() -> PathBuf {
    let mut p = data_dir().unwrap_or_else(|| PathBuf::from("."));
    p.push(APP_DIR);
    p
}

fn settings_path() -> PathBuf {
    match std::env::var(CONFIG_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => app_dir().join("settings.toml"),
    }
}

/// Parse settings from TOML text; unparsable text yields defaults.
pub fn parse(text: &str) -> Settings {
    toml::from_str(text).unwrap_or_else(|e| {
        eprintln!("Failed to parse config: {}", e);
        Settings::default()
    })
}

/// Load settings from disk and apply environment overrides.
pub fn load() -> Settings {
    let p = settings_path();
    eprintln!("Loading config from: {:?}", p);
    let mut cfg = if p.exists() {
        let s = fs::read_to_string(&p).unwrap_or_default();
        parse(&s)
    } else {
        eprintln!("Config file does not exist, using default");
        Settings::default()
    };

    cfg.apply_env_overrides(|key| std::env::var(key).ok());
    cfg
}
