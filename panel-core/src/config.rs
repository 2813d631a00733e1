use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

/// Which OpenAI-compatible backend the chat panel talks to.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    Sdu,
    #[default]
    Vllm,
}

impl std::str::FromStr for ModelSource {
    type Err = crate::error::PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sdu" => Ok(Self::Sdu),
            "vllm" => Ok(Self::Vllm),
            other => Err(crate::error::PanelError::Validation(format!(
                "unknown model source: {other}"
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EndpointsCfg {
    #[serde(default)]
    pub default_source: ModelSource,
    /// Chat base URL including the `/v1` suffix.
    #[serde(default = "default_sdu_base_url")]
    pub sdu_base_url: String,
    #[serde(default = "default_vllm_base_url")]
    pub vllm_base_url: String,
    /// Full embeddings URL (not a base).
    #[serde(default = "default_embedding_url")]
    pub embedding_url: String,
    /// Analysis API gateway base; routes are appended (`/api/code-check`, ...).
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Full TTS URL. When missing it is derived from the vllm base.
    #[serde(default)]
    pub tts_url: Option<String>,
}

impl Default for EndpointsCfg {
    fn default() -> Self {
        Self {
            default_source: ModelSource::default(),
            sdu_base_url: default_sdu_base_url(),
            vllm_base_url: default_vllm_base_url(),
            embedding_url: default_embedding_url(),
            gateway_url: default_gateway_url(),
            tts_url: None,
        }
    }
}

impl EndpointsCfg {
    pub fn chat_base(&self, source: ModelSource) -> &str {
        match source {
            ModelSource::Sdu => &self.sdu_base_url,
            ModelSource::Vllm => &self.vllm_base_url,
        }
    }

    /// TTS endpoint: explicit `tts_url`, else the vllm base with `/v1` stripped plus `/tts`.
    pub fn tts(&self) -> String {
        if let Some(url) = &self.tts_url {
            return url.clone();
        }
        let base = self.vllm_base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        format!("{base}/tts")
    }
}

fn default_sdu_base_url() -> String {
    "http://localhost:3000/v1".into()
}
fn default_vllm_base_url() -> String {
    "http://localhost:8000/v1".into()
}
fn default_embedding_url() -> String {
    "http://localhost:3000/v1/embeddings".into()
}
fn default_gateway_url() -> String {
    "http://localhost:8080".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatCfg {
    #[serde(default = "default_sdu_model")]
    pub sdu_model: String,
    #[serde(default = "default_vllm_model")]
    pub vllm_model: String,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

impl Default for ChatCfg {
    fn default() -> Self {
        Self {
            sdu_model: default_sdu_model(),
            vllm_model: default_vllm_model(),
            stream: default_stream(),
        }
    }
}

impl ChatCfg {
    pub fn model_for(&self, source: ModelSource) -> &str {
        match source {
            ModelSource::Sdu => &self.sdu_model,
            ModelSource::Vllm => &self.vllm_model,
        }
    }
}

fn default_sdu_model() -> String {
    "gpt-3.5-turbo".into()
}
fn default_vllm_model() -> String {
    "qwen2.5-7b-instruct".into()
}
fn default_stream() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EmbeddingCfg {
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

impl Default for EmbeddingCfg {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
        }
    }
}

fn default_embedding_model() -> String {
    "embeddings".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct KeyStoreCfg {
    /// Path of the API key file. None → `$HOME/.llm-panel/api_key`.
    #[serde(default)]
    pub path: Option<String>,
}

impl KeyStoreCfg {
    pub fn resolve_path(&self) -> PathBuf {
        if let Some(p) = &self.path {
            return PathBuf::from(p);
        }
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        home.join(".llm-panel").join("api_key")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds for non-streaming calls (default 60000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub endpoints: EndpointsCfg,
    #[serde(default)]
    pub chat: ChatCfg,
    #[serde(default)]
    pub embedding: EmbeddingCfg,
    #[serde(default)]
    pub key_store: KeyStoreCfg,
    /// HTTP client configuration (timeouts, pooling). Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
}

/// Prefix of the environment variables read by [`Config::with_env_overrides`].
pub const ENV_PREFIX: &str = "LLM_PANEL_";

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::PanelError::from)?;
        let s =
            std::str::from_utf8(&bytes).map_err(|e| crate::error::PanelError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::PanelError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::PanelError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::PanelError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::PanelError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }

    /// Apply `LLM_PANEL_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> crate::error::CoreResult<Self> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides using `lookup` (called with the full variable name).
    pub fn with_overrides_from<F>(mut self, lookup: F) -> crate::error::CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}")).filter(|v| !v.trim().is_empty())
        };
        if let Some(v) = get("SDU_BASE_URL") {
            self.endpoints.sdu_base_url = v;
        }
        if let Some(v) = get("VLLM_BASE_URL") {
            self.endpoints.vllm_base_url = v;
        }
        if let Some(v) = get("EMBEDDING_URL") {
            self.endpoints.embedding_url = v;
        }
        if let Some(v) = get("GATEWAY_URL") {
            self.endpoints.gateway_url = v;
        }
        if let Some(v) = get("TTS_URL") {
            self.endpoints.tts_url = Some(v);
        }
        if let Some(v) = get("DEFAULT_SOURCE") {
            self.endpoints.default_source = v.parse()?;
        }
        if let Some(v) = get("KEY_FILE") {
            self.key_store.path = Some(v);
        }
        Ok(self)
    }
}
