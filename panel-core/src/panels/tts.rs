use crate::config::Config;
use crate::error::{CoreResult, PanelError};
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{Audio, TtsRequest};

const ENDPOINT: &str = "tts";

#[derive(Debug, Clone)]
pub struct TtsClient {
    http: HttpClient,
    url: String,
}

impl TtsClient {
    pub fn new(http: HttpClient, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    pub fn from_config(http: HttpClient, cfg: &Config) -> Self {
        Self::new(http, cfg.endpoints.tts())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn synthesize(&self, text: &str) -> CoreResult<Audio> {
        if text.trim().is_empty() {
            return Err(PanelError::EmptyInput { field: "text" });
        }
        let body = TtsRequest {
            text: text.to_string(),
        };
        let (bytes, content_type) = self
            .http
            .post_bytes(&self.url, &body, &[], &RequestCtx::endpoint(ENDPOINT))
            .await?;
        tracing::debug!(len = bytes.len(), ?content_type, "audio received");
        Ok(Audio {
            content_type,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    #[tokio::test]
    async fn returns_audio_bytes() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/tts")
                .json_body(json!({"text": "ni hao"}));
            then.status(200)
                .header("content-type", "audio/wav")
                .body(b"RIFF\x00\x01");
        });
        let tts = TtsClient::new(HttpClient::new_default().unwrap(), format!("{}/tts", server.base_url()));
        let audio = tts.synthesize("ni hao").await.unwrap();
        assert_eq!(audio.content_type.as_deref(), Some("audio/wav"));
        assert_eq!(&audio.bytes[..], b"RIFF\x00\x01");
        m.assert();
    }

    #[test]
    fn url_derived_from_vllm_base() {
        let mut cfg = Config::default();
        cfg.endpoints.vllm_base_url = "http://gpu:8000/v1/".into();
        let tts = TtsClient::from_config(HttpClient::new_default().unwrap(), &cfg);
        assert_eq!(tts.url(), "http://gpu:8000/tts");
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/tts");
            then.status(502);
        });
        let tts = TtsClient::new(HttpClient::new_default().unwrap(), format!("{}/tts", server.base_url()));
        let err = tts.synthesize("x").await.unwrap_err();
        assert!(matches!(err, PanelError::Unavailable { ref endpoint } if endpoint == "tts"));
    }

    #[tokio::test]
    async fn blank_text_rejected() {
        let tts = TtsClient::new(HttpClient::new_default().unwrap(), "http://127.0.0.1:9/tts");
        let err = tts.synthesize("\n\t").await.unwrap_err();
        assert!(matches!(err, PanelError::EmptyInput { .. }));
    }
}
