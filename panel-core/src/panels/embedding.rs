use crate::config::Config;
use crate::credential::ApiKey;
use crate::error::{CoreResult, PanelError};
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{EmbedRequest, EmbedResponse, Embedding};
use crate::normalizer::clean_text;

const ENDPOINT: &str = "embedding";

#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    http: HttpClient,
    url: String,
    model: String,
    api_key: Option<ApiKey>,
}

impl EmbeddingClient {
    pub fn new(http: HttpClient, url: impl Into<String>, model: impl Into<String>, api_key: Option<ApiKey>) -> Self {
        Self {
            http,
            url: url.into(),
            model: model.into(),
            api_key,
        }
    }

    pub fn from_config(http: HttpClient, cfg: &Config, api_key: Option<ApiKey>) -> Self {
        Self::new(http, &cfg.endpoints.embedding_url, &cfg.embedding.model, api_key)
    }

    /// Embed one text. Returns the first vector of the response.
    pub async fn embed(&self, text: &str) -> CoreResult<Embedding> {
        if text.trim().is_empty() {
            return Err(PanelError::EmptyInput { field: "text" });
        }
        let body = EmbedRequest {
            model: self.model.clone(),
            input: clean_text(text),
        };
        let bearer = self.api_key.as_ref().map(ApiKey::bearer);
        let mut hdrs: Vec<(&str, &str)> = Vec::new();
        if let Some(b) = &bearer {
            hdrs.push(("Authorization", b.as_str()));
        }

        let (resp, _request_id, latency_ms) = self
            .http
            .post_json::<_, EmbedResponse>(&self.url, &body, &hdrs, &RequestCtx::endpoint(ENDPOINT))
            .await?;

        let vector = resp
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| PanelError::Upstream {
                endpoint: ENDPOINT.into(),
                code: "200".into(),
                message: "response has no embedding".into(),
            })?;
        tracing::debug!(dims = vector.len(), latency_ms, "embedding received");
        Ok(Embedding { vector })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    fn client(server: &MockServer, key: Option<&str>) -> EmbeddingClient {
        EmbeddingClient::new(
            HttpClient::new_default().unwrap(),
            format!("{}/v1/embeddings", server.base_url()),
            "embeddings",
            key.and_then(ApiKey::parse),
        )
    }

    #[tokio::test]
    async fn returns_first_vector() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/embeddings")
                .header("authorization", "Bearer k1")
                .json_body(json!({"model": "embeddings", "input": "hello"}));
            then.status(200).json_body(json!({
                "data": [{"embedding": [0.5, -0.25, 1.0]}, {"embedding": [9.0]}]
            }));
        });
        let emb = client(&server, Some("k1")).embed(" hello ").await.unwrap();
        assert_eq!(emb.vector, vec![0.5, -0.25, 1.0]);
        assert_eq!(emb.dims(), 3);
        m.assert();
    }

    #[tokio::test]
    async fn missing_vector_is_upstream_error() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(200).json_body(json!({"data": []}));
        });
        let err = client(&server, None).embed("x").await.unwrap_err();
        assert!(matches!(err, PanelError::Upstream { .. }));
    }

    #[tokio::test]
    async fn blank_text_rejected() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST);
            then.status(200);
        });
        let err = client(&server, None).embed("  ").await.unwrap_err();
        assert!(matches!(err, PanelError::EmptyInput { field: "text" }));
        m.assert_hits(0);
    }
}
