use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use http::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Serialize, de::DeserializeOwned};

use crate::config::HttpCfg;
use crate::error::{CoreResult, PanelError};

/// Request context: the endpoint label used in errors and an optional request id.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub endpoint: Option<&'a str>,
    pub request_id: Option<&'a str>,
}

impl<'a> RequestCtx<'a> {
    pub fn endpoint(endpoint: &'a str) -> Self {
        Self {
            endpoint: Some(endpoint),
            request_id: None,
        }
    }

    fn label(&self) -> &'a str {
        self.endpoint.unwrap_or("http")
    }
}

/// Raw response body chunks, in arrival order.
pub type ByteStream = BoxStream<'static, CoreResult<Bytes>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
    request_timeout: Duration,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::new(&HttpCfg::default())
    }

    /// The client itself carries no total timeout; it is applied per request so
    /// that streamed bodies are not cut off mid-generation.
    pub fn new(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| PanelError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("llm-panel/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
        })
    }

    fn request<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> RequestBuilder {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header(USER_AGENT, &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }
        req
    }

    async fn send(&self, req: RequestBuilder, ctx: &RequestCtx<'_>) -> CoreResult<reqwest::Response> {
        let resp = req.send().await.map_err(|e| {
            tracing::warn!(endpoint = ctx.label(), error = %e, "request failed");
            PanelError::Unavailable {
                endpoint: ctx.label().into(),
            }
        })?;
        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let ra = parse_retry_after(&headers);
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!(endpoint = ctx.label(), status = status.as_u16(), "non-success status");
            return Err(map_http_error(ctx.label(), status, ra, &text));
        }
        Ok(resp)
    }

    /// POST JSON and decode a JSON response. Returns (body, server request id, latency ms).
    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(R, Option<String>, u32)> {
        let start = Instant::now();
        let req = self
            .request(url, body, headers, ctx)
            .timeout(self.request_timeout);
        tracing::debug!(endpoint = ctx.label(), url, "POST json");
        let resp = self.send(req, ctx).await?;

        let latency = start.elapsed().as_millis() as u32;
        let status = resp.status();
        let request_id = extract_request_id(resp.headers());

        let parsed = resp.json::<R>().await.map_err(|e| PanelError::Upstream {
            endpoint: ctx.label().into(),
            code: status.as_u16().to_string(),
            message: format!("json decode error: {e}"),
        })?;
        Ok((parsed, request_id, latency))
    }

    /// POST JSON and return the raw response body as a chunk stream.
    /// Chunks are passed through untouched; decoding is the caller's concern.
    pub async fn post_stream<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<ByteStream> {
        let req = self
            .request(url, body, headers, ctx)
            .header(ACCEPT, "text/event-stream");
        tracing::debug!(endpoint = ctx.label(), url, "POST stream");
        let resp = self.send(req, ctx).await?;

        let endpoint = ctx.label().to_string();
        let stream = resp.bytes_stream().map(move |item| {
            item.map_err(|e| {
                tracing::warn!(endpoint = %endpoint, error = %e, "stream body failed");
                PanelError::Unavailable {
                    endpoint: endpoint.clone(),
                }
            })
        });
        Ok(stream.boxed())
    }

    /// POST JSON and return the whole body as bytes plus its content type.
    pub async fn post_bytes<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(Bytes, Option<String>)> {
        let req = self
            .request(url, body, headers, ctx)
            .timeout(self.request_timeout);
        tracing::debug!(endpoint = ctx.label(), url, "POST bytes");
        let resp = self.send(req, ctx).await?;
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.bytes().await.map_err(|_| PanelError::Unavailable {
            endpoint: ctx.label().into(),
        })?;
        Ok((bytes, content_type))
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 3] = ["x-request-id", "request-id", "x-amzn-requestid"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // HTTP-date forms are ignored.
    None
}

fn map_http_error(endpoint: &str, status: StatusCode, retry_after: Option<u64>, body: &str) -> PanelError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => PanelError::RateLimited {
            endpoint: endpoint.to_string(),
            retry_after,
        },
        s if s.is_server_error() => PanelError::Unavailable {
            endpoint: endpoint.to_string(),
        },
        s => PanelError::Upstream {
            endpoint: endpoint.to_string(),
            code: s.as_u16().to_string(),
            message: truncate(body, 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut t = s[..end].to_string();
    t.push_str("...");
    t
}
