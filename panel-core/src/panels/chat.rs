use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Config, ModelSource};
use crate::credential::ApiKey;
use crate::error::{CoreResult, PanelError};
use crate::http_client::{ByteStream, HttpClient, RequestCtx};
use crate::model::{ChatMessage, ChatRequest, Role};
use crate::normalizer::normalize_chat;
use crate::session::{CancelHandle, Session, SessionEvent, SessionMeta};

const ENDPOINT: &str = "chat";

/// Where chat requests go. The HTTP implementation is [`HttpChatTransport`].
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a streaming request and return the raw body chunks.
    async fn open_stream(&self, req: &ChatRequest) -> CoreResult<ByteStream>;
    /// Send a non-streaming request and return the decoded body.
    async fn complete(&self, req: &ChatRequest) -> CoreResult<serde_json::Value>;
}

/// OpenAI-compatible `/chat/completions` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChatTransport {
    http: HttpClient,
    base_url: String,
    api_key: Option<ApiKey>,
}

impl HttpChatTransport {
    /// `base_url` includes the version segment, e.g. `http://host:8000/v1`.
    pub fn new(http: HttpClient, base_url: impl Into<String>, api_key: Option<ApiKey>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key,
        }
    }

    pub fn from_config(http: HttpClient, cfg: &Config, source: ModelSource, api_key: Option<ApiKey>) -> Self {
        Self::new(http, cfg.endpoints.chat_base(source), api_key)
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn headers(&self) -> Vec<(String, String)> {
        // Content-Type comes with the JSON body
        let mut h = Vec::new();
        if let Some(key) = &self.api_key {
            h.push(("Authorization".to_string(), key.bearer()));
        }
        h
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn open_stream(&self, req: &ChatRequest) -> CoreResult<ByteStream> {
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.http
            .post_stream(&self.url(), req, &hdrs, &RequestCtx::endpoint(ENDPOINT))
            .await
    }

    async fn complete(&self, req: &ChatRequest) -> CoreResult<serde_json::Value> {
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let (body, request_id, latency_ms) = self
            .http
            .post_json::<_, serde_json::Value>(&self.url(), req, &hdrs, &RequestCtx::endpoint(ENDPOINT))
            .await?;
        tracing::debug!(?request_id, latency_ms, "chat completion received");
        Ok(body)
    }
}

/// Starts chat sessions against one transport.
#[derive(Clone)]
pub struct ChatClient {
    transport: Arc<dyn ChatTransport>,
}

impl ChatClient {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self { transport }
    }

    /// Validate, normalize, and start a session. Blank input never reaches the transport.
    /// Must be called from within a tokio runtime.
    pub fn start_session(&self, req: ChatRequest) -> CoreResult<Session> {
        let blank = req
            .messages
            .last()
            .is_none_or(|m| m.content.trim().is_empty());
        if blank {
            return Err(PanelError::EmptyInput { field: "message" });
        }
        let req = normalize_chat(req);
        if req.model.is_empty() {
            return Err(PanelError::Validation("model must not be empty".into()));
        }

        let meta = SessionMeta::new(ENDPOINT, Some(req.model.clone()));
        let transport = self.transport.clone();
        let session = if req.stream {
            Session::streaming(meta, async move { transport.open_stream(&req).await })
        } else {
            Session::complete(meta, async move { transport.complete(&req).await })
        };
        Ok(session)
    }
}

/// Messages of one chat panel plus the reply currently being written.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    reply: Option<usize>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    /// Open an empty assistant slot for the next session's snapshots.
    pub fn begin_reply(&mut self) {
        self.messages.push(ChatMessage::assistant(""));
        self.reply = Some(self.messages.len() - 1);
    }

    /// Apply one session event to the open reply slot.
    /// Failed and cancelled sessions keep whatever text arrived.
    pub fn apply(&mut self, event: &SessionEvent) {
        let Some(idx) = self.reply else {
            return;
        };
        match event {
            SessionEvent::Update(text) | SessionEvent::Complete(text) => {
                self.messages[idx].content.clone_from(text);
            }
            _ => {}
        }
        if event.is_terminal() {
            self.reply = None;
        }
    }

    pub fn reply_text(&self) -> Option<&str> {
        self.reply.map(|i| self.messages[i].content.as_str())
    }

    /// Messages to send upstream: everything except blank assistant placeholders.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| !(m.role == Role::Assistant && m.content.trim().is_empty()))
            .cloned()
            .collect()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

/// One chat panel: at most one live session at a time.
pub struct ChatSurface {
    client: ChatClient,
    active: Option<CancelHandle>,
}

impl ChatSurface {
    pub fn new(client: ChatClient) -> Self {
        Self {
            client,
            active: None,
        }
    }

    /// Cancel the running session, if any, then start `req`.
    pub fn start(&mut self, req: ChatRequest) -> CoreResult<Session> {
        self.cancel();
        let session = self.client.start_session(req)?;
        self.active = Some(session.cancel_handle());
        Ok(session)
    }

    pub fn cancel(&mut self) {
        if let Some(prev) = self.active.take() {
            prev.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays canned chunks and records what it was asked.
    #[derive(Default)]
    struct Scripted {
        chunks: Vec<&'static str>,
        body: serde_json::Value,
        calls: AtomicUsize,
        seen: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl ChatTransport for Scripted {
        async fn open_stream(&self, req: &ChatRequest) -> CoreResult<ByteStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(req.clone());
            let items: Vec<CoreResult<Bytes>> = self
                .chunks
                .iter()
                .copied()
                .map(|c: &'static str| Ok(Bytes::from_static(c.as_bytes())))
                .collect();
            Ok(futures::stream::iter(items).boxed())
        }

        async fn complete(&self, req: &ChatRequest) -> CoreResult<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(req.clone());
            Ok(self.body.clone())
        }
    }

    fn req(stream: bool, messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest {
            model: "qwen2.5-7b-instruct".into(),
            stream,
            messages,
        }
    }

    async fn collect(mut session: Session) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Some(ev) = session.next_event().await {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn blank_message_rejected_before_transport() {
        let transport = Arc::new(Scripted::default());
        let client = ChatClient::new(transport.clone());
        let err = client
            .start_session(req(true, vec![ChatMessage::user("   \n")]))
            .unwrap_err();
        assert!(matches!(err, PanelError::EmptyInput { field: "message" }));
        let err = client.start_session(req(true, vec![])).unwrap_err();
        assert!(matches!(err, PanelError::EmptyInput { .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn streaming_session_through_client() {
        let transport = Arc::new(Scripted {
            chunks: vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"He",
                "llo\"}}]}\n",
                "data: [DONE]\n",
            ],
            ..Default::default()
        });
        let client = ChatClient::new(transport.clone());
        let session = client
            .start_session(req(true, vec![ChatMessage::user(" hi ")]))
            .unwrap();
        let events = collect(session).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_update(), Some("Hello"));
        assert!(matches!(&events[1], SessionEvent::Complete(t) if t == "Hello"));

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].messages[0].content, "hi");
    }

    #[tokio::test]
    async fn non_streaming_session_through_client() {
        let transport = Arc::new(Scripted {
            body: json!({"choices":[{"message":{"content":"Hi"}}]}),
            ..Default::default()
        });
        let client = ChatClient::new(transport);
        let session = client
            .start_session(req(false, vec![ChatMessage::user("hello")]))
            .unwrap();
        let events = collect(session).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_update(), Some("Hi"));
    }

    #[test]
    fn conversation_tracks_reply_and_history() {
        let mut conv = Conversation::new();
        conv.push_user("first");
        conv.begin_reply();
        assert_eq!(conv.history().len(), 1);

        conv.apply(&SessionEvent::Update("par".into()));
        assert_eq!(conv.reply_text(), Some("par"));
        conv.apply(&SessionEvent::Update("partial".into()));
        conv.apply(&SessionEvent::Cancelled);
        assert_eq!(conv.reply_text(), None);
        // a late event has no open slot to land in
        conv.apply(&SessionEvent::Update("ignored".into()));

        conv.push_user("second");
        conv.begin_reply();
        let history = conv.history();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "partial", "second"]);
        assert_eq!(conv.messages().len(), 4);
    }

    #[test]
    fn failed_session_keeps_last_snapshot() {
        let mut conv = Conversation::new();
        conv.push_user("q");
        conv.begin_reply();
        conv.apply(&SessionEvent::Update("half".into()));
        conv.apply(&SessionEvent::Failed(PanelError::Unavailable {
            endpoint: "chat".into(),
        }));
        assert_eq!(conv.messages()[1].content, "half");
    }

    #[tokio::test]
    async fn surface_cancels_previous_session() {
        let transport = Arc::new(Scripted {
            body: json!({"choices":[{"message":{"content":"x"}}]}),
            ..Default::default()
        });
        let mut surface = ChatSurface::new(ChatClient::new(transport));
        let mut first = surface
            .start(req(false, vec![ChatMessage::user("one")]))
            .unwrap();
        let second = surface
            .start(req(false, vec![ChatMessage::user("two")]))
            .unwrap();

        assert!(first.is_cancelled());
        assert!(matches!(first.next_event().await, Some(SessionEvent::Cancelled)));
        assert!(first.next_event().await.is_none());
        assert!(!second.is_cancelled());
        let events = collect(second).await;
        assert!(matches!(events.last(), Some(SessionEvent::Complete(t)) if t == "x"));
    }

    #[tokio::test]
    async fn http_transport_streams_with_bearer_key() {
        let server = MockServer::start();
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer sk-test")
                .json_body(json!({
                    "model": "qwen2.5-7b-instruct",
                    "stream": true,
                    "messages": [{"role": "user", "content": "hi"}]
                }));
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(sse);
        });

        let transport = HttpChatTransport::new(
            HttpClient::new_default().unwrap(),
            format!("{}/v1", server.base_url()),
            ApiKey::parse("\"sk-test\""),
        );
        let client = ChatClient::new(Arc::new(transport));
        let session = client
            .start_session(req(true, vec![ChatMessage::user("hi")]))
            .unwrap();
        let events = collect(session).await;
        let updates: Vec<&str> = events.iter().filter_map(|e| e.as_update()).collect();
        assert_eq!(updates, vec!["Hel", "Hello"]);
        assert!(matches!(events.last(), Some(SessionEvent::Complete(t)) if t == "Hello"));
        m.assert();
    }

    #[tokio::test]
    async fn http_transport_error_status_fails_session() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(401).body("bad key");
        });
        let transport = HttpChatTransport::new(
            HttpClient::new_default().unwrap(),
            format!("{}/v1/", server.base_url()),
            None,
        );
        let client = ChatClient::new(Arc::new(transport));
        let session = client
            .start_session(req(true, vec![ChatMessage::user("hi")]))
            .unwrap();
        let events = collect(session).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::Failed(PanelError::Upstream { code, message, .. }) => {
                assert_eq!(code, "401");
                assert_eq!(message, "bad key");
            }
            other => panic!("expected Upstream failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_transport_non_streaming() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .json_body_partial(r#"{"stream": false}"#);
            then.status(200)
                .json_body(json!({"choices":[{"message":{"content":"Hi"}}]}));
        });
        let transport = HttpChatTransport::new(
            HttpClient::new_default().unwrap(),
            format!("{}/v1", server.base_url()),
            None,
        );
        let body = transport
            .complete(&req(false, vec![ChatMessage::user("hello")]))
            .await
            .unwrap();
        assert_eq!(crate::model::completion_text(&body), Some("Hi"));
    }
}
