//! One request/response exchange and its cancellation.
//!
//! Contract:
//! - A session yields 0..n `Update` snapshots followed by exactly one terminal
//!   event: `Complete`, `Failed`, or `Cancelled`. Nothing follows the terminal event.
//! - Every `Update` is a prefix extension of the previous one.
//! - Once `cancel` has been requested the next event is `Cancelled`, even if
//!   updates were already queued; none of them is delivered.

use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_futures::Instrument;

use crate::error::{CoreResult, PanelError};
use crate::model::completion_text;
use crate::stream::{Assembler, Progress};
use crate::telemetry::{self, Outcome, SessionLog};

/// What the caller receives.
#[non_exhaustive]
#[derive(Debug)]
pub enum SessionEvent {
    /// Full text assembled so far.
    Update(String),
    /// Final text; equal to the last update when there was one.
    Complete(String),
    /// Transport failure; the session is over.
    Failed(PanelError),
    Cancelled,
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Failed(_) | Self::Cancelled)
    }

    pub fn as_update(&self) -> Option<&str> {
        match self {
            Self::Update(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Cloneable handle that cancels one session from anywhere.
#[derive(Debug, Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Labels attached to logs and telemetry.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub panel: &'static str,
    pub model: Option<String>,
}

impl SessionMeta {
    pub fn new(panel: &'static str, model: Option<String>) -> Self {
        Self { panel, model }
    }
}

/// A running exchange. Dropping it cancels the request.
#[derive(Debug)]
pub struct Session {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    cancel: CancellationToken,
    finished: bool,
}

impl Session {
    /// Start a streaming exchange. `open` connects and yields the body chunks.
    /// Must be called from within a tokio runtime.
    pub fn streaming<Fut, S>(meta: SessionMeta, open: Fut) -> Self
    where
        Fut: Future<Output = CoreResult<S>> + Send + 'static,
        S: Stream<Item = CoreResult<Bytes>> + Send + Unpin + 'static,
    {
        Self::spawn(meta, true, |out| drive_stream(open, out))
    }

    /// Start a non-streaming exchange. `fetch` yields the decoded JSON body.
    /// Must be called from within a tokio runtime.
    pub fn complete<Fut>(meta: SessionMeta, fetch: Fut) -> Self
    where
        Fut: Future<Output = CoreResult<serde_json::Value>> + Send + 'static,
    {
        Self::spawn(meta, false, |out| drive_complete(fetch, out))
    }

    fn spawn<F, W>(meta: SessionMeta, stream: bool, work: F) -> Self
    where
        F: FnOnce(Emitter) -> W,
        W: Future<Output = Ending> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let out = Emitter {
            tx: tx.clone(),
            cancel: cancel.clone(),
        };
        let span = tracing::info_span!(
            "session",
            panel = meta.panel,
            model = meta.model.as_deref().unwrap_or(""),
            stream
        );
        let fut = work(out);
        tokio::spawn(
            async move {
                let started = Instant::now();
                let ending = fut.await;
                report(&meta, stream, &ending, started);
                // the receiver may already be gone; nothing left to do then
                let _ = tx.send(ending.into_event());
            }
            .instrument(span),
        );
        Self {
            rx,
            cancel,
            finished: false,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.next().await
    }
}

impl Stream for Session {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        if self.cancel.is_cancelled() {
            self.finished = true;
            self.rx.close();
            return Poll::Ready(Some(SessionEvent::Cancelled));
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(ev)) => {
                if ev.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(ev))
            }
            // the worker died before sending a terminal event
            Poll::Ready(None) => {
                self.finished = true;
                tracing::warn!("session worker ended without a result");
                Poll::Ready(Some(SessionEvent::Failed(PanelError::Other(anyhow::anyhow!(
                    "session worker ended without a result"
                )))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Worker side of the channel.
struct Emitter {
    tx: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
}

impl Emitter {
    fn update(&self, snapshot: &str) -> ControlFlow<()> {
        if self.cancel.is_cancelled() {
            return ControlFlow::Break(());
        }
        if self.tx.send(SessionEvent::Update(snapshot.to_owned())).is_err() {
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}

struct Ending {
    result: EndResult,
    updates: usize,
    skipped: usize,
}

enum EndResult {
    Complete(String),
    Failed(PanelError),
    Cancelled,
}

impl Ending {
    fn new(result: EndResult) -> Self {
        Self {
            result,
            updates: 0,
            skipped: 0,
        }
    }

    fn into_event(self) -> SessionEvent {
        match self.result {
            EndResult::Complete(text) => SessionEvent::Complete(text),
            EndResult::Failed(err) => SessionEvent::Failed(err),
            EndResult::Cancelled => SessionEvent::Cancelled,
        }
    }
}

enum Exit {
    Eof,
    Done,
    Error(PanelError),
    Cancelled,
}

async fn drive_stream<Fut, S>(open: Fut, out: Emitter) -> Ending
where
    Fut: Future<Output = CoreResult<S>>,
    S: Stream<Item = CoreResult<Bytes>> + Unpin,
{
    let opened = tokio::select! {
        biased;
        _ = out.cancel.cancelled() => return Ending::new(EndResult::Cancelled),
        r = open => r,
    };
    let mut source = match opened {
        Ok(s) => s,
        Err(e) => return Ending::new(EndResult::Failed(e)),
    };

    let mut asm = Assembler::new();
    let exit = loop {
        let item = tokio::select! {
            biased;
            _ = out.cancel.cancelled() => break Exit::Cancelled,
            item = source.next() => item,
        };
        match item {
            None => break Exit::Eof,
            Some(Err(e)) => break Exit::Error(e),
            Some(Ok(chunk)) => match asm.feed(&chunk, |snap| out.update(snap)) {
                Progress::NeedMore => {}
                Progress::Done => break Exit::Done,
                Progress::Stopped => break Exit::Cancelled,
            },
        }
    };
    // aborts the connection before the terminal event goes out
    drop(source);

    let (updates, skipped) = (asm.updates(), asm.skipped());
    let result = match exit {
        Exit::Done => EndResult::Complete(asm.finish()),
        Exit::Eof => {
            tracing::debug!("stream ended without terminator");
            EndResult::Complete(asm.finish())
        }
        Exit::Error(e) => EndResult::Failed(e),
        Exit::Cancelled => EndResult::Cancelled,
    };
    Ending {
        result,
        updates,
        skipped,
    }
}

async fn drive_complete<Fut>(fetch: Fut, out: Emitter) -> Ending
where
    Fut: Future<Output = CoreResult<serde_json::Value>>,
{
    let body = tokio::select! {
        biased;
        _ = out.cancel.cancelled() => return Ending::new(EndResult::Cancelled),
        r = fetch => r,
    };
    let body = match body {
        Ok(b) => b,
        Err(e) => return Ending::new(EndResult::Failed(e)),
    };
    // bodies without the expected path are shown raw
    let text = match completion_text(&body) {
        Some(t) => t.to_string(),
        None => body.to_string(),
    };
    if out.update(&text).is_break() {
        return Ending::new(EndResult::Cancelled);
    }
    Ending {
        result: EndResult::Complete(text),
        updates: 1,
        skipped: 0,
    }
}

fn report(meta: &SessionMeta, stream: bool, ending: &Ending, started: Instant) {
    let latency_ms = started.elapsed().as_millis() as u64;
    let (outcome, text, err) = match &ending.result {
        EndResult::Complete(t) => (Outcome::Complete, t.as_str(), None),
        EndResult::Failed(e) => (Outcome::Failed, "", Some(e)),
        EndResult::Cancelled => (Outcome::Cancelled, "", None),
    };
    match err {
        Some(e) => tracing::warn!(error = %e, latency_ms, "session failed"),
        None => tracing::info!(
            ?outcome,
            updates = ending.updates,
            skipped = ending.skipped,
            latency_ms,
            "session ended"
        ),
    }
    let mut log = SessionLog::new(meta.panel, outcome)
        .model_opt(meta.model.as_deref())
        .stream(stream)
        .text(text)
        .counts(ending.updates, ending.skipped)
        .latency_ms(latency_ms);
    if let Some(e) = err {
        log = log.error(e);
    }
    telemetry::emit(log);
}
