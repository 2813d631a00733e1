//! Session telemetry.
//! By default, nothing is emitted unless a sink is installed via `set_telemetry_sink`.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Serialize;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Complete,
    Failed,
    Cancelled,
}

/// Structured end-of-session event.
#[derive(Debug, Clone, Serialize)]
pub struct SessionLog {
    pub panel: String,
    pub model: Option<String>,
    pub stream: bool,
    pub outcome: Outcome,
    /// Length in chars of the final text shown to the caller.
    pub chars: usize,
    pub updates: usize,
    pub skipped_records: usize,
    pub latency_ms: u64,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl SessionLog {
    pub fn new(panel: &str, outcome: Outcome) -> Self {
        Self {
            panel: panel.to_string(),
            model: None,
            stream: false,
            outcome,
            chars: 0,
            updates: 0,
            skipped_records: 0,
            latency_ms: 0,
            error_kind: None,
            error_message: None,
        }
    }
    pub fn model_opt(mut self, v: Option<&str>) -> Self {
        self.model = v.map(|s| s.to_string());
        self
    }
    pub fn stream(mut self, v: bool) -> Self {
        self.stream = v;
        self
    }
    /// Records the length of `v` in chars.
    pub fn text(mut self, v: &str) -> Self {
        self.chars = v.chars().count();
        self
    }
    pub fn counts(mut self, updates: usize, skipped: usize) -> Self {
        self.updates = updates;
        self.skipped_records = skipped;
        self
    }
    pub fn latency_ms(mut self, v: u64) -> Self {
        self.latency_ms = v;
        self
    }
    pub fn error(mut self, err: &crate::error::PanelError) -> Self {
        self.error_kind = Some(err.kind().to_string());
        self.error_message = Some(err.to_string());
        self
    }
}

/// Implement this to receive telemetry events.
///
/// `record` may be called from any runtime worker thread; keep it cheap and non-panicking.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record(&self, log: SessionLog);
}

static TELEMETRY_SINK: OnceCell<Arc<dyn TelemetrySink>> = OnceCell::new();

/// Install a global telemetry sink. Returns `false` if a sink is already installed.
/// This is write-once for the process lifetime.
pub fn set_telemetry_sink(sink: Arc<dyn TelemetrySink>) -> bool {
    TELEMETRY_SINK.set(sink).is_ok()
}

#[inline]
pub(crate) fn emit(log: SessionLog) {
    if let Some(sink) = TELEMETRY_SINK.get() {
        sink.record(log);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_log_serializes() {
        let err = crate::error::PanelError::Unavailable { endpoint: "chat".into() };
        let log = SessionLog::new("chat", Outcome::Failed)
            .model_opt(Some("qwen"))
            .stream(true)
            .text("héllo")
            .counts(3, 1)
            .latency_ms(42)
            .error(&err);
        let v = serde_json::to_value(&log).unwrap();
        assert_eq!(v["outcome"], json!("failed"));
        assert_eq!(v["chars"], json!(5));
        assert_eq!(v["skipped_records"], json!(1));
        assert_eq!(v["error_kind"], json!("unavailable"));
        assert_eq!(v["error_message"], json!("chat is unavailable"));
    }

    #[test]
    fn capture_sink_filters_by_model() {
        let sink = capture::sink();
        emit(SessionLog::new("chat", Outcome::Complete).model_opt(Some("telemetry-test-model")));
        let logs = sink.for_model("telemetry-test-model");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].outcome, Outcome::Complete);
    }
}
