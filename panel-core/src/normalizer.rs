use crate::model::{ChatRequest, Role};
use unicode_normalization::UnicodeNormalization;

/// Unicode NFC normalization + BOM strip + CRLF -> LF + trim.
pub fn clean_text(s: &str) -> String {
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') {
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

/// Clean every message and drop blank assistant placeholders.
pub fn normalize_chat(mut req: ChatRequest) -> ChatRequest {
    for msg in &mut req.messages {
        msg.content = clean_text(&msg.content);
    }
    req.messages
        .retain(|m| !(m.role == Role::Assistant && m.content.is_empty()));
    req.model = req.model.trim().to_string();
    req
}
