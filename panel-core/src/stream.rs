//! Incremental reassembly of a streamed chat completion.
//!
//! The body is a sequence of newline-delimited records:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"He"}}]}
//! data: {"choices":[{"delta":{"content":"llo"}}]}
//! data: [DONE]
//! ```
//!
//! Bytes arrive in arbitrary chunks. [`Utf8Decoder`] carries incomplete
//! characters across chunk boundaries, [`Assembler`] carries incomplete lines,
//! and [`parse_event`] turns one complete line into a [`Record`]. A record that
//! cannot be used is a [`MalformedRecord`]; it is skipped and never ends the
//! stream.

use std::ops::ControlFlow;

use thiserror::Error;

use crate::model::ChatChunk;

/// Leading marker of every usable record.
pub const DATA_MARKER: &str = "data:";
/// Terminator payload; ends the stream regardless of what follows.
pub const DONE_TOKEN: &str = "[DONE]";

/// A successfully parsed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Done,
    /// `choices[0].delta.content`; may be empty.
    Delta(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRecord {
    #[error("record has no `data:` marker")]
    MissingMarker,
    #[error("record payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("record payload has no choices[0].delta.content")]
    MissingDelta,
}

/// Parse one trimmed, non-empty line.
pub fn parse_event(line: &str) -> Result<Record, MalformedRecord> {
    let payload = line
        .strip_prefix(DATA_MARKER)
        .ok_or(MalformedRecord::MissingMarker)?
        .trim();
    if payload == DONE_TOKEN {
        return Ok(Record::Done);
    }
    let chunk: ChatChunk =
        serde_json::from_str(payload).map_err(|e| MalformedRecord::InvalidJson(e.to_string()))?;
    chunk
        .delta_content()
        .map(|s| Record::Delta(s.to_string()))
        .ok_or(MalformedRecord::MissingDelta)
}

/// Streaming UTF-8 decoder.
///
/// Complete characters are appended to the output as soon as they are seen.
/// An incomplete sequence at the end of a chunk is held until the next call.
/// Invalid sequences become U+FFFD and decoding continues.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8], out: &mut String) {
        if chunk.is_empty() {
            return;
        }
        self.pending.extend_from_slice(chunk);
        let mut consumed = 0;
        loop {
            let rest = &self.pending[consumed..];
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    consumed = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    // the prefix is valid, lossy conversion never substitutes here
                    out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            consumed += valid + bad;
                        }
                        None => {
                            consumed += valid;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..consumed);
    }

    /// Bytes of an incomplete character waiting for the next chunk.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Outcome of feeding one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// All complete lines consumed; waiting for more bytes.
    NeedMore,
    /// Terminator seen. Remaining buffered bytes are ignored.
    Done,
    /// The update callback asked to stop.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Done,
    Stopped,
}

/// Reassembles the text of one streamed reply.
#[derive(Debug)]
pub struct Assembler {
    decoder: Utf8Decoder,
    line_buf: String,
    text: String,
    state: State,
    updates: usize,
    skipped: usize,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            decoder: Utf8Decoder::new(),
            line_buf: String::new(),
            text: String::new(),
            state: State::Open,
            updates: 0,
            skipped: 0,
        }
    }

    /// Text assembled so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of snapshots handed to the callback.
    pub fn updates(&self) -> usize {
        self.updates
    }

    /// Number of malformed records skipped.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Decode `chunk` and process every complete line in order.
    ///
    /// `on_update` is called with the full assembled text after each non-empty
    /// delta, before the next line is looked at. Returning `Break` stops the
    /// assembler; the delta that produced the rejected snapshot is rolled back.
    /// Once `Done` or `Stopped` has been returned, further chunks are ignored.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_update: F) -> Progress
    where
        F: FnMut(&str) -> ControlFlow<()>,
    {
        match self.state {
            State::Done => return Progress::Done,
            State::Stopped => return Progress::Stopped,
            State::Open => {}
        }
        self.decoder.decode(chunk, &mut self.line_buf);

        let mut start = 0;
        let mut progress = Progress::NeedMore;
        while let Some(rel) = self.line_buf[start..].find('\n') {
            let end = start + rel;
            let line = self.line_buf[start..end].trim();
            start = end + 1;
            if line.is_empty() {
                continue;
            }
            match parse_event(line) {
                Ok(Record::Done) => {
                    self.state = State::Done;
                    progress = Progress::Done;
                    break;
                }
                Ok(Record::Delta(delta)) if delta.is_empty() => {}
                Ok(Record::Delta(delta)) => {
                    let before = self.text.len();
                    self.text.push_str(&delta);
                    if on_update(&self.text).is_break() {
                        self.text.truncate(before);
                        self.state = State::Stopped;
                        progress = Progress::Stopped;
                        break;
                    }
                    self.updates += 1;
                }
                Err(err) => {
                    self.skipped += 1;
                    tracing::debug!(error = %err, "skipping malformed stream record");
                }
            }
        }

        if progress == Progress::NeedMore {
            self.line_buf.drain(..start);
        } else {
            self.line_buf.clear();
        }
        progress
    }

    /// End of data: any partial line is discarded. Returns the assembled text.
    pub fn finish(self) -> String {
        if !self.line_buf.trim().is_empty() || self.decoder.pending() > 0 {
            tracing::debug!(
                residual = self.line_buf.len() + self.decoder.pending(),
                "discarding unterminated stream tail"
            );
        }
        self.text
    }
}
