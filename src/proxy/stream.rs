//! SSE stream observation.
//!
//! Provides [`UsageObserver`] for line-buffered extraction of the trailing
//! usage object from OpenAI-compatible streaming responses. Bytes are relayed
//! to the client elsewhere; the observer only sees copies, so parsing never
//! delays delivery. Handles TCP chunk boundary reassembly correctly.

use crate::cost::Usage;

/// Maximum characters retained in the diagnostic preview buffer.
pub const PREVIEW_CAP: usize = 5000;

/// SSE event-data line prefix.
const DATA_PREFIX: &str = "data:";

/// Stream terminator sentinel carried in a data line.
const DONE_SENTINEL: &str = "[DONE]";

/// Final state of an observed stream, handed to the log assembler.
#[derive(Debug, Clone, Default)]
pub struct StreamCapture {
    /// The last non-null usage object seen in any `data:` frame.
    pub usage: Option<Usage>,
    /// Decoded stream text, truncated at [`PREVIEW_CAP`] characters.
    pub preview: String,
}

/// Internal state for SSE line buffering and usage extraction.
///
/// Buffers raw bytes across chunk boundaries, reassembles complete logical
/// lines, and extracts the usage object from `data:` lines. Malformed frames
/// are skipped silently; partial or garbled lines are expected in streaming
/// protocols and must not abort the relay.
pub struct UsageObserver {
    carryover: Vec<u8>,
    usage: Option<Usage>,
    preview: String,
    preview_chars: usize,
}

impl UsageObserver {
    /// Create a new observer with empty state.
    pub fn new() -> Self {
        Self {
            carryover: Vec::new(),
            usage: None,
            preview: String::new(),
            preview_chars: 0,
        }
    }

    /// Process a chunk of bytes from the upstream stream.
    ///
    /// The caller relays the same bytes to the client independently; this
    /// method never fails and never blocks on parsing.
    pub fn observe(&mut self, chunk: &[u8]) {
        self.append_preview(chunk);

        self.carryover.extend_from_slice(chunk);
        while let Some(pos) = self.carryover.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.carryover.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            self.scan_line(line.trim_end_matches(['\n', '\r']));
        }
    }

    /// Append decoded chunk text to the preview, discarding past the cap.
    fn append_preview(&mut self, chunk: &[u8]) {
        if self.preview_chars >= PREVIEW_CAP {
            return;
        }
        let text = String::from_utf8_lossy(chunk);
        for c in text.chars() {
            if self.preview_chars >= PREVIEW_CAP {
                break;
            }
            self.preview.push(c);
            self.preview_chars += 1;
        }
    }

    /// Inspect one complete logical line for a usage-bearing frame.
    fn scan_line(&mut self, line: &str) {
        let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };
        let payload = rest.trim();
        if payload == DONE_SENTINEL {
            return;
        }
        // Parse failures are swallowed: the frame may be legitimately
        // malformed or unrelated.
        let Ok(frame) = serde_json::from_str::<serde_json::Value>(payload) else {
            return;
        };
        if let Some(raw) = frame.get("usage").filter(|u| !u.is_null()) {
            if let Ok(usage) = serde_json::from_value::<Usage>(raw.clone()) {
                self.usage = Some(usage);
            }
        }
    }

    /// Consume the observer and produce the final capture.
    ///
    /// Any unterminated carryover text is discarded without error: upstream
    /// conventions terminate every frame with a newline, and a truncated
    /// final line cannot be valid JSON anyway.
    pub fn finish(self) -> StreamCapture {
        StreamCapture {
            usage: self.usage,
            preview: self.preview,
        }
    }
}

impl Default for UsageObserver {
    fn default() -> Self {
        Self::new()
    }
}
