//! Frame layer of the wire protocol.
//!
//! The server's chat stream is a sequence of frames separated by blank
//! lines. Within a frame only `data:` lines carry payload; `:` lines are
//! comments and any other line is ignored. Fragments arrive at arbitrary
//! byte boundaries, so decoding works on raw bytes and only converts to
//! text once a full line is buffered.

/// Incremental frame decoder. Pure transform: the only state is the
/// buffered tail of the current line and the data lines of the frame in
/// progress. Tied to one connection; not restartable.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    line_buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport fragment. Returns the payload of every frame the
    /// fragment completed, in arrival order. A frame is never emitted
    /// before its blank-line boundary has been observed, and no bytes
    /// belonging to the next frame are consumed early.
    pub fn push(&mut self, fragment: &[u8]) -> Vec<String> {
        let mut frames = Vec::new();
        for &byte in fragment {
            if byte == b'\n' {
                let line = std::mem::take(&mut self.line_buffer);
                self.accept_line(&line, &mut frames);
            } else {
                self.line_buffer.push(byte);
            }
        }
        frames
    }

    /// Whether buffered data would be lost if the stream ended now. An
    /// unterminated trailing frame is discarded at end of stream, not
    /// force-emitted.
    pub fn has_partial(&self) -> bool {
        !self.line_buffer.is_empty() || !self.data_lines.is_empty()
    }

    fn accept_line(&mut self, raw: &[u8], frames: &mut Vec<String>) {
        let raw = match raw.last() {
            Some(&b'\r') => &raw[..raw.len() - 1],
            _ => raw,
        };

        if raw.is_empty() {
            if !self.data_lines.is_empty() {
                frames.push(self.data_lines.join("\n"));
                self.data_lines.clear();
            }
            return;
        }

        let line = String::from_utf8_lossy(raw);
        if let Some(rest) = line.strip_prefix("data:") {
            let payload = rest.strip_prefix(' ').unwrap_or(rest);
            self.data_lines.push(payload.to_string());
        }
        // `:` comment lines and unknown fields fall through, ignored.
    }
}
