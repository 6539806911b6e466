use bytes::{Buf, BytesMut};

pub(crate) const DONE_SENTINEL: &str = "[DONE]";

/// Splits a server-sent-events body into `data:` payloads.
///
/// Network chunks can end anywhere, including inside a multi-byte character,
/// so lines are only decoded once their terminating newline has arrived.
#[derive(Debug, Default)]
pub(crate) struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line = self.buffer.split_to(newline);
            self.buffer.advance(1);
            if let Some(payload) = data_payload(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flushes a trailing line the server did not terminate.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = self.buffer.split();
        data_payload(&rest)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let rest = line.strip_prefix(b"data:")?;
    let rest = rest.strip_prefix(b" ").unwrap_or(rest);
    Some(String::from_utf8_lossy(rest).into_owned())
}
