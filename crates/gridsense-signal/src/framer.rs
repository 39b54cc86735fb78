//! Byte-chunk to line reassembly.
//!
//! Transports hand the engine arbitrary byte chunks: BLE notifications are
//! MTU-sized, serial reads split wherever the OS buffer happened to fill.
//! [`LineFramer`] reassembles those chunks into complete lines, accepting
//! `\n`, `\r`, and `\r\n` terminators (some firmware emits CR-only), and
//! keeps the unterminated tail buffered for the next push.

/// Incremental line reassembler over a byte-oriented transport.
///
/// Guarantees: lines are emitted in ingestion order, no byte is ever
/// emitted twice, and partial tail bytes are never emitted until a later
/// chunk terminates them. A `\r\n` pair split across two chunks counts as
/// a single terminator.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    /// The previous chunk ended on a consumed `\r`; a leading `\n` in the
    /// next chunk belongs to that terminator.
    cr_pending: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes.
    ///
    /// Terminators are dropped; empty lines are emitted as empty strings.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut chunk = chunk;
        if self.cr_pending && !chunk.is_empty() {
            self.cr_pending = false;
            if chunk[0] == b'\n' {
                chunk = &chunk[1..];
            }
        }
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        let mut start = 0;
        let mut i = 0;
        while i < self.buf.len() {
            let b = self.buf[i];
            if b != b'\n' && b != b'\r' {
                i += 1;
                continue;
            }

            out.push(String::from_utf8_lossy(&self.buf[start..i]).into_owned());

            if b == b'\r' {
                match self.buf.get(i + 1) {
                    Some(&b'\n') => i += 2,
                    Some(_) => i += 1,
                    None => {
                        // Chunk ends right after the CR; remember it so a
                        // leading LF in the next chunk is not a new line.
                        self.cr_pending = true;
                        i += 1;
                    }
                }
            } else {
                i += 1;
            }
            start = i;
        }

        // Compact once per push, not per line.
        if start > 0 {
            self.buf.drain(..start);
        }
        out
    }

    /// Drop any buffered partial line.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.cr_pending = false;
    }

    /// Number of buffered, not yet terminated bytes.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
