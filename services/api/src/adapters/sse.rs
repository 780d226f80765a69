//! services/api/src/adapters/sse.rs
//!
//! Server-sent-events framing for the streaming endpoints of the HTTP-based
//! providers. Only `data:` lines are surfaced; the `[DONE]` sentinel is dropped.

use futures::{Stream, StreamExt};
use mindhit_core::ai::AiError;

/// Turns a streaming HTTP response into the payloads of its `data:` lines.
pub(crate) fn data_lines(resp: reqwest::Response) -> impl Stream<Item = Result<String, AiError>> + Send {
    let byte_stream = resp.bytes_stream();
    async_stream::try_stream! {
        let mut buffer = SseBuffer::default();
        futures::pin_mut!(byte_stream);
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| AiError::Request(format!("stream read error: {}", e)))?;
            for data in buffer.push(&chunk) {
                yield data;
            }
        }
        for data in buffer.finish() {
            yield data;
        }
    }
}

/// Accumulates raw bytes and splits complete lines. Bytes are kept until a newline
/// so multi-byte characters split across chunks decode intact.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(data) = parse_data_line(&String::from_utf8_lossy(&line)) {
                out.push(data);
            }
        }
        out
    }

    /// Flushes a trailing line that had no newline.
    pub(crate) fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.pending);
        parse_data_line(&String::from_utf8_lossy(&rest))
            .into_iter()
            .collect()
    }
}

fn parse_data_line(line: &str) -> Option<String> {
    let data = line.trim_end_matches(&['\r', '\n'][..]).strip_prefix("data:")?.trim_start();
    if data.is_empty() || data == "[DONE]" {
        None
    } else {
        Some(data.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines_across_chunks() {
        let mut buf = SseBuffer::default();
        assert!(buf.push(b"event: message\ndata: {\"a\"").is_empty());
        assert_eq!(buf.push(b":1}\n\ndata: [DONE]\n"), vec!["{\"a\":1}".to_string()]);
        assert!(buf.finish().is_empty());
    }

    #[test]
    fn keeps_multibyte_characters_whole() {
        let mut buf = SseBuffer::default();
        let bytes = "data: caf\u{e9}\n".as_bytes();
        let (head, tail) = bytes.split_at(bytes.len() - 2);
        assert!(buf.push(head).is_empty());
        assert_eq!(buf.push(tail), vec!["caf\u{e9}".to_string()]);
    }

    #[test]
    fn flushes_unterminated_line() {
        let mut buf = SseBuffer::default();
        assert!(buf.push(b"data:{}").is_empty());
        assert_eq!(buf.finish(), vec!["{}".to_string()]);
    }
}
