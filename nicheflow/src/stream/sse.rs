//! Incremental server-sent events decoding.

use super::protocol::ProgressEvent;
use super::transport::EventChannel;
use crate::errors::StreamTransportError;
use futures::{stream, Stream, StreamExt};
use std::fmt::Display;

/// Splits a byte stream into SSE `data` payloads.
///
/// Chunks may end anywhere, including inside a line or a UTF-8 sequence;
/// only complete lines are decoded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every payload it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|b| *b == b'\n') {
            let end = consumed + offset;
            let mut line = &self.buffer[consumed..end];
            if let [rest @ .., b'\r'] = line {
                line = rest;
            }
            let line = String::from_utf8_lossy(line).into_owned();
            consumed = end + 1;

            if line.is_empty() {
                if !self.data.is_empty() {
                    payloads.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            self.field(&line);
        }
        self.buffer.drain(..consumed);
        payloads
    }

    /// Returns true if a partial line or an undispatched event is buffered.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty() || !self.data.is_empty()
    }

    fn field(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        // event, id and retry carry nothing the analysis protocol uses.
        if name == "data" {
            self.data.push(value.to_string());
        }
    }
}

/// Decodes one payload into a progress event.
///
/// # Errors
///
/// Malformed JSON is a transport error.
pub fn decode_event(payload: &str) -> Result<ProgressEvent, StreamTransportError> {
    serde_json::from_str(payload)
        .map_err(|e| StreamTransportError::new(format!("malformed progress event: {e}")))
}

/// Turns a raw byte stream into a channel of progress events.
pub fn event_channel<S, B, E>(bytes: S) -> EventChannel
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut decoder = SseDecoder::new();
    let events = bytes
        .map(move |chunk| match chunk {
            Ok(chunk) => decoder
                .push(chunk.as_ref())
                .iter()
                .map(|payload| decode_event(payload))
                .collect::<Vec<_>>(),
            Err(e) => vec![Err(StreamTransportError::new(e.to_string()))],
        })
        .flat_map(stream::iter);
    Box::pin(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(b"data: {\"status\":\"started\"}\n\n");
        assert_eq!(payloads, vec![r#"{"status":"started"}"#.to_string()]);
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"da").is_empty());
        assert!(decoder.push(b"ta: {\"a\":").is_empty());
        assert!(decoder.push(b"1}\r\n").is_empty());
        assert!(decoder.has_pending());
        assert_eq!(decoder.push(b"\r\n"), vec![r#"{"a":1}"#.to_string()]);
    }

    #[test]
    fn test_split_inside_utf8_sequence() {
        let bytes = "data: {\"location\":\"Montréal\"}\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec![r#"{"location":"Montréal"}"#.to_string()]);
    }

    #[test]
    fn test_multiline_data_and_ignored_fields() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(b": keep-alive\nevent: progress\nid: 7\ndata: line one\ndata:line two\nretry: 100\n\n");
        assert_eq!(payloads, vec!["line one\nline two".to_string()]);
    }

    #[test]
    fn test_blank_lines_without_data_dispatch_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"\n\n: ping\n\n").is_empty());
    }

    #[tokio::test]
    async fn test_event_channel() {
        let chunks: Vec<Result<&'static [u8], std::io::Error>> = vec![
            Ok(&b"data: {\"status\":\"processing\",\"step\":\"geo\"}\n\ndata: {\"sta"[..]),
            Ok(&b"tus\":\"completed\",\"results\":{\"ok\":true}}\n\n"[..]),
        ];
        let events: Vec<_> = event_channel(stream::iter(chunks)).collect().await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(ProgressEvent::Processing { .. })));
        assert!(matches!(events[1], Ok(ProgressEvent::Completed { .. })));
    }

    #[tokio::test]
    async fn test_event_channel_surfaces_errors() {
        let chunks: Vec<Result<&'static [u8], std::io::Error>> = vec![
            Ok(&b"data: not json\n\n"[..]),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let events: Vec<_> = event_channel(stream::iter(chunks)).collect().await;

        assert!(events[0].as_ref().unwrap_err().message.contains("malformed"));
        assert!(events[1].as_ref().unwrap_err().message.contains("reset"));
    }
}
