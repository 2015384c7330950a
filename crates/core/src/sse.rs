//! Gemini SSE decoding.
//!
//! The generation endpoint answers with a server-sent event body where each
//! event line is `data: <json>` and the text delta sits at
//! `candidates[0].content.parts[0].text`. A single network read may end in the
//! middle of a line, so the decoder keeps the unterminated tail between reads
//! and only ever parses complete lines.

use crate::error::StreamError;
use futures::Stream;
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

const DATA_PREFIX: &str = "data: ";

/// An item yielded by a [`CompletionStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A non-empty fragment of generated text.
    Delta(String),
    /// The terminal event: the concatenation of every delta, in order.
    Completed(String),
}

/// Incremental line decoder for the event-stream body.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a line terminator.
    scanned: usize,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one read worth of bytes and returns the deltas found in every
    /// line it completed. The unterminated remainder is retained.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut deltas = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let line = String::from_utf8_lossy(&self.buffer[consumed..end]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(text) = parse_data_line(line) {
                deltas.push(text);
            }
            consumed = end + 1;
            self.scanned = consumed;
        }
        self.buffer.drain(..consumed);
        self.scanned = self.buffer.len();
        deltas
    }

    /// Bytes received after the last line terminator.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

/// Extracts the delta text from a single complete line, if it carries one.
///
/// Non-data lines and empty texts yield `None`. A data line whose JSON does
/// not parse is logged and dropped.
pub fn parse_data_line(line: &str) -> Option<String> {
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, line, "Could not parse JSON chunk");
            return None;
        }
    };
    value
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

/// Adapts a byte stream into ordered deltas terminated by a single
/// [`StreamEvent::Completed`].
///
/// If the underlying stream fails, one error is yielded and the stream ends
/// without a completion. Dropping the stream drops the response body.
pub struct CompletionStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, StreamError>> + Send>>,
    decoder: SseLineDecoder,
    pending: VecDeque<String>,
    full_text: String,
    finished: bool,
}

impl CompletionStream {
    pub fn new<S>(body: S) -> Self
    where
        S: Stream<Item = Result<bytes::Bytes, StreamError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(body),
            decoder: SseLineDecoder::new(),
            pending: VecDeque::new(),
            full_text: String::new(),
            finished: false,
        }
    }

    /// Builds a stream straight from already-decoded deltas. Used by offline
    /// clients and tests.
    pub fn from_deltas<I>(deltas: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut stream = Self::new(futures::stream::empty::<Result<bytes::Bytes, StreamError>>());
        stream.pending.extend(deltas.into_iter().filter(|d| !d.is_empty()));
        stream
    }
}

impl Stream for CompletionStream {
    type Item = Result<StreamEvent, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.finished {
                return Poll::Ready(None);
            }

            if let Some(delta) = self.pending.pop_front() {
                self.full_text.push_str(&delta);
                return Poll::Ready(Some(Ok(StreamEvent::Delta(delta))));
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let deltas = self.decoder.push(&bytes);
                    self.pending.extend(deltas);
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    if !self.decoder.pending().is_empty() {
                        debug!(
                            bytes = self.decoder.pending().len(),
                            "Discarding unterminated tail of event stream"
                        );
                    }
                    let full_text = std::mem::take(&mut self.full_text);
                    return Poll::Ready(Some(Ok(StreamEvent::Completed(full_text))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;

    fn data_line(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"candidates": [{"content": {"parts": [{"text": text}]}}]})
        )
    }

    fn body(chunks: Vec<&str>) -> impl Stream<Item = Result<Bytes, StreamError>> + Send + 'static {
        let owned: Vec<Result<Bytes, StreamError>> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::from(c.to_string())))
            .collect();
        futures::stream::iter(owned)
    }

    async fn collect(stream: CompletionStream) -> Vec<Result<StreamEvent, StreamError>> {
        stream.collect().await
    }

    #[test]
    fn test_line_split_across_reads_is_reconstructed() {
        let line = data_line("Hello");
        let (head, tail) = line.split_at(18);
        let mut decoder = SseLineDecoder::new();

        assert!(decoder.push(head.as_bytes()).is_empty());
        assert!(!decoder.pending().is_empty());
        assert_eq!(decoder.push(tail.as_bytes()), vec!["Hello".to_string()]);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_long_line_fed_byte_by_byte() {
        let text = "x".repeat(4096);
        let line = data_line(&text);
        let mut decoder = SseLineDecoder::new();

        let mut deltas = Vec::new();
        for byte in line.as_bytes() {
            deltas.extend(decoder.push(std::slice::from_ref(byte)));
        }

        assert_eq!(deltas, vec![text]);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_remainder_after_several_lines_is_kept() {
        let input = format!("{}{}data: {{\"cand", data_line("a"), data_line("b"));
        let mut decoder = SseLineDecoder::new();

        assert_eq!(decoder.push(input.as_bytes()), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(decoder.pending(), b"data: {\"cand");
        assert!(decoder.push(b"idates\":[]}").is_empty());
        assert!(decoder.push(b"\n").is_empty());
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_multibyte_character_split_across_reads() {
        let line = data_line("caf\u{e9}");
        let bytes = line.as_bytes();
        let cut = line.find('\u{e9}').unwrap() + 1;
        let mut decoder = SseLineDecoder::new();

        assert!(decoder.push(&bytes[..cut]).is_empty());
        assert_eq!(decoder.push(&bytes[cut..]), vec!["caf\u{e9}".to_string()]);
    }

    #[test]
    fn test_non_data_and_malformed_lines_are_skipped() {
        let mut decoder = SseLineDecoder::new();
        let input = format!(
            ": keep-alive\nevent: message\ndata: {{not json\n{}data: {{\"candidates\":[]}}\n",
            data_line("ok")
        );
        assert_eq!(decoder.push(input.as_bytes()), vec!["ok".to_string()]);
    }

    #[test]
    fn test_crlf_terminated_lines() {
        let mut decoder = SseLineDecoder::new();
        let input = data_line("win").replace('\n', "\r\n");
        assert_eq!(decoder.push(input.as_bytes()), vec!["win".to_string()]);
    }

    #[test]
    fn test_empty_text_is_not_a_delta() {
        assert_eq!(parse_data_line(data_line("").trim_end()), None);
        assert_eq!(
            parse_data_line(data_line("x").trim_end()),
            Some("x".to_string())
        );
    }

    #[tokio::test]
    async fn test_completion_equals_concatenated_deltas() {
        let first = data_line("Intro ");
        let second = data_line("to **Rust**");
        let joined = format!("{first}{second}");
        let (a, b) = joined.split_at(first.len() - 5);
        let events = collect(CompletionStream::new(body(vec![a, b]))).await;

        let events: Vec<StreamEvent> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("Intro ".to_string()),
                StreamEvent::Delta("to **Rust**".to_string()),
                StreamEvent::Completed("Intro to **Rust**".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_mid_stream_failure_has_no_completion() {
        let first = data_line("partial");
        let chunks: Vec<Result<Bytes, StreamError>> = vec![
            Ok(Bytes::from(first)),
            Err(StreamError::Body("connection reset".to_string())),
            Ok(Bytes::from(data_line("never"))),
        ];
        let events = collect(CompletionStream::new(futures::stream::iter(chunks))).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(StreamEvent::Delta(d)) if d == "partial"));
        assert!(matches!(&events[1], Err(StreamError::Body(_))));
    }

    #[tokio::test]
    async fn test_empty_body_completes_with_empty_text() {
        let events = collect(CompletionStream::new(body(vec![]))).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Ok(StreamEvent::Completed(t)) if t.is_empty()));
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_discarded() {
        let tail = data_line("lost");
        let chunks = vec![tail.trim_end()];
        let events = collect(CompletionStream::new(body(chunks))).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Ok(StreamEvent::Completed(t)) if t.is_empty()));
    }

    #[tokio::test]
    async fn test_from_deltas() {
        let stream = CompletionStream::from_deltas(vec!["a".into(), String::new(), "b".into()]);
        let events: Vec<StreamEvent> = collect(stream).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("a".into()),
                StreamEvent::Delta("b".into()),
                StreamEvent::Completed("ab".into()),
            ]
        );
    }
}
