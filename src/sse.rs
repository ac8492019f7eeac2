//! Server-Sent Events (SSE) processing for agent chat streams.
//!
//! The agent answers with a `text/event-stream` body whose frames look like
//! `data: {"event": "token", ...}\n\n`.  This module splits the raw byte stream into lines,
//! keeping partial lines buffered across network reads, and decodes every `data:` payload
//! into an [`AgentEvent`].
//!
//! A payload that is not valid JSON, lacks the `event` discriminant, or is not UTF-8 yields a
//! frame error (see [`Error::is_frame_error`]) and the stream carries on with the next frame.
//! Errors from the underlying transport are passed through unchanged.

use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use tokio_util::codec::Decoder;

use crate::observability::{STREAM_BYTES, STREAM_EVENTS, STREAM_FRAME_ERRORS};
use crate::{AgentEvent, Error, Result};

/// Prefix of the lines that carry event payloads.
const DATA_PREFIX: &str = "data:";

/// A boxed stream of decoded agent events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent>> + Send>>;

/// Splits a byte buffer into newline-terminated lines.
///
/// The trailing `\n` (and a `\r` before it) is removed.  Bytes after the last newline stay in
/// the buffer until more data arrives or [`Decoder::decode_eof`] flushes them.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    // Bytes of the buffer already scanned for a newline.
    next_index: usize,
}

impl SseLineDecoder {
    /// Create a new line decoder.
    pub fn new() -> Self {
        Self::default()
    }
}

fn strip_carriage_return(line: &mut BytesMut) {
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
}

impl Decoder for SseLineDecoder {
    type Item = BytesMut;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        let start = self.next_index.min(src.len());
        match src[start..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let newline = start + offset;
                self.next_index = 0;
                let mut line = src.split_to(newline + 1);
                line.truncate(newline);
                strip_carriage_return(&mut line);
                Ok(Some(line))
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if src.is_empty() {
            return Ok(None);
        }
        let mut line = src.split_to(src.len());
        strip_carriage_return(&mut line);
        Ok(Some(line))
    }
}

/// Decode one SSE line.
///
/// Returns `None` for lines that carry no event: blank separators, comments, and fields other
/// than `data`.
pub fn parse_line(line: &[u8]) -> Option<Result<AgentEvent>> {
    let line = match std::str::from_utf8(line) {
        Ok(line) => line.trim(),
        Err(e) => {
            return Some(Err(Error::encoding(
                format!("Invalid UTF-8 in SSE frame: {e}"),
                Some(Box::new(e)),
            )));
        }
    };
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<AgentEvent>(payload) {
        Ok(event) => Some(Ok(event)),
        Err(e) => Some(Err(Error::serialization(
            format!("Malformed SSE payload '{payload}': {e}"),
            Some(Box::new(e)),
        ))),
    }
}

struct SseState<S> {
    stream: S,
    buffer: BytesMut,
    decoder: SseLineDecoder,
    eof: bool,
}

/// Process a stream of bytes into a stream of agent events.
///
/// Events are yielded strictly in the order their frames appear.  When the byte stream ends,
/// a trailing line without a newline is still decoded.
pub fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<AgentEvent>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let state = SseState {
        stream: byte_stream,
        buffer: BytesMut::new(),
        decoder: SseLineDecoder::new(),
        eof: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            let line = if state.eof {
                state.decoder.decode_eof(&mut state.buffer)
            } else {
                state.decoder.decode(&mut state.buffer)
            };
            match line {
                Ok(Some(line)) => {
                    if let Some(item) = parse_line(&line) {
                        match &item {
                            Ok(_) => STREAM_EVENTS.click(),
                            Err(_) => STREAM_FRAME_ERRORS.click(),
                        }
                        return Some((item, state));
                    }
                    continue;
                }
                Ok(None) if state.eof => return None,
                Ok(None) => {}
                Err(e) => return Some((Err(e), state)),
            }

            match state.stream.next().await {
                Some(Ok(bytes)) => {
                    STREAM_BYTES.count(bytes.len() as u64);
                    state.buffer.extend_from_slice(&bytes);
                }
                Some(Err(e)) => return Some((Err(e), state)),
                None => state.eof = true,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenEvent;
    use futures::stream;

    fn chunks(parts: &[&[u8]]) -> stream::Iter<std::vec::IntoIter<Result<Bytes>>> {
        let parts: Vec<Result<Bytes>> = parts
            .iter()
            .map(|part| Ok(Bytes::copy_from_slice(part)))
            .collect();
        stream::iter(parts)
    }

    async fn collect(parts: &[&[u8]]) -> Vec<Result<AgentEvent>> {
        process_sse(chunks(parts)).collect().await
    }

    #[tokio::test]
    async fn parse_token_event() {
        let events = collect(&[b"data: {\"event\":\"token\",\"content\":\"Hi\",\"node\":\"model\"}\n\n"]).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Ok(AgentEvent::Token(t)) if t.content == "Hi"));
    }

    #[tokio::test]
    async fn parse_multiple_events() {
        let events = collect(&[
            b"data: {\"event\":\"token\",\"content\":\"a\"}\n\ndata: {\"event\":\"token\",\"content\":\"b\"}\n\n",
        ])
        .await;
        let texts: Vec<String> = events
            .into_iter()
            .map(|e| match e {
                Ok(AgentEvent::Token(t)) => t.content,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(texts, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn handle_split_frame() {
        let events = collect(&[
            b"data: {\"event\":\"tok",
            b"en\",\"content\":\"Hel",
            b"lo\"}\n",
            b"\n",
        ])
        .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Ok(AgentEvent::Token(t)) if t.content == "Hello"));
    }

    #[tokio::test]
    async fn handle_split_multibyte_character() {
        let frame = "data: {\"event\":\"token\",\"content\":\"caf\u{e9}\"}\n\n".as_bytes();
        let split = frame.iter().position(|b| *b == 0xc3).unwrap() + 1;
        let events = collect(&[&frame[..split], &frame[split..]]).await;
        assert!(matches!(&events[0], Ok(AgentEvent::Token(t)) if t.content == "caf\u{e9}"));
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let events = collect(&[
            b"data: {not json}\n\ndata: {\"content\":\"no tag\"}\n\ndata: {\"event\":\"custom\",\"message\":\"ok\"}\n\n",
        ])
        .await;
        assert_eq!(events.len(), 3);
        assert!(events[0].as_ref().unwrap_err().is_frame_error());
        assert!(events[1].as_ref().unwrap_err().is_frame_error());
        assert!(matches!(&events[2], Ok(AgentEvent::Custom(c)) if c.message == "ok"));
    }

    #[tokio::test]
    async fn flushes_trailing_line_at_eof() {
        let events = collect(&[b"data: {\"event\":\"done\",\"thread_id\":\"th\"}"]).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Ok(AgentEvent::Done(d)) if d.thread_id == "th"));
    }

    #[tokio::test]
    async fn ignores_comments_and_other_fields() {
        let events = collect(&[
            b": keepalive\r\nevent: message\r\nid: 4\r\ndata: {\"event\":\"token\",\"content\":\"x\"}\r\n\r\n",
        ])
        .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Ok(AgentEvent::Token(_))));
    }

    #[tokio::test]
    async fn transport_error_passes_through() {
        let parts: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"event\":\"token\",\"content\":\"x\"}\n\n")),
            Err(Error::streaming("connection reset", None)),
        ];
        let events: Vec<_> = process_sse(stream::iter(parts)).collect().await;
        assert!(events[0].is_ok());
        let err = events[1].as_ref().unwrap_err();
        assert!(!err.is_frame_error());
    }

    #[test]
    fn parse_line_accepts_missing_space() {
        let event = parse_line(b"data:{\"event\":\"token\",\"content\":\"x\"}").unwrap().unwrap();
        assert_eq!(event, AgentEvent::Token(TokenEvent::new("x")));
        assert!(parse_line(b"").is_none());
        assert!(parse_line(b"data: [DONE]").is_none());
    }

    #[test]
    fn parse_line_rejects_invalid_utf8() {
        let err = parse_line(b"data: \xff\xfe").unwrap().unwrap_err();
        assert!(err.is_frame_error());
    }

    #[test]
    fn decoder_buffers_partial_lines() {
        let mut decoder = SseLineDecoder::new();
        let mut buf = BytesMut::from(&b"data: par"[..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"tial\nrest");
        let line = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&line[..], b"data: partial");
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        let tail = decoder.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(&tail[..], b"rest");
        assert!(decoder.decode_eof(&mut buf).unwrap().is_none());
    }
}
