//! # SSE frame parser
//!
//! Turns a chunked byte stream into named server-sent events:
//! - line buffering across chunk boundaries (`\n` or `\r\n`)
//! - `event:` sets the frame name, `data:` lines accumulate and join with `\n`
//! - a blank line dispatches the frame; frames without data are dropped
//! - `:` comments and unknown fields (`id:`, `retry:`) are ignored
//!
//! A trailing frame with no terminating blank line is discarded, as browsers do.

use std::fmt::Display;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tracing::{trace, warn};

use crate::errors::TransportError;

/// One dispatched event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name, `message` when the frame had no `event:` field.
    pub event: String,
    /// Joined `data:` lines.
    pub data: String,
}

#[derive(Default)]
struct Frame {
    event: Option<String>,
    data: Vec<String>,
}

impl Frame {
    /// Apply one line. Returns a finished event on a blank line.
    fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            let frame = std::mem::take(self);
            if frame.data.is_empty() {
                return None;
            }
            return Some(SseEvent {
                event: frame.event.unwrap_or_else(|| "message".to_owned()),
                data: frame.data.join("\n"),
            });
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            _ => trace!(field, "ignoring SSE field"),
        }
        None
    }
}

/// Parse SSE frames from a byte stream.
///
/// A read error is yielded once as [`TransportError::Stream`] and ends the
/// stream.
pub fn parse_sse_events<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseEvent, TransportError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display,
{
    futures::stream::unfold(
        (
            Box::pin(byte_stream),
            BytesMut::with_capacity(8192),
            Frame::default(),
            false,
        ),
        |(mut stream, mut buffer, mut frame, done)| async move {
            if done {
                return None;
            }

            loop {
                if let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                    let mut line_bytes = buffer.split_to(newline_pos + 1);
                    line_bytes.truncate(line_bytes.len() - 1);
                    if line_bytes.last() == Some(&b'\r') {
                        line_bytes.truncate(line_bytes.len() - 1);
                    }

                    let Ok(line) = std::str::from_utf8(&line_bytes) else {
                        warn!("skipping SSE line with invalid UTF-8");
                        continue;
                    };

                    if let Some(event) = frame.push_line(line) {
                        return Some((Ok(event), (stream, buffer, frame, false)));
                    }
                    continue;
                }

                match stream.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        let err = TransportError::Stream(e.to_string());
                        return Some((Err(err), (stream, buffer, frame, true)));
                    }
                    None => return None,
                }
            }
        },
    )
}
