//! Server-Sent Events framing over an HTTP byte stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use thiserror::Error;

/// Errors raised while reading an event stream.
#[derive(Debug, Error)]
pub enum SseError {
    #[error("stream read failed: {0}")]
    Read(String),
}

/// One dispatched SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    /// Value of the last `id:` field, if any.
    pub id: Option<String>,
    /// Reconnection hint from a `retry:` field, in milliseconds.
    pub retry: Option<u64>,
}

impl SseFrame {
    /// Creates a frame with an event name and data.
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
            ..Default::default()
        }
    }

    /// Event name, defaulting to `message` as browsers do.
    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }

    /// Parses the text of one frame (without the blank-line terminator).
    ///
    /// Returns `None` for frames carrying nothing but comments, which servers
    /// send as keep-alives.
    pub fn parse(text: &str) -> Option<Self> {
        let mut frame = Self::default();
        let mut data_lines: Vec<&str> = Vec::new();
        let mut seen_field = false;

        for line in text.lines() {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };

            match field {
                "event" => frame.event = Some(value.to_string()),
                "data" => data_lines.push(value),
                "id" => frame.id = Some(value.to_string()),
                "retry" => frame.retry = value.trim().parse().ok(),
                other => {
                    tracing::trace!(field = other, "Ignoring unknown SSE field");
                    continue;
                }
            }
            seen_field = true;
        }

        if !seen_field {
            return None;
        }
        frame.data = data_lines.join("\n");
        Some(frame)
    }
}

/// Stream wrapper turning raw response bytes into [`SseFrame`]s.
///
/// Bytes are buffered rather than decoded chunk by chunk, so a multi-byte
/// character split across two network reads survives intact.
pub struct SseStream<S> {
    inner: S,
    buffer: Vec<u8>,
    finished: bool,
}

impl<S> SseStream<S> {
    /// Wraps a byte stream.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            finished: false,
        }
    }

    /// Removes the next complete frame from the buffer, if there is one.
    fn take_frame(&mut self) -> Option<String> {
        let (end, separator_len) = find_frame_end(&self.buffer)?;
        let frame: Vec<u8> = self.buffer.drain(..end + separator_len).collect();
        Some(String::from_utf8_lossy(&frame[..end]).into_owned())
    }
}

/// Finds the earliest blank-line terminator, returning its offset and length.
fn find_frame_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = find(buffer, b"\n\n").map(|pos| (pos, 2));
    let crlf = find(buffer, b"\r\n\r\n").map(|pos| (pos, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

impl<S, E> Stream for SseStream<S>
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    E: std::error::Error,
{
    type Item = Result<SseFrame, SseError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            if let Some(text) = self.take_frame() {
                if let Some(frame) = SseFrame::parse(&text) {
                    return Poll::Ready(Some(Ok(frame)));
                }
                continue;
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.buffer.extend_from_slice(&bytes);
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(SseError::Read(e.to_string()))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    // Servers may close without the final blank line.
                    let rest = std::mem::take(&mut self.buffer);
                    let text = String::from_utf8_lossy(&rest);
                    return Poll::Ready(SseFrame::parse(text.trim_end()).map(Ok));
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
    use futures::{stream, StreamExt};

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::copy_from_slice(p)))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect(parts: &[&[u8]]) -> Vec<SseFrame> {
        SseStream::new(chunks(parts))
            .map(|item| item.unwrap())
            .collect()
            .await
    }

    #[test]
    fn parses_named_frame() {
        let frame = SseFrame::parse("event: status\ndata: {\"message\":\"hi\"}").unwrap();
        assert_eq!(frame.event_name(), "status");
        assert_eq!(frame.data, "{\"message\":\"hi\"}");
    }

    #[test]
    fn joins_multiple_data_lines() {
        let frame = SseFrame::parse("data: one\ndata: two\nid: 7\nretry: 1500").unwrap();
        assert_eq!(frame.event_name(), "message");
        assert_eq!(frame.data, "one\ntwo");
        assert_eq!(frame.id.as_deref(), Some("7"));
        assert_eq!(frame.retry, Some(1500));
    }

    #[test]
    fn comment_only_frame_is_skipped() {
        assert_eq!(SseFrame::parse(": keep-alive"), None);
    }

    #[tokio::test]
    async fn frames_split_across_chunks() {
        let frames = collect(&[b"event: conn", b"ected\ndata:\n\nevent: status\nda", b"ta: x\n\n"]).await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event_name(), "connected");
        assert_eq!(frames[1].data, "x");
    }

    #[tokio::test]
    async fn crlf_terminators_are_supported() {
        let frames = collect(&[b"event: close\r\ndata: bye\r\n\r\n"]).await;
        assert_eq!(frames, vec![SseFrame::new("close", "bye")]);
    }

    #[tokio::test]
    async fn multibyte_character_split_across_chunks() {
        let text = "event: status\ndata: caf\u{e9}\n\n".as_bytes();
        let split = text.len() - 3;
        let frames = collect(&[&text[..split], &text[split..]]).await;
        assert_eq!(frames[0].data, "caf\u{e9}");
    }

    #[tokio::test]
    async fn trailing_frame_is_flushed_at_end() {
        let frames = collect(&[b": ping\n\nevent: close\ndata: done"]).await;
        assert_eq!(frames, vec![SseFrame::new("close", "done")]);
    }

    #[test]
    fn incomplete_frame_waits_for_more_bytes() {
        let inner = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(
            b"event: status\ndata: half",
        ))])
        .chain(stream::pending());
        let mut sse = SseStream::new(inner);

        let mut next = tokio_test::task::spawn(sse.next());
        tokio_test::assert_pending!(next.poll());
    }

    #[tokio::test]
    async fn read_error_ends_stream() {
        let inner = stream::iter(vec![
            Ok(Bytes::from_static(b"event: status\ndata: a\n\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"event: status\ndata: b\n\n")),
        ]);
        let items: Vec<_> = SseStream::new(inner).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(SseError::Read(_))));
    }
}
