//! SSE frame encoding and the upstream line splitter.
//!
//! The upstream delivers newline-delimited JSON over an HTTP body;
//! [`json_line_stream`] reassembles complete lines from arbitrarily-split
//! byte chunks. The encoding helpers produce the OpenAI-compatible SSE
//! frames the processors emit.

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use memchr::memchr;

use crate::error::{classify_transport_error, EngineError};

const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Format an OpenAI-style SSE frame (no event type, just data).
#[must_use]
pub fn openai_sse_frame(json: &str) -> String {
    let mut out = String::with_capacity(10 + json.len());
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

/// Format an SSE frame with a named event type.
#[must_use]
pub fn named_sse_frame(event_type: &str, json: &str) -> String {
    let mut out = String::with_capacity(18 + event_type.len() + json.len());
    out.push_str("event: ");
    out.push_str(event_type);
    out.push('\n');
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

/// The literal stream-terminator frame.
#[must_use]
pub fn done_frame() -> String {
    DONE_FRAME.to_owned()
}

/// Whether an already-encoded frame is the stream terminator.
#[must_use]
pub fn is_done_frame(frame: &str) -> bool {
    frame.trim() == "data: [DONE]"
}

/// Split an upstream byte stream into newline-delimited lines.
///
/// Each yielded item is one line without its terminator (a trailing `\r` is
/// stripped). A non-empty tail without a final newline is yielded when the
/// source ends. Transport errors are classified into the engine taxonomy
/// via [`classify_transport_error`] and terminate the stream.
pub fn json_line_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<Bytes, EngineError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (Box::pin(byte_stream), BytesMut::with_capacity(4096), false),
        |(mut stream, mut buffer, mut finished)| async move {
            loop {
                if finished {
                    return None;
                }

                if let Some(pos) = memchr(b'\n', &buffer) {
                    let mut line = buffer.split_to(pos + 1);
                    line.truncate(pos);
                    if line.last() == Some(&b'\r') {
                        line.truncate(line.len() - 1);
                    }
                    return Some((Ok(line.freeze()), (stream, buffer, finished)));
                }

                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                    Some(Err(err)) => {
                        finished = true;
                        let classified = classify_transport_error(&err.to_string());
                        return Some((Err(classified), (stream, buffer, finished)));
                    }
                    None => {
                        finished = true;
                        if !buffer.is_empty() {
                            let line = buffer.split().freeze();
                            return Some((Ok(line), (stream, buffer, finished)));
                        }
                        return None;
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::convert::Infallible;

    fn byte_source(chunks: Vec<&'static [u8]>) -> impl Stream<Item = Result<Bytes, Infallible>> {
        futures_util::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))))
    }

    #[test]
    fn frame_helpers() {
        assert_eq!(openai_sse_frame("{}"), "data: {}\n\n");
        assert_eq!(
            named_sse_frame("image_generation.completed", "{}"),
            "event: image_generation.completed\ndata: {}\n\n"
        );
        assert!(is_done_frame(&done_frame()));
        assert!(!is_done_frame("data: {}\n\n"));
    }

    #[tokio::test]
    async fn splits_lines_within_one_chunk() {
        let lines: Vec<_> = json_line_stream(byte_source(vec![b"{\"a\":1}\n{\"b\":2}\n"]))
            .collect()
            .await;
        let lines: Vec<Bytes> = lines.into_iter().map(|l| l.expect("line")).collect();
        assert_eq!(lines, vec![Bytes::from_static(b"{\"a\":1}"), Bytes::from_static(b"{\"b\":2}")]);
    }

    #[tokio::test]
    async fn reassembles_lines_across_chunk_boundaries() {
        let lines: Vec<_> = json_line_stream(byte_source(vec![b"{\"a\"", b":1}\r\n{\"b\"", b":2}\n"]))
            .collect()
            .await;
        let lines: Vec<Bytes> = lines.into_iter().map(|l| l.expect("line")).collect();
        assert_eq!(lines, vec![Bytes::from_static(b"{\"a\":1}"), Bytes::from_static(b"{\"b\":2}")]);
    }

    #[tokio::test]
    async fn yields_unterminated_tail_on_end() {
        let lines: Vec<_> = json_line_stream(byte_source(vec![b"{\"a\":1}\n{\"tail\"", b":true}"]))
            .collect()
            .await;
        let lines: Vec<Bytes> = lines.into_iter().map(|l| l.expect("line")).collect();
        assert_eq!(
            lines,
            vec![Bytes::from_static(b"{\"a\":1}"), Bytes::from_static(b"{\"tail\":true}")]
        );
    }

    #[tokio::test]
    async fn classifies_transport_error_and_stops() {
        let source = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"{\"a\":1}\n")),
            Err("HTTP/2 stream reset"),
        ]);
        let items: Vec<_> = json_line_stream(source).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(EngineError::UpstreamClosed(_))));
    }
}
