//! Response normalization processors.
//!
//! One processor instance serves exactly one upstream response. The stream
//! processors transcode upstream events into SSE frames as they arrive; the
//! collect processors fold the whole stream into a single value. Both run on
//! the shared drivers below, which handle line decoding, the idle guard, and
//! error delivery so the processors only see decoded events.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::error::EngineError;
use crate::protocol::upstream::{decode_line, UpstreamResponse};
use crate::stream::idle_guard;

pub mod image;
pub mod text;
pub mod video;

pub use image::{ImageCollectProcessor, ImageStreamProcessor};
pub use text::{TextCollectProcessor, TextStreamProcessor};
pub use video::{VideoCollectProcessor, VideoStreamProcessor};

/// Per-event behavior of a streaming processor.
///
/// `on_event` receives one decoded upstream event and appends any SSE frames
/// it produces; `on_finish` runs once after the source ends cleanly.
pub(crate) trait EventHandler: Send {
    fn idle_timeout_secs(&self) -> f64;

    fn on_event(
        &mut self,
        event: UpstreamResponse,
        out: &mut Vec<String>,
    ) -> impl Future<Output = ()> + Send;

    fn on_finish(&mut self, out: &mut Vec<String>) -> impl Future<Output = ()> + Send;
}

/// Drive an [`EventHandler`] over an upstream line stream.
///
/// Lines that are empty or fail to decode are skipped. An error item (idle
/// timeout included) is yielded as the final stream item; the finish frames
/// are not emitted in that case.
pub(crate) fn frame_stream<H, S>(
    handler: H,
    lines: S,
) -> impl Stream<Item = Result<String, EngineError>> + Send
where
    H: EventHandler + 'static,
    S: Stream<Item = Result<Bytes, EngineError>> + Send + 'static,
{
    let guarded: Pin<Box<dyn Stream<Item = Result<Bytes, EngineError>> + Send>> =
        Box::pin(idle_guard(lines, handler.idle_timeout_secs()));

    futures_util::stream::unfold(
        (handler, guarded, VecDeque::<String>::new(), false, false),
        |(mut handler, mut source, mut pending, mut finished, mut done)| async move {
            loop {
                if let Some(frame) = pending.pop_front() {
                    return Some((Ok(frame), (handler, source, pending, finished, done)));
                }
                if done {
                    return None;
                }
                if finished {
                    let mut out = Vec::new();
                    handler.on_finish(&mut out).await;
                    pending.extend(out);
                    done = true;
                    continue;
                }

                match source.as_mut().next().await {
                    Some(Ok(line)) => {
                        if line.is_empty() {
                            continue;
                        }
                        if let Some(event) = decode_line(&line) {
                            let mut out = Vec::new();
                            handler.on_event(event, &mut out).await;
                            pending.extend(out);
                        }
                    }
                    Some(Err(err)) => {
                        done = true;
                        return Some((Err(err), (handler, source, pending, finished, done)));
                    }
                    None => finished = true,
                }
            }
        },
    )
}

/// Per-event behavior of a collect processor.
pub(crate) trait CollectHandler: Send {
    fn idle_timeout_secs(&self) -> f64;

    fn on_event(&mut self, event: UpstreamResponse) -> impl Future<Output = ()> + Send;

    /// Short label for log lines.
    fn context(&self) -> &'static str;
}

/// Drive a [`CollectHandler`] over an upstream line stream.
///
/// Collect mode degrades instead of failing: on any stream error the partial
/// state accumulated so far is kept and the error is only logged.
pub(crate) async fn drive_collect<H, S>(handler: &mut H, lines: S)
where
    H: CollectHandler,
    S: Stream<Item = Result<Bytes, EngineError>> + Send + 'static,
{
    let guarded = idle_guard(lines, handler.idle_timeout_secs());
    let mut guarded = std::pin::pin!(guarded);

    while let Some(item) = guarded.next().await {
        match item {
            Ok(line) => {
                if line.is_empty() {
                    continue;
                }
                if let Some(event) = decode_line(&line) {
                    handler.on_event(event).await;
                }
            }
            Err(err) => {
                match &err {
                    EngineError::IdleTimeout { .. } | EngineError::UpstreamClosed(_) => {
                        tracing::warn!(
                            context = handler.context(),
                            error = %err,
                            "collect aborted, keeping partial result"
                        );
                    }
                    _ => {
                        tracing::error!(
                            context = handler.context(),
                            error = %err,
                            "collect failed, keeping partial result"
                        );
                    }
                }
                break;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Build an upstream line stream from raw JSON lines.
    pub fn lines(raw: &[&str]) -> impl Stream<Item = Result<Bytes, EngineError>> + Send {
        let owned: Vec<Result<Bytes, EngineError>> = raw
            .iter()
            .map(|line| Ok(Bytes::from(line.to_string())))
            .collect();
        futures_util::stream::iter(owned)
    }

    /// A line stream that ends in a transport error.
    pub fn failing_lines(
        raw: &[&str],
        err: EngineError,
    ) -> impl Stream<Item = Result<Bytes, EngineError>> + Send {
        let mut items: Vec<Result<Bytes, EngineError>> = raw
            .iter()
            .map(|line| Ok(Bytes::from(line.to_string())))
            .collect();
        items.push(Err(err));
        futures_util::stream::iter(items)
    }

    /// A token event line.
    pub fn token_line(token: &str) -> String {
        serde_json::json!({
            "result": {"response": {"token": token, "isThinking": false}}
        })
        .to_string()
    }

    /// Extract the JSON payloads from `data:`-only SSE frames.
    pub fn frame_payloads(frames: &[String]) -> Vec<serde_json::Value> {
        frames
            .iter()
            .filter(|frame| !crate::stream::sse::is_done_frame(frame))
            .map(|frame| {
                let payload = frame.trim_start_matches("data: ").trim();
                serde_json::from_str(payload).expect("frame json")
            })
            .collect()
    }

    /// The delta contents carried by a frame sequence, in order.
    pub fn delta_contents(frames: &[String]) -> Vec<String> {
        frame_payloads(frames)
            .iter()
            .filter_map(|json| {
                json["choices"][0]["delta"]["content"]
                    .as_str()
                    .map(str::to_string)
            })
            .filter(|content| !content.is_empty())
            .collect()
    }
}
