//! Idle-timeout guard for upstream item streams.

use std::time::Duration;

use futures_util::Stream;

use crate::error::EngineError;

/// Wrap a stream with an inter-item idle timeout.
///
/// Every `next()` races against the idle window; receiving an item resets
/// the timer. On breach, one [`EngineError::IdleTimeout`] is yielded and the
/// stream stops producing. A window `<= 0` disables the guard: the source
/// passes through untouched, with no timer armed.
pub fn idle_guard<S, T>(
    stream: S,
    idle_timeout_secs: f64,
) -> impl Stream<Item = Result<T, EngineError>> + Send
where
    S: Stream<Item = Result<T, EngineError>> + Send + 'static,
    T: Send + 'static,
{
    use futures_util::StreamExt;

    let window = (idle_timeout_secs > 0.0).then(|| Duration::from_secs_f64(idle_timeout_secs));

    futures_util::stream::unfold(
        (Box::pin(stream), window, false),
        |(mut stream, window, mut tripped)| async move {
            if tripped {
                return None;
            }

            let next = match window {
                Some(limit) => match tokio::time::timeout(limit, stream.as_mut().next()).await {
                    Ok(item) => item,
                    Err(_) => {
                        tripped = true;
                        let idle_seconds = limit.as_secs_f64();
                        tracing::warn!(idle_seconds, "upstream stream idle timeout");
                        return Some((
                            Err(EngineError::IdleTimeout { idle_seconds }),
                            (stream, window, tripped),
                        ));
                    }
                },
                None => stream.as_mut().next().await,
            };

            next.map(|item| (item, (stream, window, tripped)))
        },
    )
}
