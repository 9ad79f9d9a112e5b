//! Replay detection for upstream token streams.
//!
//! The upstream occasionally resends a whole already-streamed block as one
//! fragment. A bounded rolling tail of emitted text catches these verbatim
//! suffix replays without buffering the full response.

/// Character-count floor below which a fragment is never treated as a
/// replay; short tokens legitimately repeat ("ha" "ha").
const MIN_REPLAY_CHARS: usize = 12;

/// Default bound on the rolling tail, in characters.
pub const DEFAULT_TAIL_LIMIT: usize = 8192;

#[derive(Debug)]
pub struct ReplayDetector {
    tail: String,
    limit: usize,
}

impl Default for ReplayDetector {
    fn default() -> Self {
        Self::new(DEFAULT_TAIL_LIMIT)
    }
}

impl ReplayDetector {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            tail: String::new(),
            limit,
        }
    }

    /// Whether `fragment` is a verbatim replay of the tail of emitted text.
    ///
    /// Both sides are compared with trailing line breaks stripped; fragments
    /// shorter than the floor are never replays.
    #[must_use]
    pub fn is_replay(&self, fragment: &str) -> bool {
        if fragment.is_empty() || self.tail.is_empty() {
            return false;
        }

        let normalized = fragment.trim_end_matches(['\r', '\n']);
        if normalized.chars().count() < MIN_REPLAY_CHARS {
            return false;
        }

        self.tail.trim_end_matches(['\r', '\n']).ends_with(normalized)
    }

    /// Record emitted text into the rolling tail, truncating from the front
    /// to the configured bound.
    pub fn record(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.tail.push_str(text);

        let total = self.tail.chars().count();
        if total > self.limit {
            let excess = total - self.limit;
            if let Some((cut, _)) = self.tail.char_indices().nth(excess) {
                self.tail.drain(..cut);
            }
        }
    }
}
