//! Tag-span suppression for streamed text.
//!
//! Vendor streams interleave machine-readable tag spans (render cards,
//! artifacts, tool-usage cards) into the text channel. The streaming filter
//! is a character automaton that survives tag delimiters split across
//! arbitrary fragment boundaries; the whole-string variant serves collect
//! mode where the full text is already in hand.

use regex_lite::Regex;

/// Stateful streaming filter that drops configured tag spans.
///
/// State persists across [`TagFilter::feed`] calls for the lifetime of one
/// processor, so an opening delimiter in one fragment and its closing
/// delimiter several fragments later still form one suppressed span.
#[derive(Debug)]
pub struct TagFilter {
    open_markers: Vec<String>,
    close_markers: Vec<String>,
    in_tag: bool,
    buffer: String,
}

impl TagFilter {
    #[must_use]
    pub fn new(tags: &[String]) -> Self {
        Self {
            open_markers: tags.iter().map(|tag| format!("<{tag}")).collect(),
            close_markers: tags.iter().map(|tag| format!("</{tag}>")).collect(),
            in_tag: false,
            buffer: String::new(),
        }
    }

    /// Feed one text fragment; returns the fragment with tag spans removed.
    pub fn feed(&mut self, fragment: &str) -> String {
        if self.open_markers.is_empty() {
            return fragment.to_string();
        }

        let mut result = String::with_capacity(fragment.len());
        for (pos, ch) in fragment.char_indices() {
            if self.in_tag {
                self.buffer.push(ch);
                if ch == '>' && self.span_closed() {
                    self.in_tag = false;
                    self.buffer.clear();
                }
                continue;
            }

            if ch == '<' && self.starts_filtered_tag(&fragment[pos..]) {
                self.in_tag = true;
                self.buffer.clear();
                self.buffer.push(ch);
                continue;
            }

            result.push(ch);
        }
        result
    }

    /// Whether the buffered span ends at the `>` just consumed: either a
    /// self-closing tag or a recognized closing tag.
    fn span_closed(&self) -> bool {
        if self.buffer.contains("/>") {
            return true;
        }
        self.close_markers
            .iter()
            .any(|close| self.buffer.contains(close.as_str()))
    }

    /// Whether `remaining` begins a filtered opening tag, or is a prefix of
    /// one cut off by the fragment boundary.
    fn starts_filtered_tag(&self, remaining: &str) -> bool {
        self.open_markers
            .iter()
            .any(|open| remaining.starts_with(open.as_str()) || open.starts_with(remaining))
    }
}

/// Remove complete tag spans from a fully-buffered string (collect mode).
///
/// Matches `<tag ...>...</tag>` (non-greedy, across newlines) and the
/// self-closing `<tag ... />` form for each configured tag.
#[must_use]
pub fn strip_tag_spans(content: &str, tags: &[String]) -> String {
    if content.is_empty() || tags.is_empty() {
        return content.to_string();
    }

    let mut result = content.to_string();
    for tag in tags {
        let escaped = regex_lite::escape(tag);
        let pattern = format!("(?s)<{escaped}[^>]*>.*?</{escaped}>|<{escaped}[^>]*/>");
        if let Ok(re) = Regex::new(&pattern) {
            result = re.replace_all(&result, "").into_owned();
        }
    }
    result
}
