use std::time::{SystemTime, UNIX_EPOCH};

#[inline]
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

/// Generate a fresh OpenAI-style completion id (`chatcmpl-` + 24 hex chars).
pub(crate) fn fresh_chatcmpl_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("chatcmpl-{}", &hex[..24])
}

/// Escape text for embedding in an HTML attribute or body.
pub(crate) fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_id_shape() {
        let id = fresh_chatcmpl_id();
        assert!(id.starts_with("chatcmpl-"));
        assert_eq!(id.len(), "chatcmpl-".len() + 24);
    }

    #[test]
    fn escape_html_covers_attribute_context() {
        assert_eq!(
            escape_html(r#"a<b>&"c'"#),
            "a&lt;b&gt;&amp;&quot;c&#x27;"
        );
        assert_eq!(escape_html("plain/path.mp4"), "plain/path.mp4");
    }
}
