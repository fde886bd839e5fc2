//! Small helpers for Telegram HTML parse mode.

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// `<code>`-wrapped, escaped text.
pub fn code(text: &str) -> String {
    format!("<code>{}</code>", escape_html(text))
}

/// Collapse newlines and cut to `max_chars` characters, appending `...`.
pub fn truncate_one_line(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").trim().to_string();
    if cleaned.chars().count() <= max_chars {
        return cleaned;
    }
    format!("{}...", cleaned.chars().take(max_chars).collect::<String>())
}

/// Compact human duration, e.g. `1h 02m`, `3m 05s`, `42s`.
pub fn format_elapsed(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html() {
        assert_eq!(escape_html("<b>&\"</b>"), "&lt;b&gt;&amp;&quot;&lt;/b&gt;");
        assert_eq!(code("a<b"), "<code>a&lt;b</code>");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_one_line("line one\nline two", 100), "line one line two");
        assert_eq!(truncate_one_line("ééééé", 3), "ééé...");
    }

    #[test]
    fn elapsed_formats() {
        assert_eq!(format_elapsed(42), "42s");
        assert_eq!(format_elapsed(185), "3m 05s");
        assert_eq!(format_elapsed(3720), "1h 02m");
    }
}
