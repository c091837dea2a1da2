//! Shared XML helpers for OOXML part parsing and generation.
//!
//! Attribute extraction handles namespace-prefixed attributes and UTF-8
//! conversion safely; the escaping helpers are used everywhere the engine
//! writes text or attribute content.

use quick_xml::events::BytesStart;

/// Extract a string attribute value by key.
///
/// Returns `None` if the attribute is missing or not valid UTF-8.
pub fn attr_string(e: &BytesStart, key: &[u8]) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == key {
            return std::str::from_utf8(&attr.value).ok().map(|s| s.to_string());
        }
    }
    None
}

/// Extract a string attribute by local name (ignoring namespace prefix).
pub fn attr_string_local(e: &BytesStart, key: &[u8]) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.local_name().as_ref() == key {
            return std::str::from_utf8(&attr.value).ok().map(|s| s.to_string());
        }
    }
    None
}

/// Extract a `u32` attribute value by key.
pub fn attr_u32(e: &BytesStart, key: &[u8]) -> Option<u32> {
    attr_string(e, key).and_then(|s| s.parse().ok())
}

/// Extract an `f64` attribute value by key.
pub fn attr_f64(e: &BytesStart, key: &[u8]) -> Option<f64> {
    attr_string(e, key).and_then(|s| s.parse().ok())
}

/// Extract a boolean attribute value by key.
///
/// Returns `None` if missing. Recognizes `"1"`, `"true"` as true; `"0"`, `"false"` as false.
pub fn attr_bool(e: &BytesStart, key: &[u8]) -> Option<bool> {
    attr_string(e, key).map(|s| matches!(s.as_str(), "1" | "true"))
}

/// Collect every attribute of an element as `(name, unescaped value)` pairs,
/// preserving document order. Used where elements are re-emitted with a few
/// attributes adjusted and the rest passed through.
pub fn attr_pairs(e: &BytesStart) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        if let Ok(value) = attr.unescape_value() {
            pairs.push((key, value.to_string()));
        }
    }
    pairs
}

/// Escape text for XML text or attribute content.
#[must_use]
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Unescape the five predefined XML entities.
#[must_use]
pub fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Push an XML attribute (` key="escaped"`) onto an output string.
pub fn push_attr(out: &mut String, key: &str, value: &str) {
    out.push(' ');
    out.push_str(key);
    out.push_str("=\"");
    out.push_str(&escape(value));
    out.push('"');
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn make_start(content: &str) -> BytesStart<'_> {
        BytesStart::from_content(content, content.find(' ').unwrap_or(content.len()))
    }

    #[test]
    fn extracts_attributes() {
        let e = make_start(r#"c r="B2" s="3" t="s""#);
        assert_eq!(attr_string(&e, b"r"), Some("B2".to_string()));
        assert_eq!(attr_u32(&e, b"s"), Some(3));
        assert_eq!(attr_string(&e, b"missing"), None);
    }

    #[test]
    fn extracts_local_names() {
        let e = make_start(r#"drawing r:id="rId2""#);
        assert_eq!(attr_string_local(&e, b"id"), Some("rId2".to_string()));
    }

    #[test]
    fn attr_pairs_preserve_order() {
        let e = make_start(r#"col min="1" max="3" width="12.5" customWidth="1""#);
        let pairs = attr_pairs(&e);
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["min", "max", "width", "customWidth"]);
    }

    #[test]
    fn escape_round_trip() {
        let raw = r#"a<b & "c" > 'd'"#;
        assert_eq!(unescape(&escape(raw)), raw);
        assert_eq!(escape("<&>"), "&lt;&amp;&gt;");
    }
}
