//! Cleanup of worker output before it is parsed.
//!
//! The worker is a script that may emit text with encoding artifacts:
//! raw bytes that are not valid UTF-8, or JSON `\uXXXX` escapes for a
//! lone UTF-16 surrogate (which `serde_json` rejects outright). Both are
//! stripped so the record still parses and its strings are surrogate-free.

use std::borrow::Cow;

/// Sanitize one raw output line into a string safe to hand to `serde_json`.
pub fn sanitize_line(raw: &[u8]) -> Cow<'_, str> {
    let text = match std::str::from_utf8(raw) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => Cow::Owned(drop_invalid_utf8(raw)),
    };

    if !text.contains("\\u") {
        return text;
    }

    match strip_lone_surrogate_escapes(&text) {
        Some(cleaned) => Cow::Owned(cleaned),
        None => text,
    }
}

fn drop_invalid_utf8(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    for chunk in raw.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}

fn is_high(unit: u16) -> bool {
    (0xD800..=0xDBFF).contains(&unit)
}

fn is_low(unit: u16) -> bool {
    (0xDC00..=0xDFFF).contains(&unit)
}

/// Parse a `\uXXXX` escape starting at `pos` (pointing at the backslash).
fn unicode_escape_at(bytes: &[u8], pos: usize) -> Option<u16> {
    let digits = bytes.get(pos + 2..pos + 6)?;
    if bytes.get(pos + 1) != Some(&b'u') {
        return None;
    }
    let digits = std::str::from_utf8(digits).ok()?;
    u16::from_str_radix(digits, 16).ok()
}

/// Returns `None` when nothing had to be removed.
fn strip_lone_surrogate_escapes(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut copied_from = 0;
    let mut changed = false;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' {
            i += 1;
            continue;
        }

        match unicode_escape_at(bytes, i) {
            Some(unit) if is_high(unit) => {
                let paired = unicode_escape_at(bytes, i + 6).is_some_and(is_low);
                if paired {
                    i += 12;
                } else {
                    out.push_str(&text[copied_from..i]);
                    i += 6;
                    copied_from = i;
                    changed = true;
                }
            }
            Some(unit) if is_low(unit) => {
                out.push_str(&text[copied_from..i]);
                i += 6;
                copied_from = i;
                changed = true;
            }
            Some(_) => i += 6,
            // Any other escape (including `\\`) is two bytes.
            None => i += 2,
        }
    }

    if !changed {
        return None;
    }
    out.push_str(&text[copied_from..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_line_is_borrowed() {
        let line = br#"{"id":1,"ok":true,"responseText":"hi"}"#;
        assert!(matches!(sanitize_line(line), Cow::Borrowed(_)));
    }

    #[test]
    fn test_lone_high_surrogate_removed() {
        let line = br#"{"responseText":"a\ud83db"}"#;
        assert_eq!(sanitize_line(line), r#"{"responseText":"ab"}"#);
    }

    #[test]
    fn test_lone_low_surrogate_removed() {
        let line = br#"{"t":"\uDE00x"}"#;
        assert_eq!(sanitize_line(line), r#"{"t":"x"}"#);
    }

    #[test]
    fn test_valid_pair_kept() {
        let line = br#"{"t":"\ud83d\ude00"}"#;
        let cleaned = sanitize_line(line);
        let value: serde_json::Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(value["t"], "😀");
    }

    #[test]
    fn test_escaped_backslash_not_treated_as_escape() {
        let line = br#"{"t":"C:\\ud800"}"#;
        assert!(matches!(sanitize_line(line), Cow::Borrowed(_)));
    }

    #[test]
    fn test_invalid_utf8_dropped() {
        // 0xED 0xA0 0x80 is a UTF-8-encoded surrogate, invalid in UTF-8.
        let mut line = b"{\"t\":\"a".to_vec();
        line.extend_from_slice(&[0xED, 0xA0, 0x80]);
        line.extend_from_slice("b한\"}".as_bytes());

        assert_eq!(sanitize_line(&line), "{\"t\":\"ab한\"}");
    }

    #[test]
    fn test_only_surrogates_yields_empty_string() {
        let line = br#"{"responseText":"\ud800\udfff"}"#;
        // High followed by low is a valid pair; reversed order is two lone units.
        let reversed = br#"{"responseText":"\udfff\ud800"}"#;

        assert!(matches!(sanitize_line(line), Cow::Borrowed(_)));
        assert_eq!(sanitize_line(reversed), r#"{"responseText":""}"#);
    }
}
