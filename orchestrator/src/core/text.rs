//! Text helpers: bounded copies for step records, lenient decoding of
//! artifacts written by external tools.

use std::borrow::Cow;

use encoding_rs::SHIFT_JIS;

pub const TRUNCATION_MARKER: &str = "...(truncated)";

/// Cut `text` to at most `limit` bytes (on a char boundary) and append the
/// truncation marker. Short text is returned unchanged.
pub fn truncate_text(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{TRUNCATION_MARKER}", &text[..end])
}

/// Decode text written by an arbitrary tool, trying in order:
/// 1. UTF-8 (a leading BOM is dropped)
/// 2. UTF-16 announced by a BOM (LE or BE)
/// 3. BOM-less UTF-16LE, when the bytes hold a NUL (Windows shells)
/// 4. Shift_JIS (cp932)
/// 5. BOM-less UTF-16LE without the NUL hint
///
/// Every step is strict; invalid sequences move on to the next encoding.
/// Shift_JIS text carries no NUL bytes, so NUL-bearing input is tried as
/// UTF-16LE first.
pub fn decode_text(bytes: &[u8]) -> Option<String> {
    let without_bom = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(without_bom) {
        return Some(text.to_string());
    }
    if let Some(rest) = bytes.strip_prefix(b"\xFF\xFE") {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(b"\xFE\xFF") {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    let shift_jis = || {
        SHIFT_JIS
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(Cow::into_owned)
    };
    if bytes.contains(&0) {
        decode_utf16(bytes, u16::from_le_bytes).or_else(shift_jis)
    } else {
        shift_jis().or_else(|| decode_utf16(bytes, u16::from_le_bytes))
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_unchanged() {
        assert_eq!(truncate_text("abc", 3), "abc");
    }

    #[test]
    fn long_text_gets_marker() {
        assert_eq!(truncate_text("abcdef", 3), "abc...(truncated)");
    }

    #[test]
    fn cuts_on_char_boundary() {
        // "合" is three bytes.
        assert_eq!(truncate_text("合計", 4), "合...(truncated)");
    }

    #[test]
    fn utf8_bom_is_ignored() {
        assert_eq!(decode_text(b"\xEF\xBB\xBFhi").as_deref(), Some("hi"));
    }

    #[test]
    fn utf16_big_endian_needs_bom() {
        let bytes = [0xFE, 0xFF, 0x00, 0x68, 0x00, 0x69];
        assert_eq!(decode_text(&bytes).as_deref(), Some("hi"));
    }

    #[test]
    fn cp932_markers_decode() {
        // "合計: 1200" as written by a Japanese-locale Windows tool.
        let (bytes, _, had_errors) = SHIFT_JIS.encode("合計: 1200\r\n");
        assert!(!had_errors);
        assert_eq!(decode_text(&bytes).as_deref(), Some("合計: 1200\r\n"));
    }

    #[test]
    fn bomless_utf16le_with_ascii_wins_over_cp932() {
        let bytes: Vec<u8> = "件数: 4\n"
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        assert_eq!(decode_text(&bytes).as_deref(), Some("件数: 4\n"));
    }

    #[test]
    fn invalid_everywhere_is_none() {
        // Odd length, invalid UTF-8, 0xFF is not a Shift_JIS byte.
        assert_eq!(decode_text(&[0xC3, 0x28, 0xFF]), None);
    }
}
