//! Conversions between presentation strings and native local encodings

/// Path separator of UTF-8 local encodings
pub const UTF8_SEPARATOR: &[u8] = b"/";

/// Path separator of UTF-16LE local encodings (`\` as one code unit)
pub const UTF16LE_SEPARATOR: &[u8] = &[b'\\', 0];

/// Encode a presentation string as UTF-16LE bytes
pub fn utf16le_from_str(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Decode UTF-16LE bytes, replacing unpaired surrogates
///
/// A trailing odd byte is not part of any code unit and is dropped.
pub fn utf16le_to_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Decode UTF-8 local bytes, replacing invalid sequences
pub fn utf8_to_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16le_roundtrip_non_bmp() {
        let s = "dir\\caf\u{e9} \u{1f600}";
        let bytes = utf16le_from_str(s);
        assert_eq!(bytes.len() % 2, 0);
        assert_eq!(utf16le_to_string(&bytes), s);
    }

    #[test]
    fn test_utf16le_separator_encoding() {
        assert_eq!(utf16le_from_str("\\"), UTF16LE_SEPARATOR);
    }

    #[test]
    fn test_utf16le_odd_trailing_byte_dropped() {
        let mut bytes = utf16le_from_str("ab");
        bytes.push(0x41);
        assert_eq!(utf16le_to_string(&bytes), "ab");
    }
}
