//! Text-content checks for referenced files.

use std::path::Path;

/// Bytes inspected when sniffing for binary content.
pub const SNIFF_LEN: usize = 8 * 1024;

/// Whether the file extension (case-insensitive) is in `allowed`.
/// Files without an extension are not allowed.
pub fn has_allowed_extension(path: &Path, allowed: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

/// A NUL byte in the first [`SNIFF_LEN`] bytes marks content as binary.
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(SNIFF_LEN).any(|&b| b == 0)
}

/// Cut `bytes` to at most `max_len`, backing off to a UTF-8 character
/// boundary.
pub fn truncate_utf8(bytes: &[u8], max_len: usize) -> &[u8] {
    if bytes.len() <= max_len {
        return bytes;
    }
    let mut end = max_len;
    // Continuation bytes are 0b10xx_xxxx.
    while end > 0 && (bytes[end] & 0xC0) == 0x80 {
        end -= 1;
    }
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let allowed = exts(&["md", "rs"]);
        assert!(has_allowed_extension(Path::new("docs/README.MD"), &allowed));
        assert!(has_allowed_extension(Path::new("src/lib.rs"), &allowed));
        assert!(!has_allowed_extension(Path::new("logo.png"), &allowed));
        assert!(!has_allowed_extension(Path::new("Makefile"), &allowed));
    }

    #[test]
    fn nul_byte_means_binary() {
        assert!(looks_binary(b"PK\x03\x04\x00\x00"));
        assert!(!looks_binary("plain text ✓".as_bytes()));
    }

    #[test]
    fn nul_after_sniff_window_is_ignored() {
        let mut bytes = vec![b'a'; SNIFF_LEN];
        bytes.push(0);
        assert!(!looks_binary(&bytes));
    }

    #[test]
    fn truncate_backs_off_to_char_boundary() {
        let text = "aé"; // 'a' + 2-byte 'é'
        assert_eq!(truncate_utf8(text.as_bytes(), 2), b"a");
        assert_eq!(truncate_utf8(text.as_bytes(), 3), text.as_bytes());
        assert_eq!(truncate_utf8(b"hello", 3), b"hel");
    }
}
