//! Filesystem capability object
//!
//! One `FileSystemAccess` exists per client session and is shared by
//! reference with every collaborator. The platform supplies the separator,
//! the encoding conversions and the `FileAccess` factory; escaping,
//! normalization and timestamp capping are pure transforms shared by all
//! platforms.

use crate::file::FileAccess;
use crate::path::LocalPath;
use crate::waiter::Waiter;
use std::fmt::Write;
use unicode_normalization::UnicodeNormalization;

/// Characters that may not appear in a local filesystem name
const FS_INCOMPATIBLE: &[u8] = b"\\/:?\"<>|*";

/// Whether byte `c` may appear in a local filesystem name
pub fn is_local_fs_compatible(c: u8) -> bool {
    c >= b' ' && !FS_INCOMPATIBLE.contains(&c)
}

/// Whether `c` is a lowercase hex digit
pub fn is_lc_hex(c: u8) -> bool {
    c.is_ascii_digit() || (b'a'..=b'f').contains(&c)
}

fn lc_hex_value(c: u8) -> u8 {
    if c.is_ascii_digit() {
        c - b'0'
    } else {
        c - b'a' + 10
    }
}

/// Replace incompatible characters with `%xx` escapes
///
/// The names "." and ".." are replaced wholesale so they can never be
/// confused with directory references.
pub fn escape_fs_incompatible(name: &str) -> String {
    match name {
        ".." => return "%2e%2e".to_string(),
        "." => return "%2e".to_string(),
        _ => {}
    }

    let mut escaped = String::with_capacity(name.len());
    for ch in name.chars() {
        // Incompatible characters are all ASCII; multi-byte UTF-8 passes through
        if ch.is_ascii() && !is_local_fs_compatible(ch as u8) {
            let _ = write!(escaped, "%{:02x}", ch as u8);
        } else {
            escaped.push(ch);
        }
    }
    escaped
}

/// Inverse of [`escape_fs_incompatible`]
///
/// A `%xx` triplet is only decoded when both digits are lowercase hex and the
/// decoded byte is itself incompatible, so a literal "%" followed by
/// coincidental hex digits survives.
pub fn unescape_fs_incompatible(name: &str) -> String {
    match name {
        "%2e%2e" => return "..".to_string(),
        "%2e" => return ".".to_string(),
        _ => {}
    }

    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && is_lc_hex(bytes[i + 1])
            && is_lc_hex(bytes[i + 2])
        {
            let c = (lc_hex_value(bytes[i + 1]) << 4) | lc_hex_value(bytes[i + 2]);
            if !is_local_fs_compatible(c) {
                out.push(c);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    // Decoded bytes are ASCII, so the result is still valid UTF-8
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// NFC-normalize each NUL-separated run of `name` in place
///
/// NUL separators are preserved. If any run is not valid UTF-8 the whole
/// buffer is cleared, which callers treat as an unrepresentable name.
pub fn normalize(name: &mut Vec<u8>) {
    let mut result = Vec::with_capacity(name.len());
    for (i, run) in name.split(|&b| b == 0).enumerate() {
        if i > 0 {
            result.push(0);
        }
        match std::str::from_utf8(run) {
            Ok(s) => result.extend(s.nfc().collect::<String>().into_bytes()),
            Err(_) => {
                name.clear();
                return;
            }
        }
    }
    *name = result;
}

/// Clamp a timestamp to the unsigned 32-bit range
///
/// Out-of-range values are saturated rather than rejected.
pub fn cap_timestamp(t: i64) -> i64 {
    t.clamp(0, u32::MAX as i64)
}

/// Capability set of the local filesystem, one implementation per platform
pub trait FileSystemAccess: Send + Sync {
    /// Separator sequence in local encoding
    fn local_separator(&self) -> &[u8];

    /// Convert a presentation path to local encoding (no escaping)
    fn path2local(&self, path: &str) -> Vec<u8>;

    /// Convert local bytes to presentation form (no unescaping)
    fn local2path(&self, local: &[u8]) -> String;

    /// A fresh name for a temporary file
    fn tmp_name_local(&self) -> LocalPath;

    /// New file handle whose async completions signal `waiter`
    fn new_file_access(&self, waiter: &Waiter) -> FileAccess;

    fn is_local_fs_compatible(&self, c: u8) -> bool {
        is_local_fs_compatible(c)
    }

    fn is_lc_hex(&self, c: u8) -> bool {
        is_lc_hex(c)
    }

    fn escape_fs_incompatible(&self, name: &str) -> String {
        escape_fs_incompatible(name)
    }

    fn unescape_fs_incompatible(&self, name: &str) -> String {
        unescape_fs_incompatible(name)
    }

    /// Escape forbidden characters, then convert to local encoding
    fn name2local(&self, name: &str) -> LocalPath {
        LocalPath::from_local_bytes(self.path2local(&self.escape_fs_incompatible(name)))
    }

    /// Convert from local encoding, then unescape forbidden characters
    fn local2name(&self, local: &LocalPath) -> String {
        self.unescape_fs_incompatible(&self.local2path(local.as_bytes()))
    }

    fn normalize(&self, name: &mut Vec<u8>) {
        normalize(name)
    }

    fn cap_timestamp(&self, t: i64) -> i64 {
        cap_timestamp(t)
    }
}
