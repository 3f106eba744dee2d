//! Filesystem stand-ins with fixed encodings for unit tests

use crate::encoding::{self, UTF16LE_SEPARATOR, UTF8_SEPARATOR};
use crate::file::FileAccess;
use crate::fs::FileSystemAccess;
use crate::path::LocalPath;
use crate::platform::NativeSysFile;
use crate::waiter::Waiter;
use std::sync::Arc;

/// UTF-8 encoding with a one-byte `/` separator
pub(crate) struct Utf8Fs;

/// UTF-16LE encoding with a two-byte `\` separator
pub(crate) struct Utf16Fs;

pub(crate) fn posix() -> Utf8Fs {
    Utf8Fs
}

pub(crate) fn utf16(s: &str) -> Vec<u8> {
    encoding::utf16le_from_str(s)
}

impl FileSystemAccess for Utf8Fs {
    fn local_separator(&self) -> &[u8] {
        UTF8_SEPARATOR
    }

    fn path2local(&self, path: &str) -> Vec<u8> {
        path.as_bytes().to_vec()
    }

    fn local2path(&self, local: &[u8]) -> String {
        encoding::utf8_to_string(local)
    }

    fn tmp_name_local(&self) -> LocalPath {
        LocalPath::from_local_bytes(".tmp")
    }

    fn new_file_access(&self, waiter: &Waiter) -> FileAccess {
        FileAccess::new(Arc::new(NativeSysFile::without_async()), waiter.clone())
    }
}

impl FileSystemAccess for Utf16Fs {
    fn local_separator(&self) -> &[u8] {
        UTF16LE_SEPARATOR
    }

    fn path2local(&self, path: &str) -> Vec<u8> {
        encoding::utf16le_from_str(path)
    }

    fn local2path(&self, local: &[u8]) -> String {
        encoding::utf16le_to_string(local)
    }

    fn tmp_name_local(&self) -> LocalPath {
        LocalPath::from_local_bytes(utf16(".tmp"))
    }

    fn new_file_access(&self, waiter: &Waiter) -> FileAccess {
        FileAccess::new(Arc::new(NativeSysFile::without_async()), waiter.clone())
    }
}
