//! Windows: UTF-16LE paths, `\` separator

use crate::encoding::{self, UTF16LE_SEPARATOR};
use crate::path::LocalPath;
use std::ffi::OsString;
use std::fs::{File, Metadata};
use std::io;
use std::os::windows::ffi::{OsStrExt, OsStringExt};
use std::os::windows::fs::FileExt;
use std::path::{Path, PathBuf};
use winapi_util::{file, Handle};

pub const SEPARATOR: &[u8] = UTF16LE_SEPARATOR;

pub fn path2local(path: &str) -> Vec<u8> {
    encoding::utf16le_from_str(path)
}

pub fn local2path(local: &[u8]) -> String {
    encoding::utf16le_to_string(local)
}

/// Convert a local path to an OS path without loss
pub fn local_to_os(path: &LocalPath) -> PathBuf {
    let units: Vec<u16> = path
        .as_bytes()
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    PathBuf::from(OsString::from_wide(&units))
}

/// Convert an OS path to a local path without loss
pub fn os_to_local(path: &Path) -> LocalPath {
    let bytes: Vec<u8> = path
        .as_os_str()
        .encode_wide()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    LocalPath::from_local_bytes(bytes)
}

fn information(path: &Path) -> Option<file::Information> {
    Handle::from_path_any(path).and_then(|handle| file::information(&handle)).ok()
}

// File indices need an open handle; stat alone cannot provide one
pub(crate) fn fsid(path: &Path, _meta: &Metadata) -> Option<u64> {
    information(path).map(|info| info.file_index())
}

/// Serial number of the volume holding `path`
pub fn volume_id(path: &Path, _meta: &Metadata) -> Option<u64> {
    information(path).map(|info| info.volume_serial_number())
}

pub(crate) fn read_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
    file.seek_read(buf, pos)
}

pub(crate) fn write_at(file: &File, data: &[u8], pos: u64) -> io::Result<usize> {
    file.seek_write(data, pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_index_and_volume_serial() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();
        let meta = std::fs::metadata(&a).unwrap();

        let id = fsid(&a, &meta);
        assert!(id.is_some());
        assert_eq!(fsid(&a, &meta), id);
        assert_ne!(fsid(&b, &std::fs::metadata(&b).unwrap()), id);
        assert!(fsid(dir.path(), &std::fs::metadata(dir.path()).unwrap()).is_some());

        assert!(volume_id(&a, &meta).is_some());
        assert_eq!(volume_id(&a, &meta), volume_id(&b, &meta));
    }
}
