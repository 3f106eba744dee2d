//! Unix: UTF-8 paths, `/` separator, inode numbers as fsid

use crate::encoding::{self, UTF8_SEPARATOR};
use crate::path::LocalPath;
use std::ffi::OsStr;
use std::fs::{File, Metadata};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::{Path, PathBuf};

pub const SEPARATOR: &[u8] = UTF8_SEPARATOR;

pub fn path2local(path: &str) -> Vec<u8> {
    path.as_bytes().to_vec()
}

pub fn local2path(local: &[u8]) -> String {
    encoding::utf8_to_string(local)
}

/// Convert a local path to an OS path without loss
pub fn local_to_os(path: &LocalPath) -> PathBuf {
    PathBuf::from(OsStr::from_bytes(path.as_bytes()))
}

/// Convert an OS path to a local path without loss
pub fn os_to_local(path: &Path) -> LocalPath {
    LocalPath::from_local_bytes(path.as_os_str().as_bytes())
}

pub(crate) fn fsid(_path: &Path, meta: &Metadata) -> Option<u64> {
    Some(meta.ino())
}

/// Identifier of the volume holding `path`
pub fn volume_id(_path: &Path, meta: &Metadata) -> Option<u64> {
    Some(meta.dev())
}

pub(crate) fn read_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
    file.read_at(buf, pos)
}

pub(crate) fn write_at(file: &File, data: &[u8], pos: u64) -> io::Result<usize> {
    file.write_at(data, pos)
}
