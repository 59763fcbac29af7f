#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use zip::ZipArchive;
use zip::read::ZipFile;

use super::{EntryKind, EntryMeta};
use crate::error::EntryError;

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

/// Walks a zip archive in central-directory order.
pub struct ZipEntries<R> {
    archive: ZipArchive<R>,
    next: usize,
}

impl ZipEntries<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, EntryError> {
        let file = File::open(path)?;
        Ok(Self::new(ZipArchive::new(BufReader::new(file))?))
    }
}

impl<R: Read + Seek> ZipEntries<R> {
    pub fn new(archive: ZipArchive<R>) -> Self {
        Self { archive, next: 0 }
    }

    /// Decompressed contents of a previously yielded entry.
    pub fn open_entry(&mut self, meta: &EntryMeta) -> Result<ZipFile<'_, R>, EntryError> {
        Ok(self.archive.by_index(meta.index)?)
    }

    /// Still-compressed contents and header of a previously yielded entry.
    pub fn open_raw(&mut self, meta: &EntryMeta) -> Result<ZipFile<'_, R>, EntryError> {
        Ok(self.archive.by_index_raw(meta.index)?)
    }

    pub fn comment(&self) -> &[u8] {
        self.archive.comment()
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.is_empty()
    }
}

impl<R: Read + Seek> Iterator for ZipEntries<R> {
    type Item = Result<EntryMeta, EntryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.archive.len() {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let file = match self.archive.by_index_raw(index) {
            Ok(file) => file,
            Err(err) => return Some(Err(err.into())),
        };

        let mode = file.unix_mode();
        let kind = if file.is_dir() {
            EntryKind::Directory
        } else if mode.is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
            EntryKind::Link
        } else {
            EntryKind::File
        };

        Some(Ok(EntryMeta {
            index,
            name: file.name().to_string(),
            kind,
            mode,
            size: file.size(),
        }))
    }
}
