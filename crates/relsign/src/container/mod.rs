#![forbid(unsafe_code)]

//! Sequential walkers over the two supported container formats.
//!
//! Both walkers visit entries in on-disk order and hand back owned metadata,
//! so a stage can inspect an entry, decide what to do with it, and stop at
//! the first error without any callback plumbing.

pub mod targz;
pub mod zip;

use crate::error::EntryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Link,
    Other,
}

/// Metadata of one record inside an archive, valid for the duration of a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    /// Position of the entry within the container.
    pub index: usize,
    pub name: String,
    pub kind: EntryKind,
    pub mode: Option<u32>,
    pub size: u64,
}

impl EntryMeta {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Merges the result of writing an archive with the result of closing its
/// streams. The first error is reported; a close error only surfaces when
/// everything before it succeeded. A successful close hands back the
/// underlying writer.
pub(crate) fn first_error<W>(
    body: Result<(), EntryError>,
    close: Result<W, EntryError>,
) -> Result<W, EntryError> {
    match (body, close) {
        (Err(err), _) => Err(err),
        (Ok(()), close) => close,
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    fn io_err(message: &str) -> EntryError {
        EntryError::Io(io::Error::other(message.to_string()))
    }

    #[test]
    fn body_error_wins_over_close_error() {
        let merged: Result<(), _> = first_error(Err(io_err("write")), Err(io_err("close")));
        assert_eq!(merged.expect_err("error").to_string(), "write");
    }

    #[test]
    fn close_error_surfaces_when_body_succeeded() {
        let merged: Result<(), _> = first_error(Ok(()), Err(io_err("close")));
        assert_eq!(merged.expect_err("error").to_string(), "close");
    }

    #[test]
    fn successful_close_hands_back_the_writer() {
        assert_eq!(first_error(Ok(()), Ok(7)).expect("ok"), 7);
    }
}
