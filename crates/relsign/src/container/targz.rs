#![forbid(unsafe_code)]

//! Raw walker over gzip-compressed tarballs.
//!
//! The walk runs in raw mode: GNU long-name/long-link records and PAX
//! extended headers come back as their own items, so a rewrite can copy them
//! byte-for-byte. The logical name of each real entry is resolved here from
//! PAX `path`, then a GNU long name, then the ustar name and prefix.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use flate2::GzBuilder;
use flate2::read::MultiGzDecoder;
use tar::{Archive as TarArchive, Entries, Entry, EntryType, Header};

use super::{EntryKind, EntryMeta};

pub type GzReader = MultiGzDecoder<BufReader<File>>;

pub fn open(path: &Path) -> io::Result<TarArchive<GzReader>> {
    let file = File::open(path)?;
    Ok(TarArchive::new(MultiGzDecoder::new(BufReader::new(file))))
}

/// Gzip member header fields carried over to a rewritten tarball.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GzipHeader {
    pub mtime: u32,
    pub filename: Option<Vec<u8>>,
    pub operating_system: u8,
}

impl GzipHeader {
    pub fn read(path: &Path) -> io::Result<Self> {
        let mut decoder = MultiGzDecoder::new(BufReader::new(File::open(path)?));
        // The header is parsed on first read.
        io::copy(&mut decoder.by_ref().take(1), &mut io::sink())?;

        Ok(decoder
            .header()
            .map(|header| Self {
                mtime: header.mtime(),
                filename: header.filename().map(<[u8]>::to_vec),
                operating_system: header.operating_system(),
            })
            .unwrap_or_default())
    }

    pub fn builder(&self) -> GzBuilder {
        let builder = GzBuilder::new()
            .mtime(self.mtime)
            .operating_system(self.operating_system);
        match &self.filename {
            Some(name) => builder.filename(name.clone()),
            None => builder,
        }
    }
}

pub enum TarBody<'a, R: Read> {
    /// Payload of a GNU long-name/long-link record or a PAX header.
    Extension(Vec<u8>),
    /// A real entry whose data has not been read yet.
    Data(Entry<'a, R>),
}

pub struct TarItem<'a, R: Read> {
    /// The raw header as stored in the archive.
    pub header: Header,
    /// `None` for extension records.
    pub meta: Option<EntryMeta>,
    /// Whether a preceding PAX header overrides this entry's size.
    pub pax_size: bool,
    pub body: TarBody<'a, R>,
}

pub struct TarEntries<'a, R: Read> {
    inner: Entries<'a, R>,
    index: usize,
    pending_name: Option<String>,
    pending_size: bool,
}

impl<'a, R: Read> TarEntries<'a, R> {
    pub fn new(archive: &'a mut TarArchive<R>) -> io::Result<Self> {
        Ok(Self {
            inner: archive.entries()?.raw(true),
            index: 0,
            pending_name: None,
            pending_size: false,
        })
    }

    fn resolve(&mut self, mut entry: Entry<'a, R>) -> io::Result<TarItem<'a, R>> {
        let header = entry.header().clone();
        let entry_type = header.entry_type();

        if is_extension(entry_type) {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;

            if entry_type.is_gnu_longname() {
                self.pending_name = Some(String::from_utf8_lossy(trim_nul(&data)).into_owned());
            } else if entry_type.is_pax_local_extensions() {
                for (key, value) in pax_records(&data) {
                    match key {
                        b"path" => {
                            self.pending_name = Some(String::from_utf8_lossy(value).into_owned())
                        }
                        b"size" => self.pending_size = true,
                        _ => {}
                    }
                }
            }

            return Ok(TarItem {
                header,
                meta: None,
                pax_size: false,
                body: TarBody::Extension(data),
            });
        }

        let name = match self.pending_name.take() {
            Some(name) => name,
            None => String::from_utf8_lossy(&header.path_bytes()).into_owned(),
        };
        let index = self.index;
        self.index += 1;

        let meta = EntryMeta {
            index,
            name,
            kind: entry_kind(entry_type),
            mode: header.mode().ok(),
            size: header.size().unwrap_or(0),
        };

        Ok(TarItem {
            header,
            meta: Some(meta),
            pax_size: std::mem::take(&mut self.pending_size),
            body: TarBody::Data(entry),
        })
    }
}

impl<'a, R: Read> Iterator for TarEntries<'a, R> {
    type Item = io::Result<TarItem<'a, R>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok(entry) => Some(self.resolve(entry)),
            Err(err) => Some(Err(err)),
        }
    }
}

fn is_extension(entry_type: EntryType) -> bool {
    entry_type.is_gnu_longname()
        || entry_type.is_gnu_longlink()
        || entry_type.is_pax_local_extensions()
        || entry_type.is_pax_global_extensions()
}

fn entry_kind(entry_type: EntryType) -> EntryKind {
    if entry_type.is_file() || entry_type == EntryType::Continuous {
        EntryKind::File
    } else if entry_type.is_dir() {
        EntryKind::Directory
    } else if entry_type.is_symlink() || entry_type.is_hard_link() {
        EntryKind::Link
    } else {
        EntryKind::Other
    }
}

fn trim_nul(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|byte| *byte != 0)
        .map_or(0, |last| last + 1);
    &data[..end]
}

/// Parses `"<len> <key>=<value>\n"` records, stopping at the first malformed one.
fn pax_records(data: &[u8]) -> Vec<(&[u8], &[u8])> {
    let mut records = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        let Some(space) = rest.iter().position(|byte| *byte == b' ') else {
            break;
        };
        let Some(len) = std::str::from_utf8(&rest[..space])
            .ok()
            .and_then(|digits| digits.parse::<usize>().ok())
        else {
            break;
        };
        if len <= space + 1 || len > rest.len() {
            break;
        }

        let record = &rest[space + 1..len];
        let record = record.strip_suffix(b"\n").unwrap_or(record);
        if let Some(eq) = record.iter().position(|byte| *byte == b'=') {
            records.push((&record[..eq], &record[eq + 1..]));
        }
        rest = &rest[len..];
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pax_records_are_parsed() {
        let data = b"32 path=go/bin/a-very-long-name\n12 size=100\n";
        let records = pax_records(data);
        assert_eq!(
            records,
            vec![
                (&b"path"[..], &b"go/bin/a-very-long-name"[..]),
                (&b"size"[..], &b"100"[..]),
            ]
        );
    }

    #[test]
    fn malformed_pax_data_stops_parsing() {
        assert!(pax_records(b"garbage").is_empty());
        assert!(pax_records(b"999 path=x\n").is_empty());
    }

    #[test]
    fn long_names_are_trimmed() {
        assert_eq!(trim_nul(b"go/bin/go\0\0"), b"go/bin/go");
        assert_eq!(trim_nul(b"\0"), b"");
    }
}
