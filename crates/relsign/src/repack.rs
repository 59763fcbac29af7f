#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use tracing::{debug, info};
use zip::ZipWriter;
use zip::read::ZipFile;
use zip::write::SimpleFileOptions;

use crate::archive::{Archive, ArchiveKind};
use crate::container::first_error;
use crate::container::targz::{self, GzipHeader, TarBody, TarEntries};
use crate::container::zip::ZipEntries;
use crate::error::{EntryError, StageError};
use crate::request::{RequestKind, SignRequest};

/// Rebuilds `archive` with the signed bytes of every entry request
/// substituted in, and publishes it at
/// [`Archive::repacked_path`](crate::Archive::repacked_path).
///
/// Entries without a request are copied verbatim, header and data. The new
/// archive is written to a temporary file in `destination` and only renamed
/// into place once it is complete, so a failure never leaves a truncated
/// file at the published path.
pub fn repack(
    archive: &Archive,
    requests: &[SignRequest],
    destination: &Path,
) -> Result<PathBuf, StageError> {
    let fail = |source: EntryError| StageError::RepackFailed {
        archive: archive.path().to_path_buf(),
        source,
    };

    let target = archive.repacked_path(destination);
    let mut substitutions = Substitutions::new(archive, requests);
    write_atomically(archive.name(), destination, &target, |file| {
        let out = BufWriter::new(file);
        let written = match archive.kind() {
            ArchiveKind::Zip => repack_zip(archive, &mut substitutions, out).and_then(flush),
            ArchiveKind::TarGz => repack_tar_gz(archive, &mut substitutions, out).and_then(flush),
        };
        written?;
        substitutions.finish()
    })
    .map_err(fail)?;

    info!(
        archive = %archive.path().display(),
        output = %target.display(),
        "repacked archive with signed content"
    );
    Ok(target)
}

/// Runs `write` against a `.partial` file in `destination` and renames it to
/// `target` only once `write` succeeded and the data reached the disk. The
/// temporary file is removed on every failure path.
fn write_atomically<F>(
    name: &str,
    destination: &Path,
    target: &Path,
    write: F,
) -> Result<(), EntryError>
where
    F: FnOnce(&mut File) -> Result<(), EntryError>,
{
    fs::create_dir_all(destination)?;
    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".partial")
        .tempfile_in(destination)?;

    write(temp.as_file_mut())?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|err| err.error)?;
    Ok(())
}

/// Signed replacements keyed by entry name.
struct Substitutions<'r> {
    signed: BTreeMap<&'r str, &'r Path>,
    used: BTreeSet<&'r str>,
}

impl<'r> Substitutions<'r> {
    fn new(archive: &Archive, requests: &'r [SignRequest]) -> Self {
        let signed = requests
            .iter()
            .filter(|request| request.kind == RequestKind::Entry && request.archive == archive.path())
            .filter_map(|request| Some((request.entry.as_deref()?, request.path.as_path())))
            .collect();

        Self {
            signed,
            used: BTreeSet::new(),
        }
    }

    fn lookup(&mut self, name: &str) -> Option<&'r Path> {
        let (&key, &path) = self.signed.get_key_value(name)?;
        self.used.insert(key);
        debug!(entry = key, signed = %path.display(), "substituting signed entry");
        Some(path)
    }

    fn finish(self) -> Result<(), EntryError> {
        match self.signed.keys().find(|name| !self.used.contains(*name)) {
            Some(name) => Err(EntryError::UnmatchedRequest {
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn repack_zip<W: Write + Seek>(
    archive: &Archive,
    substitutions: &mut Substitutions<'_>,
    out: W,
) -> Result<W, EntryError> {
    let mut entries = ZipEntries::open(archive.path())?;
    let mut writer = ZipWriter::new(out);

    let copied = copy_zip_entries(&mut entries, &mut writer, substitutions);
    let closed = writer.finish().map_err(EntryError::from);
    first_error(copied, closed)
}

fn copy_zip_entries<R: Read + Seek, W: Write + Seek>(
    entries: &mut ZipEntries<R>,
    writer: &mut ZipWriter<W>,
    substitutions: &mut Substitutions<'_>,
) -> Result<(), EntryError> {
    writer.set_raw_comment(entries.comment().into());

    while let Some(meta) = entries.next() {
        let meta = meta?;
        let signed = if meta.is_file() {
            substitutions.lookup(&meta.name)
        } else {
            None
        };

        match signed {
            Some(path) => {
                let options = substitute_options(&entries.open_raw(&meta)?);
                let mut staged = File::open(path)?;
                let large = staged.metadata()?.len() >= u64::from(u32::MAX);
                writer.start_file(meta.name.as_str(), options.large_file(large))?;
                io::copy(&mut staged, writer)?;
            }
            None => writer.raw_copy_file(entries.open_raw(&meta)?)?,
        }
    }

    Ok(())
}

/// Options that keep the original entry's compression, timestamp and mode.
fn substitute_options<R: Read>(source: &ZipFile<'_, R>) -> SimpleFileOptions {
    let mut options = SimpleFileOptions::default().compression_method(source.compression());
    if let Some(modified) = source.last_modified() {
        options = options.last_modified_time(modified);
    }
    if let Some(mode) = source.unix_mode() {
        options = options.unix_permissions(mode);
    }
    options
}

fn repack_tar_gz<W: Write>(
    archive: &Archive,
    substitutions: &mut Substitutions<'_>,
    out: W,
) -> Result<W, EntryError> {
    let gzip = GzipHeader::read(archive.path())?;
    let mut source = targz::open(archive.path())?;
    let mut builder = tar::Builder::new(gzip.builder().write(out, Compression::default()));

    let copied = copy_tar_entries(&mut source, &mut builder, substitutions);
    let closed = builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(EntryError::from);
    first_error(copied, closed)
}

fn copy_tar_entries<R: Read, W: Write>(
    source: &mut tar::Archive<R>,
    builder: &mut tar::Builder<W>,
    substitutions: &mut Substitutions<'_>,
) -> Result<(), EntryError> {
    for item in TarEntries::new(source)? {
        let item = item?;
        match (item.meta, item.body) {
            (Some(meta), TarBody::Data(mut entry)) => {
                let signed = if meta.is_file() {
                    substitutions.lookup(&meta.name)
                } else {
                    None
                };

                match signed {
                    Some(path) => {
                        if item.pax_size {
                            return Err(EntryError::PaxSize { name: meta.name });
                        }
                        let staged = File::open(path)?;
                        let mut header = item.header;
                        header.set_size(staged.metadata()?.len());
                        header.set_cksum();
                        builder.append(&header, BufReader::new(staged))?;
                    }
                    None => builder.append(&item.header, &mut entry)?,
                }
            }
            (None, TarBody::Data(mut entry)) => builder.append(&item.header, &mut entry)?,
            (_, TarBody::Extension(data)) => builder.append(&item.header, data.as_slice())?,
        }
    }

    Ok(())
}

fn flush<W: Write>(writer: BufWriter<W>) -> Result<(), EntryError> {
    writer
        .into_inner()
        .map(drop)
        .map_err(|err| EntryError::Io(err.into_error()))
}
