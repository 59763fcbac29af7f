#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::archive::{Archive, ArchiveKind};
use crate::container::EntryMeta;
use crate::container::targz::{self, TarBody, TarEntries};
use crate::container::zip::ZipEntries;
use crate::error::{EntryError, StageError};
use crate::request::SignRequest;
use crate::select::Selector;

/// Stages every entry of `archive` that needs a signature and returns one
/// request per staged file.
///
/// The staging directory is created if missing and reused otherwise; staged
/// files are overwritten, so running this twice yields the same result. On
/// failure, files staged so far stay in place for inspection.
pub fn extract(archive: &Archive, selector: &Selector<'_>) -> Result<Vec<SignRequest>, StageError> {
    let fail = |source: EntryError| StageError::ExtractFailed {
        archive: archive.path().to_path_buf(),
        source,
    };

    fs::create_dir_all(archive.staging_dir()).map_err(|err| fail(err.into()))?;

    let requests = match archive.kind() {
        ArchiveKind::Zip => extract_zip(archive, selector),
        ArchiveKind::TarGz if archive.has_entry_rules() => extract_tar_gz(archive, selector),
        ArchiveKind::TarGz => Ok(Vec::new()),
    }
    .map_err(fail)?;

    info!(
        archive = %archive.path().display(),
        count = requests.len(),
        "staged entries for signing"
    );
    Ok(requests)
}

fn extract_zip(archive: &Archive, selector: &Selector<'_>) -> Result<Vec<SignRequest>, EntryError> {
    let mut entries = ZipEntries::open(archive.path())?;
    let mut staged = StagedSet::default();

    while let Some(meta) = entries.next() {
        let meta = meta?;
        let Some(request) = staged.select(selector, archive, &meta)? else {
            continue;
        };
        let mut reader = entries.open_entry(&meta)?;
        write_staged(&request.path, &mut reader)?;
        staged.push(request);
    }

    Ok(staged.requests)
}

fn extract_tar_gz(
    archive: &Archive,
    selector: &Selector<'_>,
) -> Result<Vec<SignRequest>, EntryError> {
    let mut source = targz::open(archive.path())?;
    let mut staged = StagedSet::default();

    for item in TarEntries::new(&mut source)? {
        let item = item?;
        let (Some(meta), TarBody::Data(mut entry)) = (item.meta, item.body) else {
            continue;
        };
        let Some(request) = staged.select(selector, archive, &meta)? else {
            continue;
        };
        write_staged(&request.path, &mut entry)?;
        staged.push(request);
    }

    Ok(staged.requests)
}

#[derive(Default)]
struct StagedSet {
    requests: Vec<SignRequest>,
    paths: HashSet<PathBuf>,
}

impl StagedSet {
    fn select(
        &self,
        selector: &Selector<'_>,
        archive: &Archive,
        meta: &EntryMeta,
    ) -> Result<Option<SignRequest>, EntryError> {
        if !meta.is_file() {
            return Ok(None);
        }
        let Some(request) = selector.select(archive, &meta.name)? else {
            debug!(entry = %meta.name, "entry left unsigned");
            return Ok(None);
        };
        // `a.exe`, `./a.exe` and `go//a.exe` style names share a staged file.
        if self.paths.contains(&request.path) {
            return Err(EntryError::DuplicateEntry {
                name: meta.name.clone(),
            });
        }
        Ok(Some(request))
    }

    fn push(&mut self, request: SignRequest) {
        debug!(
            entry = request.entry.as_deref().unwrap_or_default(),
            staged = %request.path.display(),
            profile = %request.profile,
            "staged entry"
        );
        self.paths.insert(request.path.clone());
        self.requests.push(request);
    }
}

fn write_staged(path: &Path, reader: &mut impl Read) -> Result<(), EntryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(path)?);
    io::copy(reader, &mut writer)?;
    let file = writer.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()?;
    Ok(())
}
