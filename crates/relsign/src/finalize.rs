#![forbid(unsafe_code)]

//! Whole-archive stages that run after repacking: notarization, publishing
//! the final archive, and the detached signature.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::archive::Archive;
use crate::config::Profiles;
use crate::error::StageError;
use crate::request::SignRequest;

/// Builds the notarization request for a repacked macOS tarball. Every other
/// archive yields `None`.
pub fn prepare_notarization(
    archive: &Archive,
    repacked: &Path,
    profiles: &Profiles,
) -> Result<Option<SignRequest>, StageError> {
    if !archive.is_macos() {
        return Ok(None);
    }

    require_file(repacked).map_err(|source| StageError::NotarizeFailed {
        archive: archive.path().to_path_buf(),
        source,
    })?;

    info!(archive = %archive.path().display(), "requesting notarization");
    Ok(Some(SignRequest::for_notarization(
        archive.path(),
        repacked.to_path_buf(),
        &profiles.notarization,
    )))
}

/// Moves the final archive to [`Archive::target_path`]. When no repacked
/// archive exists the original bytes are published unchanged.
pub fn publish(
    archive: &Archive,
    repacked: Option<&Path>,
    destination: &Path,
) -> Result<PathBuf, StageError> {
    let target = archive.target_path(destination);
    let fail = |source: io::Error| StageError::PublishFailed {
        archive: archive.path().to_path_buf(),
        target: target.clone(),
        source,
    };

    fs::create_dir_all(destination).map_err(fail)?;
    match repacked {
        Some(repacked) => fs::rename(repacked, &target).map_err(fail)?,
        None => copy_atomically(archive.path(), &target, destination).map_err(fail)?,
    }

    info!(
        archive = %archive.path().display(),
        output = %target.display(),
        "published archive"
    );
    Ok(target)
}

/// Builds the detached-signature request for the published archive.
pub fn prepare_signature(
    archive: &Archive,
    published: &Path,
    profiles: &Profiles,
) -> Result<SignRequest, StageError> {
    require_file(published).map_err(|source| StageError::SignatureFailed {
        archive: archive.path().to_path_buf(),
        source,
    })?;

    Ok(SignRequest::for_detached_signature(
        archive.path(),
        published.to_path_buf(),
        &profiles.detached_signature,
    ))
}

fn require_file(path: &Path) -> io::Result<()> {
    let metadata = fs::metadata(path)?;
    if metadata.is_file() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        ))
    }
}

fn copy_atomically(source: &Path, target: &Path, dir: &Path) -> io::Result<()> {
    let temp = tempfile::NamedTempFile::new_in(dir)?;
    fs::copy(source, temp.path())?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|err| err.error)?;
    Ok(())
}
