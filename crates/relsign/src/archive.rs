#![forbid(unsafe_code)]

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SelectionRules;
use crate::error::StageError;

const STAGING_SUFFIX: &str = ".extracted";
const REPACKED_SUFFIX: &str = ".withSignedContent";
const SIGNATURE_SUFFIX: &str = ".sig";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveKind {
    #[serde(rename = "zip")]
    Zip,
    #[serde(rename = "tar.gz")]
    TarGz,
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
        })
    }
}

/// Determines the container kind and macOS flag from the base file name.
///
/// `go*.zip` wins over `go*.tar.gz`; the macOS flag is only ever set for
/// tarballs.
pub fn classify(rules: &SelectionRules, path: &Path) -> Result<(ArchiveKind, bool), StageError> {
    let unknown = || StageError::UnknownArchiveKind {
        path: path.to_path_buf(),
    };
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(unknown)?;

    if rules.zip_archive.is_match(name) {
        Ok((ArchiveKind::Zip, false))
    } else if rules.tar_gz_archive.is_match(name) {
        Ok((ArchiveKind::TarGz, rules.macos_archive.is_match(name)))
    } else {
        Err(unknown())
    }
}

/// One input archive. Immutable once classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    path: PathBuf,
    name: String,
    kind: ArchiveKind,
    macos: bool,
    staging_dir: PathBuf,
}

impl Archive {
    pub fn new(path: impl Into<PathBuf>, rules: &SelectionRules) -> Result<Self, StageError> {
        let path = path.into();
        let (kind, macos) = classify(rules, &path)?;
        debug!(archive = %path.display(), %kind, macos, "classified archive");

        // classify() already rejected paths without a UTF-8 file name.
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            staging_dir: with_suffix(&path, STAGING_SUFFIX),
            name,
            path,
            kind,
            macos,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ArchiveKind {
        self.kind
    }

    pub fn is_macos(&self) -> bool {
        self.macos
    }

    /// Whether any entry of this archive can be selected for signing.
    pub fn has_entry_rules(&self) -> bool {
        self.kind == ArchiveKind::Zip || self.macos
    }

    /// `<archive>.extracted`, exclusively owned by this archive.
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Where the repack stage publishes the archive with signed entries.
    pub fn repacked_path(&self, destination: &Path) -> PathBuf {
        destination.join(format!("{}{REPACKED_SUFFIX}", self.name))
    }

    /// Final location of the signed archive.
    pub fn target_path(&self, destination: &Path) -> PathBuf {
        destination.join(&self.name)
    }

    /// Companion file the signing service writes for a detached signature.
    pub fn signature_path(&self, destination: &Path) -> PathBuf {
        signature_path_for(&self.target_path(destination))
    }

    /// Removes the staging directory and any repacked output left behind by
    /// an earlier run. Returns the paths that were removed.
    pub fn cleanup(&self, destination: &Path) -> io::Result<Vec<PathBuf>> {
        let mut removed = Vec::new();

        match fs::remove_dir_all(&self.staging_dir) {
            Ok(()) => removed.push(self.staging_dir.clone()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }

        let repacked = self.repacked_path(destination);
        match fs::remove_file(&repacked) {
            Ok(()) => removed.push(repacked),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }

        Ok(removed)
    }
}

pub(crate) fn signature_path_for(path: &Path) -> PathBuf {
    with_suffix(path, SIGNATURE_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = OsString::from(path.as_os_str());
    raw.push(suffix);
    PathBuf::from(raw)
}
