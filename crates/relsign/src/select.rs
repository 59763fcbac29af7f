#![forbid(unsafe_code)]

use std::path::{Component, Path, PathBuf};

use crate::archive::{Archive, ArchiveKind};
use crate::config::{Profiles, SelectionRules};
use crate::error::EntryError;
use crate::request::SignRequest;

/// Decides which archive entries need a signature, and with which profile.
#[derive(Debug, Clone, Copy)]
pub struct Selector<'a> {
    rules: &'a SelectionRules,
    profiles: &'a Profiles,
}

impl<'a> Selector<'a> {
    pub fn new(rules: &'a SelectionRules, profiles: &'a Profiles) -> Self {
        Self { rules, profiles }
    }

    /// Profile for `entry`, or `None` when the entry is left unsigned.
    /// Rules are tried in order and the first match wins.
    pub fn profile_for(&self, archive: &Archive, entry: &str) -> Option<&'a str> {
        match archive.kind() {
            ArchiveKind::Zip => entry
                .ends_with(&self.rules.windows_entry_suffix)
                .then_some(self.profiles.windows.as_str()),
            ArchiveKind::TarGz if archive.is_macos() => self
                .rules
                .macos_entries
                .iter()
                .any(|pattern| pattern.is_match(entry))
                .then_some(self.profiles.macos.as_str()),
            ArchiveKind::TarGz => None,
        }
    }

    /// Builds the sign request for `entry`, staged under the archive's
    /// staging directory.
    pub fn select(&self, archive: &Archive, entry: &str) -> Result<Option<SignRequest>, EntryError> {
        let Some(profile) = self.profile_for(archive, entry) else {
            return Ok(None);
        };
        let staged = staged_path(archive.staging_dir(), entry)?;
        Ok(Some(SignRequest::for_entry(
            archive.path(),
            staged,
            entry,
            profile,
        )))
    }
}

/// `<staging_dir>/<entry>`, refusing names that would land outside it.
pub fn staged_path(staging_dir: &Path, entry: &str) -> Result<PathBuf, EntryError> {
    let unsafe_name = || EntryError::UnsafeName {
        name: entry.to_string(),
    };

    let mut path = staging_dir.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(entry).components() {
        match component {
            Component::Normal(segment) => {
                path.push(segment);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_name());
            }
        }
    }

    if depth == 0 {
        return Err(unsafe_name());
    }
    Ok(path)
}
