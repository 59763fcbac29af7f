#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::archive::signature_path_for;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestKind {
    /// A file staged out of an archive entry.
    Entry,
    /// A whole archive that gets a notarization ticket stapled on.
    Notarization,
    /// A whole archive that gets a companion `.sig` file.
    DetachedSignature,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Entry => "entry",
            Self::Notarization => "notarization",
            Self::DetachedSignature => "detached-signature",
        })
    }
}

/// One file that must go through the external signing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    /// The archive this request was derived from.
    pub archive: PathBuf,
    /// The file submitted to the signing service. Entry and notarization
    /// requests are signed in place.
    pub path: PathBuf,
    /// Entry name inside the archive, for entry requests only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    pub profile: String,
    pub kind: RequestKind,
}

/// Requests are unique per (archive, entry, kind).
pub type RequestKey<'a> = (&'a Path, Option<&'a str>, RequestKind);

impl SignRequest {
    pub fn for_entry(
        archive: &Path,
        staged: PathBuf,
        entry: &str,
        profile: impl Into<String>,
    ) -> Self {
        Self {
            archive: archive.to_path_buf(),
            path: staged,
            entry: Some(entry.to_string()),
            profile: profile.into(),
            kind: RequestKind::Entry,
        }
    }

    pub fn for_notarization(archive: &Path, path: PathBuf, profile: impl Into<String>) -> Self {
        Self {
            archive: archive.to_path_buf(),
            path,
            entry: None,
            profile: profile.into(),
            kind: RequestKind::Notarization,
        }
    }

    pub fn for_detached_signature(
        archive: &Path,
        path: PathBuf,
        profile: impl Into<String>,
    ) -> Self {
        Self {
            archive: archive.to_path_buf(),
            path,
            entry: None,
            profile: profile.into(),
            kind: RequestKind::DetachedSignature,
        }
    }

    pub fn key(&self) -> RequestKey<'_> {
        (&self.archive, self.entry.as_deref(), self.kind)
    }

    /// The file the signing service is expected to produce.
    pub fn output_path(&self) -> PathBuf {
        match self.kind {
            RequestKind::DetachedSignature => signature_path_for(&self.path),
            RequestKind::Entry | RequestKind::Notarization => self.path.clone(),
        }
    }
}

/// The three signing passes of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pass {
    Entries,
    Notarization,
    Signatures,
}

impl Pass {
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Entries => 1,
            Self::Notarization => 2,
            Self::Signatures => 3,
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Entries => "entries",
            Self::Notarization => "notarization",
            Self::Signatures => "signatures",
        })
    }
}

/// The flat list of requests sent to the signing service in one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignBatch {
    pub pass: Pass,
    pub requests: Vec<SignRequest>,
}

impl SignBatch {
    pub fn new(pass: Pass) -> Self {
        Self {
            pass,
            requests: Vec::new(),
        }
    }

    pub fn extend(&mut self, requests: impl IntoIterator<Item = SignRequest>) {
        self.requests.extend(requests);
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Archives with at least one request in this batch.
    pub fn archives(&self) -> BTreeSet<&Path> {
        self.requests
            .iter()
            .map(|request| request.archive.as_path())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_signature_output_is_a_companion_file() {
        let request = SignRequest::for_detached_signature(
            Path::new("in/go.zip"),
            PathBuf::from("out/go.zip"),
            "LinuxSign",
        );
        assert_eq!(request.output_path(), Path::new("out/go.zip.sig"));
        assert_eq!(request.key(), (Path::new("in/go.zip"), None, RequestKind::DetachedSignature));
    }

    #[test]
    fn entry_requests_are_signed_in_place() {
        let request = SignRequest::for_entry(
            Path::new("in/go.zip"),
            PathBuf::from("in/go.zip.extracted/go/bin/go.exe"),
            "go/bin/go.exe",
            "Microsoft400",
        );
        assert_eq!(request.output_path(), request.path);
        assert_eq!(request.key().1, Some("go/bin/go.exe"));
    }

    #[test]
    fn batch_serializes_as_flat_list() {
        let mut batch = SignBatch::new(Pass::Entries);
        batch.extend([SignRequest::for_entry(
            Path::new("go.zip"),
            PathBuf::from("go.zip.extracted/a.exe"),
            "a.exe",
            "Microsoft400",
        )]);

        let value = serde_json::to_value(&batch).expect("serializes");
        assert_eq!(value["pass"], "entries");
        assert_eq!(value["requests"][0]["kind"], "entry");
        assert_eq!(value["requests"][0]["entry"], "a.exe");
        assert_eq!(batch.archives().len(), 1);
    }
}
