#![forbid(unsafe_code)]

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::request::Pass;

/// Errors raised while building a [`RunConfig`](crate::RunConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
    #[error("signing profile `{name}` must not be empty")]
    EmptyProfile { name: &'static str },
    #[error("rule `{name}` must not be empty")]
    EmptyRule { name: &'static str },
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// The step of the per-archive pipeline an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum Stage {
    Classify,
    Extract,
    Signing(Pass),
    Repack,
    Notarize,
    Publish,
    Signature,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classify => f.write_str("classify"),
            Self::Extract => f.write_str("extract"),
            Self::Signing(pass) => write!(f, "sign-{pass}"),
            Self::Repack => f.write_str("repack"),
            Self::Notarize => f.write_str("notarize"),
            Self::Publish => f.write_str("publish"),
            Self::Signature => f.write_str("signature"),
        }
    }
}

impl From<Stage> for String {
    fn from(stage: Stage) -> Self {
        stage.to_string()
    }
}

/// Underlying cause of an extract or repack failure.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error("entry `{name}` would escape the staging directory")]
    UnsafeName { name: String },
    #[error("entry `{name}` is selected for signing more than once")]
    DuplicateEntry { name: String },
    #[error("entry `{name}` has a PAX size record and cannot be substituted")]
    PaxSize { name: String },
    #[error("sign request for `{name}` does not match any entry in the archive")]
    UnmatchedRequest { name: String },
}

/// A failure that ends processing for a single archive.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("unknown archive kind: {}", path.display())]
    UnknownArchiveKind { path: PathBuf },
    #[error(
        "{} would be published as `{name}`, which is already taken by {}",
        archive.display(),
        first.display()
    )]
    DuplicateTarget {
        archive: PathBuf,
        first: PathBuf,
        name: String,
    },
    #[error("failed to extract entries from {}: {source}", archive.display())]
    ExtractFailed {
        archive: PathBuf,
        #[source]
        source: EntryError,
    },
    #[error("failed to repack {}: {source}", archive.display())]
    RepackFailed {
        archive: PathBuf,
        #[source]
        source: EntryError,
    },
    #[error("failed to prepare notarization for {}: {source}", archive.display())]
    NotarizeFailed {
        archive: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to publish {} to {}: {source}", archive.display(), target.display())]
    PublishFailed {
        archive: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare detached signature for {}: {source}", archive.display())]
    SignatureFailed {
        archive: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("signing service failed for {}: {message}", archive.display())]
    SigningFailed {
        archive: PathBuf,
        pass: Pass,
        message: String,
    },
    #[error("processing of {} was cancelled before {stage}", archive.display())]
    Cancelled { archive: PathBuf, stage: Stage },
}

impl StageError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::UnknownArchiveKind { .. } | Self::DuplicateTarget { .. } => Stage::Classify,
            Self::ExtractFailed { .. } => Stage::Extract,
            Self::RepackFailed { .. } => Stage::Repack,
            Self::NotarizeFailed { .. } => Stage::Notarize,
            Self::PublishFailed { .. } => Stage::Publish,
            Self::SignatureFailed { .. } => Stage::Signature,
            Self::SigningFailed { pass, .. } => Stage::Signing(*pass),
            Self::Cancelled { stage, .. } => *stage,
        }
    }

    pub fn archive(&self) -> &Path {
        match self {
            Self::UnknownArchiveKind { path } => path,
            Self::DuplicateTarget { archive, .. }
            | Self::ExtractFailed { archive, .. }
            | Self::RepackFailed { archive, .. }
            | Self::NotarizeFailed { archive, .. }
            | Self::PublishFailed { archive, .. }
            | Self::SignatureFailed { archive, .. }
            | Self::SigningFailed { archive, .. }
            | Self::Cancelled { archive, .. } => archive,
        }
    }
}

/// A single file the signing service could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Failure reported by a [`Signer`](crate::Signer).
#[derive(Debug, Error)]
pub enum SigningServiceError {
    #[error("signing service rejected the batch: {reason}")]
    Batch { reason: String },
    #[error("signing failed for {} file(s): {}", failures.len(), summarize(failures))]
    Files { failures: Vec<FileFailure> },
    #[error("failed to launch signer {}: {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("signer I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SigningServiceError {
    /// Paths this error is scoped to, or `None` when the whole batch failed.
    pub fn failed_paths(&self) -> Option<Vec<&Path>> {
        match self {
            Self::Files { failures } => Some(failures.iter().map(|f| f.path.as_path()).collect()),
            _ => None,
        }
    }
}

fn summarize(failures: &[FileFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("{} ({})", failure.path.display(), failure.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors that abort the whole run rather than a single archive.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to prepare {}: {source}", path.display())]
    Setup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write audit log {}: {source}", path.display())]
    Audit {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode audit record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("worker pool closed unexpectedly")]
    PoolClosed,
}
