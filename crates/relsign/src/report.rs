#![forbid(unsafe_code)]

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::archive::ArchiveKind;
use crate::error::Stage;

/// Lifecycle of one archive through a run. `Signed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveState {
    Discovered,
    Classified,
    Extracted,
    Repacked,
    Notarized,
    SignatureAttached,
    Signed,
    Failed,
}

impl fmt::Display for ArchiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Discovered => "discovered",
            Self::Classified => "classified",
            Self::Extracted => "extracted",
            Self::Repacked => "repacked",
            Self::Notarized => "notarized",
            Self::SignatureAttached => "signature-attached",
            Self::Signed => "signed",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveOutcome {
    pub archive: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ArchiveKind>,
    pub macos: bool,
    pub state: ArchiveState,
    /// Number of entries that were signed inside the archive.
    pub entries_signed: usize,
    pub notarized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ArchiveOutcome {
    pub fn is_signed(&self) -> bool {
        self.state == ArchiveState::Signed
    }
}

/// Per-archive summary of a run, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub archives: Vec<ArchiveOutcome>,
    /// Set when a signing pass failed and the run stopped early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl RunReport {
    /// True only when every archive was signed and the run was not aborted.
    pub fn success(&self) -> bool {
        self.aborted.is_none() && self.archives.iter().all(ArchiveOutcome::is_signed)
    }

    pub fn signed(&self) -> usize {
        self.archives.iter().filter(|outcome| outcome.is_signed()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ArchiveOutcome> {
        self.archives.iter().filter(|outcome| !outcome.is_signed())
    }
}
