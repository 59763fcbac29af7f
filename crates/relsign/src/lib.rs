#![forbid(unsafe_code)]

//! Signing orchestration for release archives.
//!
//! Archives are classified from their file names, the entries that need a
//! signature are staged next to the archive, an external signing service
//! signs the staged files in place, and the archive is rebuilt with the
//! signed bytes while every other entry is copied through untouched. macOS
//! tarballs additionally get a notarization request, and every archive gets
//! a detached signature.

pub mod archive;
pub mod audit;
pub mod config;
pub mod container;
pub mod error;
pub mod extract;
pub mod finalize;
pub mod pattern;
pub mod pipeline;
pub mod repack;
pub mod report;
pub mod request;
pub mod select;
pub mod signer;

pub use archive::{Archive, ArchiveKind};
pub use config::{ConfigFile, Profiles, RuleSet, RunConfig, SelectionRules, SignMode};
pub use error::{ConfigError, EntryError, PipelineError, SigningServiceError, Stage, StageError};
pub use extract::extract;
pub use finalize::{prepare_notarization, prepare_signature, publish};
pub use pipeline::Pipeline;
pub use repack::repack;
pub use report::{ArchiveOutcome, ArchiveState, RunReport};
pub use request::{Pass, RequestKind, SignBatch, SignRequest};
pub use select::Selector;
pub use signer::{CommandSigner, Signer, TestSigner};
