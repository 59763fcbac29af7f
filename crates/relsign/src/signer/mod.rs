#![forbid(unsafe_code)]

//! The boundary to the external signing service.
//!
//! A signer receives one flat batch of requests and must leave every
//! request's output at [`SignRequest::output_path`](crate::SignRequest::output_path):
//! entry and notarization payloads are overwritten in place, detached
//! signatures land next to the archive as `.sig` files. The batch has already
//! been written to the audit log when the signer is called, and that file is
//! handed over alongside it.

mod command;
mod local;

pub use command::CommandSigner;
pub use local::TestSigner;

use std::path::Path;

use crate::error::{FileFailure, SigningServiceError};
use crate::request::SignBatch;

pub trait Signer: Send + Sync {
    /// Signs `batch`; `recorded` is the audit copy of the same batch on disk.
    fn sign(&self, batch: &SignBatch, recorded: &Path) -> Result<(), SigningServiceError>;
}

/// Reports every request whose expected output is missing.
pub(crate) fn check_outputs(batch: &SignBatch) -> Result<(), SigningServiceError> {
    let failures: Vec<FileFailure> = batch
        .requests
        .iter()
        .map(|request| request.output_path())
        .filter(|output| !output.is_file())
        .map(|path| FileFailure {
            path,
            reason: "signed output is missing".to_string(),
        })
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(SigningServiceError::Files { failures })
    }
}
