#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::info;

use super::{Signer, check_outputs};
use crate::error::SigningServiceError;
use crate::request::SignBatch;

/// Hands each batch to an external signing program.
///
/// The path of the batch JSON recorded in the audit log is appended to the
/// program's arguments. The program must sign every file in place (and
/// write `.sig` companions) before exiting successfully.
#[derive(Debug, Clone)]
pub struct CommandSigner {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandSigner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }
}

impl Signer for CommandSigner {
    fn sign(&self, batch: &SignBatch, recorded: &Path) -> Result<(), SigningServiceError> {
        info!(
            program = %self.program.display(),
            request = %recorded.display(),
            count = batch.len(),
            "invoking signing service"
        );

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(recorded)
            .status()
            .map_err(|source| SigningServiceError::Launch {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(SigningServiceError::Batch {
                reason: format!("{} exited with {status}", display_name(&self.program)),
            });
        }

        check_outputs(batch)
    }
}

fn display_name(program: &Path) -> String {
    program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}
