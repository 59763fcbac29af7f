#![forbid(unsafe_code)]

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;

use super::{Signer, check_outputs};
use crate::error::{FileFailure, SigningServiceError};
use crate::request::{RequestKind, SignBatch};

/// Simulated signing for local validation of the extract/repack round trip.
///
/// Staged entries and notarization payloads are left byte-for-byte as they
/// are. Detached signatures are written as `sha256:<hex>` of the archive.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestSigner;

impl Signer for TestSigner {
    fn sign(&self, batch: &SignBatch, _recorded: &Path) -> Result<(), SigningServiceError> {
        let mut failures = Vec::new();

        for request in &batch.requests {
            if request.kind != RequestKind::DetachedSignature {
                continue;
            }
            let output = request.output_path();
            if let Err(err) = write_test_signature(&request.path, &output) {
                failures.push(FileFailure {
                    path: request.path.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
            debug!(signature = %output.display(), "wrote test signature");
        }

        if !failures.is_empty() {
            return Err(SigningServiceError::Files { failures });
        }
        check_outputs(batch)
    }
}

fn write_test_signature(archive: &Path, output: &Path) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(archive)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    fs::write(output, format!("sha256:{}\n", hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::tempdir;

    use super::*;
    use crate::request::{Pass, SignRequest};

    #[test]
    fn writes_digest_signatures() {
        let temp = tempdir().expect("temp dir");
        let archive = temp.path().join("go.zip");
        fs::write(&archive, b"abc").expect("write archive");

        let mut batch = SignBatch::new(Pass::Signatures);
        batch.extend([SignRequest::for_detached_signature(
            &archive,
            archive.clone(),
            "LinuxSign",
        )]);
        TestSigner.sign(&batch, Path::new("01-entries.json")).expect("signs");

        let signature = fs::read_to_string(temp.path().join("go.zip.sig")).expect("sig");
        assert_eq!(
            signature.trim(),
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn missing_staged_files_fail_per_file() {
        let temp = tempdir().expect("temp dir");
        let staged = temp.path().join("go.zip.extracted/a.exe");

        let mut batch = SignBatch::new(Pass::Entries);
        batch.extend([SignRequest::for_entry(
            &PathBuf::from("go.zip"),
            staged.clone(),
            "a.exe",
            "Microsoft400",
        )]);

        let err = TestSigner.sign(&batch, Path::new("01-entries.json")).expect_err("missing file");
        assert_eq!(err.failed_paths(), Some(vec![staged.as_path()]));
    }
}
