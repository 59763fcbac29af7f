#![forbid(unsafe_code)]

//! Drives every archive through classify, extract, repack, notarize and
//! signature, with one batched call to the signing service per pass.
//!
//! Per-archive stages run on blocking workers bounded by
//! [`RunConfig::max_parallel`]; the signing calls are the only points where
//! archives wait on each other. An archive that fails drops out of the run
//! without affecting the others, while a failed signing call ends the run.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::archive::Archive;
use crate::audit::AuditLog;
use crate::config::RunConfig;
use crate::error::{PipelineError, SigningServiceError, Stage, StageError};
use crate::extract::extract;
use crate::finalize::{prepare_notarization, prepare_signature, publish};
use crate::repack::repack;
use crate::report::{ArchiveOutcome, ArchiveState, RunReport};
use crate::request::{Pass, SignBatch, SignRequest};
use crate::select::Selector;
use crate::signer::Signer;

pub struct Pipeline {
    config: Arc<RunConfig>,
    signer: Arc<dyn Signer>,
    cancel: CancellationToken,
}

/// Working state of one archive between stages.
struct Unit {
    index: usize,
    archive: Archive,
    state: ArchiveState,
    entries: Vec<SignRequest>,
    repacked: Option<PathBuf>,
    notarization: Option<SignRequest>,
    published: Option<PathBuf>,
    signature: Option<SignRequest>,
}

impl Unit {
    fn new(index: usize, archive: Archive) -> Self {
        Self {
            index,
            archive,
            state: ArchiveState::Classified,
            entries: Vec::new(),
            repacked: None,
            notarization: None,
            published: None,
            signature: None,
        }
    }

    fn outcome(&self) -> ArchiveOutcome {
        ArchiveOutcome {
            archive: self.archive.path().to_path_buf(),
            kind: Some(self.archive.kind()),
            macos: self.archive.is_macos(),
            state: self.state,
            entries_signed: self.entries.len(),
            notarized: self.state != ArchiveState::Failed && self.notarization.is_some(),
            output: self.published.clone(),
            signature: self.signature.as_ref().map(SignRequest::output_path),
            failed_stage: None,
            error: None,
        }
    }

    fn fail(mut self, err: &StageError) -> (usize, ArchiveOutcome) {
        self.state = ArchiveState::Failed;
        let mut outcome = self.outcome();
        outcome.entries_signed = 0;
        outcome.signature = None;
        outcome.failed_stage = Some(err.stage());
        outcome.error = Some(err.to_string());
        (self.index, outcome)
    }
}

/// Collects terminal outcomes as archives leave the run.
#[derive(Default)]
struct Ledger {
    outcomes: Vec<(usize, ArchiveOutcome)>,
    aborted: Option<String>,
}

impl Ledger {
    fn fail(&mut self, unit: Unit, err: &StageError) {
        warn!(
            archive = %err.archive().display(),
            stage = %err.stage(),
            error = %err,
            "archive failed"
        );
        self.outcomes.push(unit.fail(err));
    }

    fn into_report(mut self) -> RunReport {
        self.outcomes.sort_by_key(|(index, _)| *index);
        RunReport {
            archives: self.outcomes.into_iter().map(|(_, outcome)| outcome).collect(),
            aborted: self.aborted,
        }
    }
}

impl Pipeline {
    pub fn new(config: RunConfig, signer: Arc<dyn Signer>) -> Self {
        Self {
            config: Arc::new(config),
            signer,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `token` to stop the run between stages.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs the full pipeline over `inputs` and reports the outcome of every
    /// archive. Per-archive failures are part of the report; only
    /// infrastructure failures (audit log, worker pool) are returned as errors.
    pub async fn run(&self, inputs: Vec<PathBuf>) -> Result<RunReport, PipelineError> {
        let destination = &self.config.destination_dir;
        fs::create_dir_all(destination).map_err(|source| PipelineError::Setup {
            path: destination.clone(),
            source,
        })?;
        let audit = AuditLog::create(&self.config.binlog_dir)?;
        let mut ledger = Ledger::default();

        let mut units = Vec::new();
        let mut targets: HashMap<String, PathBuf> = HashMap::new();
        for (index, path) in inputs.into_iter().enumerate() {
            let archive = match Archive::new(&path, &self.config.rules) {
                Ok(archive) => archive,
                Err(err) => {
                    warn!(archive = %path.display(), error = %err, "skipping archive");
                    ledger.outcomes.push((index, unclassified(path, &err)));
                    continue;
                }
            };

            // Outputs are named after the input's file name alone.
            if let Some(first) = targets.get(archive.name()) {
                let err = StageError::DuplicateTarget {
                    archive: path,
                    first: first.clone(),
                    name: archive.name().to_string(),
                };
                ledger.fail(Unit::new(index, archive), &err);
                continue;
            }
            targets.insert(archive.name().to_string(), path);
            units.push(Unit::new(index, archive));
        }
        info!(
            count = units.len(),
            mode = %self.config.mode,
            max_parallel = self.config.max_parallel.get(),
            "starting signing run"
        );

        let units = self
            .stage(Stage::Extract, units, &mut ledger, |config, unit| {
                let selector = Selector::new(&config.rules, &config.profiles);
                unit.entries = extract(&unit.archive, &selector)?;
                unit.state = ArchiveState::Extracted;
                Ok(())
            })
            .await?;

        let units = self
            .sign_pass(Pass::Entries, units, &audit, &mut ledger, |unit| {
                unit.entries.clone()
            })
            .await?;

        let units = self
            .stage(Stage::Repack, units, &mut ledger, |config, unit| {
                if unit.archive.has_entry_rules() {
                    unit.repacked = Some(repack(
                        &unit.archive,
                        &unit.entries,
                        &config.destination_dir,
                    )?);
                }
                unit.state = ArchiveState::Repacked;
                Ok(())
            })
            .await?;

        let units = self
            .stage(Stage::Notarize, units, &mut ledger, |config, unit| {
                if let Some(repacked) = &unit.repacked {
                    unit.notarization =
                        prepare_notarization(&unit.archive, repacked, &config.profiles)?;
                }
                Ok(())
            })
            .await?;

        let mut units = self
            .sign_pass(Pass::Notarization, units, &audit, &mut ledger, |unit| {
                unit.notarization.iter().cloned().collect()
            })
            .await?;
        for unit in units.iter_mut().filter(|unit| unit.notarization.is_some()) {
            unit.state = ArchiveState::Notarized;
        }

        let units = self
            .stage(Stage::Publish, units, &mut ledger, |config, unit| {
                let published =
                    publish(&unit.archive, unit.repacked.as_deref(), &config.destination_dir)?;
                unit.signature = Some(prepare_signature(
                    &unit.archive,
                    &published,
                    &config.profiles,
                )?);
                unit.published = Some(published);
                Ok(())
            })
            .await?;

        let mut units = self
            .sign_pass(Pass::Signatures, units, &audit, &mut ledger, |unit| {
                unit.signature.iter().cloned().collect()
            })
            .await?;
        for unit in &mut units {
            unit.state = ArchiveState::SignatureAttached;
        }

        let units = self
            .stage(Stage::Signature, units, &mut ledger, |config, unit| {
                if !config.keep_staging {
                    remove_staging(&unit.archive);
                }
                unit.state = ArchiveState::Signed;
                Ok(())
            })
            .await?;
        for unit in units {
            ledger.outcomes.push((unit.index, unit.outcome()));
        }

        let report = ledger.into_report();
        info!(
            signed = report.signed(),
            failed = report.failures().count(),
            "signing run finished"
        );
        Ok(report)
    }

    /// Runs `work` for every unit on the worker pool. Units whose work fails
    /// are moved to the ledger; the rest come back in input order.
    async fn stage<F>(
        &self,
        stage: Stage,
        units: Vec<Unit>,
        ledger: &mut Ledger,
        work: F,
    ) -> Result<Vec<Unit>, PipelineError>
    where
        F: Fn(&RunConfig, &mut Unit) -> Result<(), StageError> + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let permits = Arc::new(Semaphore::new(self.config.max_parallel.get()));
        let mut tasks = JoinSet::new();

        for mut unit in units {
            let permit = Arc::clone(&permits)
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::PoolClosed)?;
            let config = Arc::clone(&self.config);
            let work = Arc::clone(&work);
            let cancel = self.cancel.clone();

            tasks.spawn_blocking(move || {
                let _permit = permit;
                let result = if cancel.is_cancelled() {
                    Err(StageError::Cancelled {
                        archive: unit.archive.path().to_path_buf(),
                        stage,
                    })
                } else {
                    (*work)(&config, &mut unit)
                };
                (unit, result)
            });
        }

        let mut survivors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (unit, result) = joined?;
            match result {
                Ok(()) => survivors.push(unit),
                Err(err) => ledger.fail(unit, &err),
            }
        }

        survivors.sort_by_key(|unit| unit.index);
        Ok(survivors)
    }

    /// Sends the union of every unit's requests for `pass` to the signer in
    /// a single call. A failed call fails every remaining archive.
    async fn sign_pass<F>(
        &self,
        pass: Pass,
        units: Vec<Unit>,
        audit: &AuditLog,
        ledger: &mut Ledger,
        requests: F,
    ) -> Result<Vec<Unit>, PipelineError>
    where
        F: Fn(&Unit) -> Vec<SignRequest>,
    {
        if self.cancel.is_cancelled() {
            for unit in units {
                let err = StageError::Cancelled {
                    archive: unit.archive.path().to_path_buf(),
                    stage: Stage::Signing(pass),
                };
                ledger.fail(unit, &err);
            }
            return Ok(Vec::new());
        }

        let mut batch = SignBatch::new(pass);
        for unit in &units {
            batch.extend(requests(unit));
        }
        if batch.is_empty() {
            info!(%pass, "nothing to sign");
            return Ok(units);
        }

        let recorded = audit.record_batch(&batch)?;
        info!(
            %pass,
            count = batch.len(),
            archives = batch.archives().len(),
            binlog = %recorded.display(),
            "sending batch to signing service"
        );

        let signer = Arc::clone(&self.signer);
        let (batch, result) = tokio::task::spawn_blocking(move || {
            let result = signer.sign(&batch, &recorded);
            (batch, result)
        })
        .await?;

        match result {
            Ok(()) => {
                audit.record_outcome(&batch, None)?;
                info!(%pass, count = batch.len(), "batch signed");
                Ok(units)
            }
            Err(err) => {
                let message = err.to_string();
                audit.record_outcome(&batch, Some(&message))?;
                error!(%pass, error = %message, "signing service failed; stopping run");

                let affected = affected_archives(&batch, &err);
                for unit in units {
                    let reason = if affected.contains(unit.archive.path()) {
                        message.clone()
                    } else {
                        format!("run stopped after the {pass} pass failed")
                    };
                    let err = StageError::SigningFailed {
                        archive: unit.archive.path().to_path_buf(),
                        pass,
                        message: reason,
                    };
                    ledger.fail(unit, &err);
                }
                ledger.aborted = Some(format!("signing pass `{pass}` failed: {message}"));
                Ok(Vec::new())
            }
        }
    }
}

/// Archives the signing service reported a failure for. A whole-batch
/// failure affects every archive in the batch.
fn affected_archives(batch: &SignBatch, err: &SigningServiceError) -> BTreeSet<PathBuf> {
    let failed = err.failed_paths();
    batch
        .requests
        .iter()
        .filter(|request| match &failed {
            Some(paths) => paths
                .iter()
                .any(|path| *path == request.path || *path == request.output_path()),
            None => true,
        })
        .map(|request| request.archive.clone())
        .collect()
}

fn unclassified(path: PathBuf, err: &StageError) -> ArchiveOutcome {
    ArchiveOutcome {
        archive: path,
        kind: None,
        macos: false,
        state: ArchiveState::Failed,
        entries_signed: 0,
        notarized: false,
        output: None,
        signature: None,
        failed_stage: Some(err.stage()),
        error: Some(err.to_string()),
    }
}

fn remove_staging(archive: &Archive) {
    match fs::remove_dir_all(archive.staging_dir()) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(
            staging = %archive.staging_dir().display(),
            error = %err,
            "failed to remove staging directory"
        ),
    }
}
