#![forbid(unsafe_code)]

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use relsign::{
    CommandSigner, ConfigFile, Pipeline, RunConfig, RunReport, SignMode, Signer, TestSigner,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::discover::discover;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SignType {
    /// Local simulated signer; validates extraction and repacking only
    Test,
    /// Production signing through the program given by --signer
    Real,
}

impl From<SignType> for SignMode {
    fn from(value: SignType) -> Self {
        match value {
            SignType::Test => SignMode::Test,
            SignType::Real => SignMode::Real,
        }
    }
}

#[derive(Debug, Parser)]
pub struct SignArgs {
    /// Glob of archives to sign
    #[arg(long = "files", value_name = "GLOB", default_value = "eng/signing/tosign/*")]
    pub files: String,

    /// Directory to store signed archives and signatures
    #[arg(short = 'o', long = "out", value_name = "DIR", default_value = "eng/signing/signed")]
    pub out: PathBuf,

    /// Directory to store the audit log of signing operations
    #[arg(long = "binlog-dir", value_name = "DIR", default_value = "eng/signing/binlog")]
    pub binlog_dir: PathBuf,

    /// Type of signing to perform
    #[arg(long = "sign-type", value_enum, default_value_t = SignType::Test)]
    pub sign_type: SignType,

    /// Signing program invoked once per pass (required for --sign-type real)
    #[arg(long = "signer", value_name = "PROGRAM")]
    pub signer: Option<PathBuf>,

    /// Extra argument passed to the signing program before the request path
    #[arg(long = "signer-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub signer_args: Vec<String>,

    /// Maximum number of archives processed at once
    #[arg(short = 'j', long = "jobs", value_name = "N")]
    pub jobs: Option<NonZeroUsize>,

    /// Keep `<archive>.extracted` staging directories after a successful run
    #[arg(long)]
    pub keep_staging: bool,

    /// TOML file overriding signing profiles and selection rules
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

pub async fn handle(args: SignArgs, json: bool) -> Result<()> {
    let config = build_config(&args)?;
    let signer = build_signer(&args, &config)?;

    let inputs = discover(&args.files)?;
    if inputs.is_empty() {
        warn!(files = %args.files, "no archives matched");
    }
    for path in &inputs {
        info!(archive = %path.display(), "found archive");
    }

    let pipeline = Pipeline::new(config, signer);
    let cancel = pipeline.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current stage");
            cancel.cancel();
        }
    });

    let result = pipeline.run(inputs).await;
    interrupt.abort();
    let report = result.context("signing run failed")?;

    if json {
        print_json(&report)?;
    } else {
        print_human(&report);
    }

    if let Some(reason) = &report.aborted {
        bail!("signing run aborted: {reason}");
    }
    if !report.success() {
        bail!(
            "{} of {} archive(s) failed to sign",
            report.failures().count(),
            report.archives.len()
        );
    }

    Ok(())
}

fn build_config(args: &SignArgs) -> Result<RunConfig> {
    let mut config = RunConfig::new(&args.out, &args.binlog_dir)?
        .with_mode(args.sign_type.into())
        .with_keep_staging(args.keep_staging);

    if let Some(jobs) = args.jobs {
        config = config.with_max_parallel(jobs);
    }
    if let Some(path) = &args.config {
        let file = ConfigFile::load(path)?;
        config = config.with_file(&file)?;
    }

    Ok(config)
}

fn build_signer(args: &SignArgs, config: &RunConfig) -> Result<Arc<dyn Signer>> {
    match config.mode {
        SignMode::Test => {
            if args.signer.is_some() {
                warn!("--signer is ignored for --sign-type test");
            }
            Ok(Arc::new(TestSigner))
        }
        SignMode::Real => {
            let Some(program) = &args.signer else {
                bail!("--sign-type real requires --signer <PROGRAM>");
            };
            let signer = CommandSigner::new(program).with_args(args.signer_args.iter().cloned());
            Ok(Arc::new(signer))
        }
    }
}

fn print_human(report: &RunReport) {
    println!(
        "signed {} of {} archive(s)",
        report.signed(),
        report.archives.len()
    );

    for outcome in &report.archives {
        if outcome.is_signed() {
            let output = outcome
                .output
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_default();
            println!(
                "  ok      {} -> {} (entries: {}, notarized: {})",
                outcome.archive.display(),
                output,
                outcome.entries_signed,
                outcome.notarized
            );
        } else {
            let stage = outcome
                .failed_stage
                .map(|stage| stage.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            println!(
                "  failed  {} [{}]: {}",
                outcome.archive.display(),
                stage,
                outcome.error.as_deref().unwrap_or("no details")
            );
        }
    }

    if let Some(reason) = &report.aborted {
        println!("run aborted: {reason}");
    }
}

fn print_json(report: &RunReport) -> Result<()> {
    #[derive(Serialize)]
    struct Payload<'a> {
        success: bool,
        signed: usize,
        failed: usize,
        #[serde(flatten)]
        report: &'a RunReport,
    }

    let payload = Payload {
        success: report.success(),
        signed: report.signed(),
        failed: report.failures().count(),
        report,
    };

    println!("{}", serde_json::to_string(&payload)?);
    Ok(())
}
