#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relsign::{Archive, ConfigFile, SelectionRules};
use serde::Serialize;
use tracing::{debug, info};

use crate::discover::discover;

#[derive(Debug, Parser)]
pub struct CleanArgs {
    /// Glob of archives whose leftovers should be removed
    #[arg(long = "files", value_name = "GLOB", default_value = "eng/signing/tosign/*")]
    pub files: String,

    /// Output directory of the run being cleaned up
    #[arg(short = 'o', long = "out", value_name = "DIR", default_value = "eng/signing/signed")]
    pub out: PathBuf,

    /// TOML file overriding selection rules
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

pub fn handle(args: CleanArgs, json: bool) -> Result<()> {
    let rules = match &args.config {
        Some(path) => SelectionRules::compile(&ConfigFile::load(path)?.rules)?,
        None => SelectionRules::standard()?,
    };

    let mut removed = Vec::new();
    for path in discover(&args.files)? {
        let archive = match Archive::new(&path, &rules) {
            Ok(archive) => archive,
            Err(err) => {
                debug!(archive = %path.display(), error = %err, "skipping");
                continue;
            }
        };
        let paths = archive
            .cleanup(&args.out)
            .with_context(|| format!("failed to clean up after {}", path.display()))?;
        for path in &paths {
            info!(path = %path.display(), "removed");
        }
        removed.extend(paths);
    }

    if json {
        print_json(&removed)?;
    } else {
        print_human(&removed);
    }

    Ok(())
}

fn print_human(removed: &[PathBuf]) {
    if removed.is_empty() {
        println!("nothing to clean");
        return;
    }
    println!("removed {} path(s)", removed.len());
    for path in removed {
        println!("  {}", path.display());
    }
}

fn print_json(removed: &[PathBuf]) -> Result<()> {
    #[derive(Serialize)]
    struct Payload<'a> {
        removed: &'a [PathBuf],
    }

    println!("{}", serde_json::to_string(&Payload { removed })?);
    Ok(())
}
