#![forbid(unsafe_code)]

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

/// Install the stderr `fmt` subscriber for the given filter directive.
pub fn install(filter: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_new(filter).map_err(|err| anyhow!("invalid log filter `{filter}`: {err}"))?;

    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("failed to install log subscriber: {err}"))
}
