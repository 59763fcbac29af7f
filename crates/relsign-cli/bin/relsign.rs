use clap::Parser;
use relsign_cli::cli::{self, Cli};
use tokio::runtime::Builder;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let env_filter = cli::resolve_env_filter(&cli);

    let rt = Builder::new_multi_thread().enable_all().build()?;

    rt.block_on(async move {
        relsign_cli::telemetry::install(&env_filter)?;
        cli::run_with_cli(cli).await
    })
}
