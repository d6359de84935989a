//! Command-line storefront for cross-chain skin purchases.

use clap::Parser;

use skinshop::cli::{CliEnv, run_command};
use skinshop::config::Ctx;
use skinshop::setup_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli_env = CliEnv::parse();
    let ctx = Ctx::load_file(&cli_env.env.config)?;
    setup_tracing(&ctx.log_level);

    run_command(ctx, &cli_env.env, cli_env.command).await?;
    Ok(())
}
