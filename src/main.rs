use anyhow::Context;
use procwatch::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    Cli::run().await.context("procwatch failed")?;
    Ok(())
}
