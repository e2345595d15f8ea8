//! Main entry point for lmix.

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    lmix_cli::run().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}
