use anyhow::Result;
use auditor::cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
