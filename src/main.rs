//! ArchGuard CLI
//!
//! All CLI logic lives in the `cli` module. This file is just the entry point.

mod cli;

use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    cli::run().await
}
