//! Datacap CLI: archive instrument run directories into the managed store.

use anyhow::Result;
use clap::Parser;
use datacap::cli::{Cli, handle_run};
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    datacap::utils::setup_logging(cli.verbose);
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
