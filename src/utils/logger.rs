//! Log output for the CLI binary.
//!
//! Everything a running pipeline reports goes through `log`; this wires the
//! records to stderr with a compact colored prefix. Lines meant for the
//! operator (progress transitions, the final manifest location) are printed
//! by the CLI directly and never pass through here.

use colored::Colorize;
use env_logger::Builder;
use log::{Level, LevelFilter};
use std::io::Write;

/// Configure logging: this crate at `Info` (`Debug` with `--verbose`),
/// dependencies capped at `Warn`. `RUST_LOG` still applies for targeted
/// overrides. Safe to call more than once; later calls are ignored.
pub fn setup_logging(verbose: bool) {
    let ours = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter_module(env!("CARGO_PKG_NAME"), ours)
        .format(|buf, record| {
            let tag = match record.level() {
                Level::Error => "error".red().bold(),
                Level::Warn => " warn".yellow(),
                Level::Info => " info".green(),
                Level::Debug | Level::Trace => "debug".dimmed(),
            };
            // Warnings and errors carry their module path so a task's
            // per-file faults can be traced to the stage that logged them.
            if record.level() <= Level::Warn {
                writeln!(buf, "{tag} {} {}", record.target().dimmed(), record.args())
            } else {
                writeln!(buf, "{tag} {}", record.args())
            }
        })
        .try_init();
}
