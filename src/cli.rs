//! Command-line surface: submit one archival request and watch it, browse
//! the vetted directory tree, or list recorded tasks.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::authority::DirectoryAuthority;
use crate::clients::{DisabledIngester, OfflineRegistry};
use crate::registry::TaskRegistry;
use crate::types::{ExperimentRef, Submitter, Target};
use crate::utils::config::CaptureConfig;

/// Archive laboratory instrument runs into the managed data store.
#[derive(Clone, Parser)]
#[command(name = "datacap")]
#[command(about = "Capture and archive instrument run directories.")]
pub struct Cli {
    /// Path to the deployment configuration.
    #[arg(long, short, default_value = "datacap.toml")]
    pub config: PathBuf,

    /// Verbose output.
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Print the instrument roots and the current vetted directory set.
    Dirs,
    /// List task ids known to the snapshot store.
    Tasks,
    /// Archive one vetted run directory and wait for completion.
    Archive {
        /// The run directory (must be in the vetted set).
        dir: PathBuf,
        /// Name of the submitting user.
        #[arg(long)]
        submitter: String,
        /// Registry URL of an already-existing target experiment.
        #[arg(long)]
        experiment: Option<String>,
        /// Free-text notes recorded in the manifest.
        #[arg(long, default_value = "")]
        notes: String,
    },
}

pub fn handle_run(cli: &Cli) -> Result<()> {
    let cfg = CaptureConfig::load(&cli.config)?;
    let authority = Arc::new(DirectoryAuthority::from_config(&cfg));
    match &cli.command {
        Commands::Dirs => handle_dirs(&authority),
        Commands::Tasks => {
            let registry = build_registry(&cfg, authority);
            for id in registry.list() {
                println!("{id}");
            }
            Ok(())
        }
        Commands::Archive {
            dir,
            submitter,
            experiment,
            notes,
        } => handle_archive(&cfg, authority, dir, submitter, experiment.as_deref(), notes),
    }
}

fn build_registry(cfg: &CaptureConfig, authority: Arc<DirectoryAuthority>) -> TaskRegistry {
    TaskRegistry::new(
        cfg,
        authority,
        Arc::new(OfflineRegistry),
        Arc::new(DisabledIngester),
    )
}

fn handle_dirs(authority: &DirectoryAuthority) -> Result<()> {
    println!("roots:");
    for root in authority.list_roots() {
        println!("  {}", root.display());
    }
    println!("vetted:");
    for dir in authority.vetted_subdirectories() {
        println!("  {}", dir.display());
    }
    Ok(())
}

fn handle_archive(
    cfg: &CaptureConfig,
    authority: Arc<DirectoryAuthority>,
    dir: &PathBuf,
    submitter: &str,
    experiment: Option<&str>,
    notes: &str,
) -> Result<()> {
    let registry = build_registry(cfg, authority);
    let target = match experiment {
        Some(url) => Target::Experiment(ExperimentRef {
            title: url.to_string(),
            url: url.to_string(),
            project: None,
        }),
        // No experiment given: the pipeline will try to provision one under
        // a placeholder parent, which the offline registry declines; the
        // archive copy and JSON manifest still happen.
        None => Target::CreateUnder(ExperimentRef {
            title: "unassigned".to_string(),
            url: "urn:datacap:unassigned".to_string(),
            project: None,
        }),
    };
    let id = registry
        .create(
            Submitter {
                name: submitter.to_string(),
                url: None,
            },
            target,
            vec![dir.to_string_lossy().into_owned()],
            notes,
        )
        .context("submit archival request")?;
    info!("submitted {id} for {}", dir.display());

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
            .context("install Ctrl-C handler")?;
    }

    let mut last_status = String::new();
    loop {
        if interrupted.load(Ordering::SeqCst) {
            registry.delete(&id)?;
            println!("{id}: cancelled");
            break;
        }
        let desc = registry.describe(&id)?;
        if desc.status != last_status {
            match desc.progress {
                Some(p) => println!("{id}: {} ({:.0}%)", desc.status, p * 100.0),
                None => println!("{id}: {}", desc.status),
            }
            last_status = desc.status.clone();
        }
        if desc.is_done() {
            match desc.created_asset {
                Some(url) => println!("{id}: manifest registered at {url}"),
                None => println!("{id}: archived; no registry location produced"),
            }
            break;
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    registry.shutdown();
    Ok(())
}
