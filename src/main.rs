use crate::app::App;
use crate::config::{Config, get_config};
use clap::{Parser, Subcommand};
use eyre::{WrapErr, ensure};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod allocation;
mod app;
mod catalog;
mod config;
mod directory;
mod display;
mod error;
mod extract;
mod identity;
mod locks;
mod model;
mod populate;
mod progress;
mod routes;
mod seed;
mod server;
mod stats;
mod store;

#[derive(Parser)]
#[command(version, about)]
struct Options {
    /// Use FILE instead of rassign.toml
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Set verbosity level
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST interface (default)
    Serve {
        /// Listen on ADDRESS instead of server.address
        #[arg(short, long)]
        address: Option<String>,
        /// Load demonstration data into an empty store first
        #[arg(long)]
        seed: bool,
    },
    /// Print allocations and occupancy statistics
    Report,
    /// Write allocations as CSV
    Export {
        /// Write to FILE instead of the standard output
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Repair occupancy counters and assignment references
    Reconcile {
        /// Only report what would be repaired
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Load demonstration data into an empty store
    Seed,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let options = Options::parse();
    let level = match options.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rassign={level},tower_http={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &options.config {
        Some(file_name) => Config::load(file_name)?,
        None => Config::load_or_default("rassign.toml".as_ref())?,
    };
    let command = options.command.unwrap_or(Command::Serve {
        address: None,
        seed: false,
    });
    if let Command::Serve { seed: true, .. } = command {
        config.set("seed", "demo", true);
    }

    let store = store::open(&config).await?;
    let app = Arc::new(App::new(store));

    match command {
        Command::Serve { address, .. } => {
            let demo = get_config(&config, "seed", "demo")
                .map(|s| s.parse::<bool>())
                .transpose()
                .wrap_err("cannot parse seed.demo configuration parameter")?
                .unwrap_or(false);
            if demo {
                seed::seed(&app).await?;
            }
            let address = address
                .or_else(|| get_config(&config, "server", "address"))
                .unwrap_or_else(|| "0.0.0.0:8080".to_owned());
            server::serve(app, &address).await?;
        }
        Command::Report => {
            let snapshot = stats::Snapshot::load(&*app.store).await?;
            display::display_details(&snapshot);
            display::display_stats(&snapshot);
            display::display_empty(&snapshot);
            display::display_unassigned(&snapshot);
        }
        Command::Export { output } => {
            let snapshot = stats::Snapshot::load(&*app.store).await?;
            match output {
                Some(path) => {
                    let file = File::create(&path)
                        .wrap_err_with(|| format!("cannot create {}", path.display()))?;
                    display::export_csv(&snapshot, file)?;
                    info!(
                        file = %path.display(),
                        rows = snapshot.allocations.len(),
                        "allocations exported",
                    );
                }
                None => display::export_csv(&snapshot, io::stdout().lock())?,
            }
        }
        Command::Reconcile { dry_run } => {
            let report = app.allocations.reconcile(dry_run).await?;
            for id in &report.projects_fixed {
                println!("project {id}: occupancy counter out of date");
            }
            for id in &report.students_fixed {
                println!("student {id}: assigned project out of date");
            }
            for id in &report.duplicate_allocations {
                warn!(allocation = %id, "student holds more than one allocation");
            }
            if dry_run {
                println!("Dry run, nothing written back");
            }
            ensure!(
                report.duplicate_allocations.is_empty(),
                "{} duplicate allocations need manual removal",
                report.duplicate_allocations.len()
            );
        }
        Command::Seed => {
            if !seed::seed(&app).await? {
                println!("Store already populated, nothing done");
            }
        }
    }
    Ok(())
}
