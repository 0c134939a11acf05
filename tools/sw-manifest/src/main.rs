//! Service worker manifest tool.
//!
//! Provides commands for:
//! - Generating a resource manifest from a build directory
//! - Comparing two manifests the way activation does
//!
//! ## Usage
//!
//! ```bash
//! # Hash a build into a manifest
//! sw-manifest generate build/web --output build/web/sw-manifest.json
//!
//! # See what an upgrade would evict
//! sw-manifest diff old/sw-manifest.json new/sw-manifest.json
//! ```

use clap::{Parser, Subcommand};
use pwa_common::{init_logging, LogConfig};
use pwa_sw::Manifest;
use std::path::PathBuf;
use tracing::info;

mod generate;

#[derive(Parser)]
#[command(name = "sw-manifest")]
#[command(about = "Generate and compare service worker resource manifests")]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hash every file in a build directory into a manifest
    Generate {
        /// Build output directory
        build_dir: PathBuf,
        /// Write the manifest here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// File or directory names to leave out, on top of the worker script
        #[arg(short, long)]
        exclude: Vec<String>,
    },

    /// Show which resources an upgrade keeps and which it evicts
    Diff {
        /// Manifest of the installed version
        old: PathBuf,
        /// Manifest of the new version
        new: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(LogConfig::from_verbosity(cli.verbose));

    match cli.command {
        Commands::Generate {
            build_dir,
            output,
            exclude,
        } => {
            let exclude = generate::with_default_exclude(exclude);
            let manifest = generate::generate(&build_dir, &exclude)?;
            let json = manifest.to_json_pretty()?;

            match output {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    info!(path = %path.display(), resources = manifest.len(), "Wrote manifest");
                }
                None => println!("{json}"),
            }
        }

        Commands::Diff { old, new } => {
            let old = Manifest::load(&old)?;
            let new = Manifest::load(&new)?;
            let diff = new.diff(&old);

            for key in &diff.added {
                println!("+ {key}");
            }
            for key in &diff.changed {
                println!("~ {key}");
            }
            for key in &diff.removed {
                println!("- {key}");
            }
            println!(
                "{} unchanged, {} added, {} changed, {} removed",
                diff.unchanged.len(),
                diff.added.len(),
                diff.changed.len(),
                diff.removed.len()
            );
        }
    }

    Ok(())
}
