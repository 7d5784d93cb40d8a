use std::path::PathBuf;

use caravel::SyncMode;
use clap::{Parser, Subcommand};

/// Caravel - deployment synchronization engine for web application builds
#[derive(Parser, Debug)]
#[command(name = "caravel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// State directory override (default: ~/.caravel)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate and store credentials for a hosting provider
    Auth {
        /// Provider identifier (e.g. local_dir)
        provider: String,

        /// Credential fields as key=value pairs; prompted for when omitted
        #[arg(short, long, value_name = "KEY=VALUE")]
        field: Vec<String>,
    },

    /// Analyze a project's deployment requirements
    Analyze {
        /// Path to the project
        #[arg(default_value = ".")]
        project: PathBuf,

        /// Framework identifier (e.g. wasp, nextjs, static)
        #[arg(short, long)]
        framework: String,

        /// Provider identifier the deployment will target
        #[arg(short, long)]
        provider: String,
    },

    /// Build and deploy a project to a hosting target
    Deploy {
        /// Path to the project
        #[arg(default_value = ".")]
        project: PathBuf,

        /// Framework identifier
        #[arg(short, long)]
        framework: String,

        /// Provider identifier
        #[arg(short, long)]
        provider: String,

        /// Sync mode
        #[arg(short, long, default_value = "smart")]
        mode: SyncMode,

        /// Snapshot remote files before overwriting or deleting them
        #[arg(long)]
        backup: bool,

        /// Delete remote files that are absent locally (smart mode)
        #[arg(long)]
        clean: bool,

        /// Exclusion glob, repeatable (e.g. --exclude '.git/**')
        #[arg(long, value_name = "GLOB")]
        exclude: Vec<String>,

        /// Extra build environment as key=value pairs
        #[arg(short, long, value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Public URL to record with the deployment
        #[arg(long)]
        site_url: Option<String>,
    },

    /// Map deployment errors to suggested fixes
    Troubleshoot {
        /// Deployment id, or raw log text when no record matches
        query: String,

        /// Provider context for credential checks
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// List stored providers, known frameworks and past deployments
    Status {
        /// Show one deployment record in full
        #[arg(long)]
        record: Option<String>,
    },

    /// Remove stored credentials for a provider
    Forget {
        /// Provider identifier
        provider: String,
    },
}

/// Parse repeated `key=value` arguments
pub fn parse_pairs(pairs: &[String]) -> Result<Vec<(String, String)>, String> {
    pairs
        .iter()
        .map(|raw| {
            raw.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                .ok_or_else(|| format!("expected key=value, got '{raw}'"))
        })
        .collect()
}
