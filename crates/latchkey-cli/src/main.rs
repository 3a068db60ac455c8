//! Latchkey command line.
//!
//! # Quick Start
//!
//! ```bash
//! # Check a policy file
//! latchkey validate policies.json
//!
//! # Dry-run a request as the device owner
//! latchkey check policies.json --subject alice --device door-1 \
//!     --resource lockset --action unlock --owner
//!
//! # Show the effective configuration
//! latchkey config --dir .
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Latchkey - attribute-based access decisions for devices.
#[derive(Parser)]
#[command(name = "latchkey")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate every policy in a JSON file.
    Validate {
        /// Path to a JSON array of policies.
        policies: PathBuf,
    },

    /// Dry-run one access request against an in-memory engine.
    Check {
        /// Path to a JSON array of policies.
        policies: PathBuf,

        /// Requesting subject.
        #[arg(long)]
        subject: String,

        /// Target device.
        #[arg(long)]
        device: String,

        /// Resource type of the device.
        #[arg(long)]
        resource: String,

        /// Requested action.
        #[arg(long)]
        action: String,

        /// Environment fact supplied with the request (repeatable).
        #[arg(long = "attr", value_name = "KEY=VALUE")]
        attributes: Vec<String>,

        /// Subject fact known to the identity provider (repeatable).
        #[arg(long = "fact", value_name = "KEY=VALUE")]
        facts: Vec<String>,

        /// Make the subject the owner of the device.
        #[arg(long)]
        owner: bool,

        /// Requested validity in seconds.
        #[arg(long, default_value_t = latchkey_access::DEFAULT_VALIDITY_SECS)]
        validity: u64,

        /// Project directory to load configuration from.
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },

    /// Print the effective configuration as TOML.
    Config {
        /// Project directory to load configuration from.
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { policies } => commands::validate::run(&policies),
        Commands::Check {
            policies,
            subject,
            device,
            resource,
            action,
            attributes,
            facts,
            owner,
            validity,
            dir,
        } => commands::check::run(&commands::check::CheckArgs {
            policies,
            subject,
            device,
            resource,
            action,
            attributes,
            facts,
            owner,
            validity,
            dir,
        }),
        Commands::Config { dir } => commands::config::show(&dir),
    }
}
