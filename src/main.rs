//! # pushlens CLI
//!
//! The `pushlens` binary runs the webhook server and offers offline tools
//! over captured payloads and the event database.
//!
//! ## Usage
//!
//! ```bash
//! pushlens --config ./config/pushlens.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pushlens init` | Create the SQLite database and schema |
//! | `pushlens serve` | Start the webhook server and background worker |
//! | `pushlens analyze <payload.json>` | Analyze a captured push payload |
//! | `pushlens sign <file>` | Print the signature header value for a body |
//! | `pushlens events` | List stored events |
//! | `pushlens get <repository> <sha>` | Show one stored event |
//! | `pushlens stats` | Database overview |
//!
//! ## Examples
//!
//! ```bash
//! pushlens init
//! pushlens serve
//!
//! # Replay a delivery against a running server
//! curl -X POST http://127.0.0.1:9000/webhook \
//!   -H "X-GitHub-Event: push" \
//!   -H "X-Hub-Signature-256: $(pushlens sign push.json)" \
//!   --data-binary @push.json
//!
//! pushlens get acme/widgets 9f2c1e --patch
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use pushlens::{analyze_cmd, config, get, logging, migrate, server, signature, stats};

/// pushlens: push-event diff ingestion and analysis.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/pushlens.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "pushlens",
    about = "Ingests source-control push events, analyzes the diffs, and stores a durable record of each commit",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pushlens.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the webhook server.
    ///
    /// Binds to `[server].bind`, verifies deliveries with the configured
    /// webhook secret, and processes accepted pushes in the background.
    Serve,

    /// Analyze a captured push payload.
    ///
    /// Prints a JSON report. Nothing is written unless `--store` is given.
    /// Runs without a config file, using defaults.
    Analyze {
        /// Path to the JSON body of a push delivery.
        payload: PathBuf,

        /// Fetch full commit detail from the GitHub API.
        #[arg(long)]
        fetch: bool,

        /// Store the result in the configured database.
        #[arg(long)]
        store: bool,
    },

    /// Print the `sha256=<hex>` signature header value for a request body.
    Sign {
        /// File containing the exact bytes to sign.
        file: PathBuf,

        /// Secret to sign with. Defaults to the configured webhook secret.
        #[arg(long)]
        secret: Option<String>,
    },

    /// List stored events, newest first.
    Events {
        /// Only events for this repository (`owner/name`).
        #[arg(long)]
        repository: Option<String>,

        /// Maximum number of events to show.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show one stored event.
    Get {
        /// Repository full name (`owner/name`).
        repository: String,

        /// Commit sha.
        sha: String,

        /// Print the decompressed diff instead of the event.
        #[arg(long)]
        patch: bool,
    },

    /// Show database statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    let cfg = match &cli.command {
        Commands::Analyze { store: false, .. } | Commands::Sign { .. } => {
            load_or_minimal(&cli.config)?
        }
        _ => config::load_config(&cli.config)?,
    };

    logging::init_logging(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Analyze {
            payload,
            fetch,
            store,
        } => {
            analyze_cmd::run_analyze(&cfg, &payload, fetch, store).await?;
        }
        Commands::Sign { file, secret } => {
            let secret = secret
                .or_else(|| cfg.webhook_secret())
                .context("no secret given and no webhook secret configured")?;
            let body = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            println!("{}", signature::sign(secret.as_bytes(), &body));
        }
        Commands::Events { repository, limit } => {
            get::run_list(&cfg, repository, limit).await?;
        }
        Commands::Get {
            repository,
            sha,
            patch,
        } => {
            get::run_get(&cfg, &repository, &sha, patch).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

/// Load the config file if it exists; fall back to defaults otherwise. A file
/// that exists but fails to parse is still an error.
fn load_or_minimal(path: &Path) -> Result<config::Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(config::Config::minimal())
    }
}
