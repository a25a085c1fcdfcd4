//! # PartSelect agent CLI (`psa`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `psa init` | Create the SQLite database and schema |
//! | `psa import <seed.json>` | Load guides, parts, models and fitment |
//! | `psa ask "<message>"` | Answer one message, print the JSON response |
//! | `psa serve` | Start the chat HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! psa init --config ./config/partselect.toml
//! psa import ./data/seed.json
//! psa ask "Is PS11752778 compatible with WDT780SAEM1?"
//! psa serve
//! ```
//!
//! Logging goes to stderr through `tracing`; set `RUST_LOG=debug` for
//! per-stage detail.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use partselect_agent::pipeline::Engine;
use partselect_agent::{config, db, import, migrate, server};
use partselect_core::models::ChatMessage;

/// PartSelect agent: scope-gated, evidence-grounded chat for refrigerator
/// and dishwasher parts.
#[derive(Parser)]
#[command(
    name = "psa",
    about = "PartSelect agent: routing-and-evidence chat for appliance parts",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/partselect.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Import a JSON seed file of guides and catalog rows.
    Import {
        /// Path to the seed file.
        path: PathBuf,
    },

    /// Answer a single message and print the response as JSON.
    Ask {
        message: String,

        /// Prior turns as a JSON array of `{role, content}` objects.
        #[arg(long)]
        history: Option<String>,
    },

    /// Start the chat HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { path } => {
            import::run_import(&cfg, &path).await?;
        }
        Commands::Ask { message, history } => {
            let history: Vec<ChatMessage> = match history {
                Some(raw) => serde_json::from_str(&raw)
                    .map_err(|e| anyhow::anyhow!("Invalid --history JSON: {}", e))?,
                None => Vec::new(),
            };
            let pool = db::connect(&cfg).await?;
            let engine = Engine::from_config(&cfg, pool.clone()).await?;
            let response = engine.respond(&message, history).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            pool.close().await;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
