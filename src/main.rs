//! # KB CLI (`kb`)
//!
//! Command-line front end for the knowledge-base ingestion pipeline.
//!
//! ## Usage
//!
//! ```bash
//! kb --config ./config/kb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb init` | Create the SQLite database and run schema migrations |
//! | `kb ingest <path\|->` | Ingest a text file (or stdin) as one document |
//! | `kb diag` | Show document, chunk, and embedding counts for a tenant |
//! | `kb diag-embed` | Call the embedding provider once and report the result |
//! | `kb serve` | Start the HTTP server |
//!
//! ## Logging
//!
//! Log output goes to stderr and is controlled by `RUST_LOG`
//! (default `info`), e.g. `RUST_LOG=kb_ingest=debug kb ingest notes.md`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use kb_ingest::models::IngestRequest;
use kb_ingest::{config, diag, ingest, migrate, server};

/// KB: tenant-scoped knowledge-base ingestion.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kb.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kb",
    about = "Tenant-scoped knowledge-base ingestion: chunk, embed, and store documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the documents, chunks, and
    /// embeddings tables. Safe to run repeatedly.
    Init,

    /// Ingest one document.
    ///
    /// Reads the text from a file, or from stdin when the path is `-`,
    /// chunks it, embeds each chunk, and stores everything in one
    /// transaction.
    Ingest {
        /// File to ingest, or `-` for stdin.
        path: String,

        /// Tenant id. Defaults to `[ingest].default_tenant`.
        #[arg(long)]
        tenant: Option<String>,

        /// Explicit document id. Derived from the content hash when omitted.
        #[arg(long)]
        doc_id: Option<String>,

        /// Document title. Defaults to the file name.
        #[arg(long)]
        title: Option<String>,

        /// Source URI. Defaults to the file path.
        #[arg(long)]
        uri: Option<String>,

        /// MIME type of the source.
        #[arg(long)]
        mime: Option<String>,

        /// Tag to attach (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Embedding model override.
        #[arg(long)]
        model: Option<String>,
    },

    /// Show knowledge-base counts for a tenant.
    Diag {
        /// Tenant id. Defaults to `[ingest].default_tenant`.
        #[arg(long)]
        tenant: Option<String>,

        /// Also report counts for this document.
        #[arg(long)]
        doc_id: Option<String>,
    },

    /// Call the embedding provider once and report the vector length.
    DiagEmbed {
        /// Text to embed.
        #[arg(long)]
        text: Option<String>,

        /// Embedding model override.
        #[arg(long)]
        model: Option<String>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn read_input(path: &str) -> anyhow::Result<String> {
    if path == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))
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
        Commands::Ingest {
            path,
            tenant,
            doc_id,
            title,
            uri,
            mime,
            tags,
            model,
        } => {
            let text = read_input(&path)?;
            let from_file = (path != "-").then(|| PathBuf::from(&path));
            let request = IngestRequest {
                tenant_id: tenant,
                doc_id,
                title: title.or_else(|| {
                    from_file
                        .as_ref()
                        .and_then(|p| p.file_name())
                        .map(|n| n.to_string_lossy().into_owned())
                }),
                uri: uri.or_else(|| from_file.as_ref().map(|p| p.display().to_string())),
                mime,
                tags,
                text,
                embedding_model_id: model,
            };
            ingest::run_ingest(&cfg, &request).await?;
        }
        Commands::Diag { tenant, doc_id } => {
            diag::run_diag(&cfg, tenant, doc_id).await?;
        }
        Commands::DiagEmbed { text, model } => {
            diag::run_diag_embed(&cfg, text, model).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
