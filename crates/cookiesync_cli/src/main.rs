//! CookieSync CLI
//!
//! Command-line tools for inspecting and driving a CookieSync state
//! directory.
//!
//! # Commands
//!
//! - `configure` - Set the API endpoint, token and keep-alive frequency
//! - `status` - Show settings and queue state
//! - `list` / `remove` / `remove-domain` / `remark` - Manage the sync list
//! - `push` - Push the sync list and any pending retry queue
//! - `test-connection` / `sharing` - Talk to the remote API
//! - `logs` / `stats` / `check` - Inspect activity and keep-alive health
//! - `export` / `import` - Back up and restore all user data

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// CookieSync command-line tools.
#[derive(Parser)]
#[command(name = "cookiesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the state directory
    #[arg(global = true, short, long, default_value = ".cookiesync")]
    dir: PathBuf,

    /// Secret the stored token is encrypted with
    #[arg(global = true, long)]
    secret: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set the API endpoint, token and keep-alive frequency
    Configure {
        /// API base URL, e.g. https://sync.example.com/api/v1
        #[arg(short, long)]
        endpoint: Option<String>,

        /// API token
        #[arg(short, long)]
        token: Option<String>,

        /// Keep-alive frequency in minutes
        #[arg(short, long)]
        frequency: Option<u32>,
    },

    /// Show settings and queue state
    Status,

    /// List the sync list
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Remove a cookie by identity key (name|domain|path)
    Remove {
        /// Identity key
        key: String,

        /// Push immediately
        #[arg(long)]
        push: bool,
    },

    /// Remove every cookie of a registrable domain
    RemoveDomain {
        /// Registrable domain, e.g. example.com
        domain: String,

        /// Push immediately
        #[arg(long)]
        push: bool,
    },

    /// Set the local remark of a cookie
    Remark {
        /// Identity key
        key: String,

        /// Remark text
        remark: String,
    },

    /// Push the sync list and any pending retry queue
    Push,

    /// Verify connectivity and credentials
    TestConnection,

    /// Show or change remote sharing
    Sharing {
        /// Enable sharing
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Disable sharing
        #[arg(long)]
        disable: bool,
    },

    /// Show the activity log
    Logs {
        /// Maximum number of entries
        #[arg(short, long)]
        limit: Option<usize>,

        /// Clear the log instead
        #[arg(long)]
        clear: bool,
    },

    /// Show keep-alive statistics
    Stats {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run the integrity check
    Check,

    /// Export all user data to a JSON file
    Export {
        /// Output file
        output: PathBuf,
    },

    /// Replace all user data from a JSON file
    Import {
        /// Input file
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let engine = commands::open_engine(&cli.dir, cli.secret.as_deref())?;

    match cli.command {
        Commands::Configure {
            endpoint,
            token,
            frequency,
        } => commands::settings::configure(&engine, endpoint, token, frequency).await?,
        Commands::Status => commands::settings::status(&engine).await?,
        Commands::List { format } => commands::list::list(&engine, &format).await?,
        Commands::Remove { key, push } => commands::list::remove(&engine, &key, push).await?,
        Commands::RemoveDomain { domain, push } => {
            commands::list::remove_domain(&engine, &domain, push).await?
        }
        Commands::Remark { key, remark } => commands::list::remark(&engine, &key, remark).await?,
        Commands::Push => commands::list::push(&engine).await?,
        Commands::TestConnection => commands::remote::test_connection(&engine).await?,
        Commands::Sharing { enable, disable } => {
            let change = match (enable, disable) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            commands::remote::sharing(&engine, change).await?
        }
        Commands::Logs { limit, clear } => commands::health::logs(&engine, limit, clear).await?,
        Commands::Stats { format } => commands::health::stats(&engine, &format).await?,
        Commands::Check => commands::health::check(&engine).await?,
        Commands::Export { output } => commands::backup::export(&engine, &output).await?,
        Commands::Import { input } => commands::backup::import(&engine, &input).await?,
    }

    Ok(())
}
