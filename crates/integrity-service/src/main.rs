use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use integrity_service::config::Config;
use integrity_service::inspector::{self, Table};
use integrity_service::scan;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Remote file integrity monitor", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the configured server and report changes since the last scan
    Scan {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print a table of the baseline database
    List {
        #[arg(value_enum)]
        table: Table,
        /// Database file, defaults to the per-user data directory
        #[arg(long)]
        database: Option<PathBuf>,
        /// Print JSON instead of a grid
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Scan { config } => scan_command(config).await,
        Commands::List {
            table,
            database,
            json,
        } => list_command(table, database, json),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn scan_command(config_path: PathBuf) -> Result<()> {
    let config = Config::load(&config_path)?;
    let outcome = scan::scan(&config).await?;
    info!(
        server = %outcome.host.name,
        changes = outcome.statistics.total(),
        "scan finished"
    );
    Ok(())
}

fn list_command(table: Table, database: Option<PathBuf>, json: bool) -> Result<()> {
    let path = match database {
        Some(path) => path,
        None => integrity_core::paths::default_database_path()
            .context("resolving default database location")?,
    };
    let store = inspector::open(&path)?;
    println!("{}", inspector::inspect(&store, table, json)?);
    Ok(())
}
