use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ConfigLoader;
use crate::storage;

pub mod commands;

use self::commands::{FilterArgs, ListArgs, ReplayArgs, TagArgs};

#[derive(Parser, Debug)]
#[command(
    name = "filesync",
    version,
    about = "Browse and tag a remote file collection with live status updates"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file location (takes precedence over FILESYNC_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over FILESYNC_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch and print files matching a query
    List(ListArgs),
    /// Set tags on one or more files
    Tag(TagArgs),
    /// Show, set or clear the remembered filter
    Filter(FilterArgs),
    /// Rebuild a list from saved pages and a push log without a server
    Replay(ReplayArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("FILESYNC_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("FILESYNC_DATA", path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;
    let store = storage::init(&paths, &config.storage)?;

    let config = Arc::new(config);
    let result = match cli.command {
        Commands::List(args) => block_on(commands::list_files(config, store, args)),
        Commands::Tag(args) => block_on(commands::tag_files(config, store, args)),
        Commands::Filter(args) => commands::handle_filter_command(config, store, args),
        Commands::Replay(args) => block_on(commands::replay(config, args)),
    };
    if let Err(err) = &result {
        tracing::error!(error = %format!("{err:#}"), "command failed");
    }
    result
}

fn block_on<F>(future: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    runtime.block_on(future)
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
