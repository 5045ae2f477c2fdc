//! Star Crawler CLI
//!
//! Local execution entry point.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use star_crawler::{
    error::{AppError, Result},
    models::{Config, StorageBackend, Termination},
    pipeline::{self, Shutdown},
    storage::{self, EntityStore},
};

/// Star Crawler - GitHub repositories by adaptive date partitioning
#[derive(Parser, Debug)]
#[command(
    name = "star-crawler",
    version,
    about = "Collect ranked GitHub repositories past the search result ceiling"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "storage/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl repositories into the configured store
    Crawl {
        /// Number of repositories to collect
        #[arg(short, long, default_value_t = 100_000)]
        target: usize,

        /// Keep results in memory instead of the configured store
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Show the configured store's contents
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, configured: &str) {
    let level = if verbose { "debug" } else { configured };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Load before logging is up so the configured level applies.
    let loaded = Config::load(&cli.config);
    let mut config = loaded.as_ref().cloned().unwrap_or_default();
    config.apply_env();
    init_logging(cli.verbose, &config.logging.level);
    if let Err(e) = &loaded {
        log::warn!(
            "Config load failed from {}: {}. Using defaults.",
            cli.config.display(),
            e
        );
    }

    match cli.command {
        Command::Crawl { target, dry_run } => {
            if dry_run {
                log::info!("Dry run: results stay in memory");
                config.storage.backend = StorageBackend::Memory;
            }
            config.validate()?;

            let (trigger, shutdown) = Shutdown::channel();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupt received; finishing pending writes...");
                    trigger.trigger();
                }
            });

            let source = pipeline::build_source(&config, shutdown.clone())?;
            let store = storage::open_store(&config.storage).await?;
            let report = pipeline::run_crawler(&config, source, store, target, shutdown).await?;

            match report.termination {
                Termination::TargetReached => log::info!("Crawl complete!"),
                Termination::DomainExhausted => log::info!(
                    "Crawl complete: domain exhausted at {} repositories",
                    report.total_collected
                ),
                Termination::Cancelled => return Err(AppError::Cancelled),
            }
        }

        Command::Validate => {
            pipeline::run_validate(&cli.config)?;
            log::info!("All validations passed!");
        }

        Command::Info => {
            log::info!("Storage backend: {:?}", config.storage.backend);
            if config.storage.backend == StorageBackend::Local {
                log::info!("Storage directory: {}", config.storage.path.display());
            }

            let store = storage::open_store(&config.storage).await?;
            store.initialize_schema().await?;
            log::info!("Stored repositories: {}", store.count().await?);
        }
    }

    Ok(())
}
