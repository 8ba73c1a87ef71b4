mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use durable_counter::EngineConfig;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "durable-counter", version, about = "Durable visit counter")]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Counter file (overrides config and COUNTER_FILENAME)
    #[arg(long, global = true)]
    file: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the persisted value
    Get,
    /// Add to the counter and flush it to disk
    Increment {
        #[arg(long, default_value_t = 1)]
        by: i64,
    },
    /// Report whether the counter file holds a valid record
    Inspect,
    /// Run the engine; each line on stdin increments the counter
    Watch,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = self.load_config()?;
        init_tracing(&config.log_level);

        match self.command {
            Command::Get => commands::get(config).await,
            Command::Increment { by } => commands::increment(config, by).await,
            Command::Inspect => commands::inspect(&config),
            Command::Watch => commands::watch(config).await,
        }
    }

    /// defaults < config file < COUNTER_* env (.env included) < flags
    fn load_config(&self) -> Result<EngineConfig> {
        let config = match &self.config {
            Some(path) => EngineConfig::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        let mut config = config
            .apply_env()
            .context("invalid COUNTER_* environment override")?;

        if let Some(file) = &self.file {
            config = config.path(file);
        }
        if let Some(level) = &self.log_level {
            config = config.log_level(level);
        }

        config.validate().context("invalid configuration")?;
        config
            .ensure_data_dir()
            .context("failed to prepare data directory")?;
        Ok(config)
    }
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
