//! Settings for the `lockbell` binary
//!
//! Sources, lowest precedence first: `conf/lockbell.yml` (optional),
//! `LOCKBELL__*` environment variables, command line flags.

use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigError, Environment};

use lockbell_mutex::LockConfig;

use crate::logging::{LogRotation, LoggingConfig};

pub const DEFAULT_CONFIG_FILE: &str = "conf/lockbell.yml";

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "lockbell", version, about = "Distributed mutex with wait-notification")]
pub struct Cli {
    /// Settings file
    #[arg(short = 'c', long = "config", env = "LOCKBELL_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,
    /// Lock TTL in milliseconds
    #[arg(long = "ttl-ms")]
    pub ttl_ms: Option<u64>,
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run simulated processes competing for one lock
    Contend(ContendArgs),
    /// Show a waiter being woken by unlock or by TTL expiry
    Wait(WaitArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ContendArgs {
    #[arg(short = 'w', long, default_value_t = 4)]
    pub workers: usize,
    #[arg(short = 'r', long, default_value_t = 10)]
    pub rounds: usize,
    #[arg(short = 'k', long, default_value = "lockbell-demo")]
    pub key: String,
    /// Time spent inside the critical section
    #[arg(long, default_value_t = 5)]
    pub hold_ms: u64,
}

#[derive(Debug, Clone, Args)]
pub struct WaitArgs {
    #[arg(short = 'k', long, default_value = "lockbell-demo")]
    pub key: String,
    /// How long the holder keeps the lock before unlocking
    #[arg(long, default_value_t = 2000)]
    pub hold_ms: u64,
    /// Holder never unlocks; the waiter falls back to the TTL
    #[arg(long)]
    pub crash: bool,
}

/// Merged application settings
#[derive(Clone, Debug)]
pub struct Settings {
    pub config: Config,
}

impl Settings {
    pub fn new(cli: &Cli) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(config::File::with_name(&cli.config).required(false))
            .add_source(
                Environment::with_prefix("LOCKBELL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(v) = cli.ttl_ms {
            builder = builder.set_override("lock.ttl_ms", v as i64)?;
        }
        if let Some(v) = &cli.log_level {
            builder = builder.set_override("logging.level", v.clone())?;
        }

        Ok(Settings {
            config: builder.build()?,
        })
    }

    // ========================================================================
    // Lock Configuration
    // ========================================================================

    /// The `lock` section; missing keys take their defaults
    pub fn lock_config(&self) -> Result<LockConfig, ConfigError> {
        match self.config.get::<LockConfig>("lock") {
            Ok(config) => Ok(config),
            Err(ConfigError::NotFound(_)) => Ok(LockConfig::default()),
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn log_dir(&self) -> Option<String> {
        self.config.get_string("logging.dir").ok()
    }

    pub fn log_console(&self) -> bool {
        self.config.get_bool("logging.console").unwrap_or(true)
    }

    pub fn log_file(&self) -> bool {
        self.config.get_bool("logging.file").unwrap_or(false)
    }

    pub fn log_level(&self) -> String {
        self.config
            .get_string("logging.level")
            .unwrap_or("info".to_string())
    }

    pub fn log_rotation(&self) -> LogRotation {
        self.config
            .get_string("logging.rotation")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(LogRotation::Daily)
    }

    /// Logging setup from the `logging` section, or from `LOCKBELL_LOG_*` when absent
    pub fn logging_config(&self) -> LoggingConfig {
        if self.config.get_table("logging").is_err() {
            return LoggingConfig::from_env();
        }
        LoggingConfig::from_config(
            self.log_dir(),
            self.log_console(),
            self.log_file(),
            &self.log_level(),
            self.log_rotation(),
        )
    }
}
