pub mod toml_config;

pub use toml_config::PublishConfig;

#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "vtpk-publish")]
#[command(about = "Rebuild vector tile packages and republish them as hosted tile layers")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "vtpk-publish.toml")]
    pub config: String,

    /// Only process these packages (repeatable); configuration order is kept
    #[arg(long = "only", value_name = "NAME")]
    pub only: Vec<String>,

    /// Check layers and list stale portal items without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Override the report path from config
    #[arg(long)]
    pub report: Option<String>,

    /// Override monitoring setting from config
    #[arg(long)]
    pub monitor: Option<bool>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}
