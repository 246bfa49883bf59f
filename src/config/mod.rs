pub mod cli;
#[cfg(feature = "lambda")]
pub mod lambda;
pub mod toml_config;
pub mod transforms_config;

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use toml_config::TomlConfig;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "contact-etl")]
#[command(about = "Contact-center ETL: download contacts and transcripts, run declarative transforms")]
pub struct CliConfig {
    /// Path to the TOML pipeline configuration
    #[arg(short, long, default_value = "config/pipeline.toml")]
    pub config: String,

    /// Override the YAML transforms file from the configuration
    #[arg(short, long)]
    pub transforms: Option<String>,

    /// First day to load (YYYY-mm-dd)
    #[arg(long)]
    pub start_date: Option<String>,

    /// Last day to load (YYYY-mm-dd), inclusive
    #[arg(long)]
    pub end_date: Option<String>,

    /// Interaction type to request, e.g. IM
    #[arg(long)]
    pub interaction_type: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Log per-phase CPU and memory usage
    #[arg(long)]
    pub monitor: bool,

    /// Show what would be processed without executing
    #[arg(long)]
    pub dry_run: bool,

    /// Read raw contact and transcript files from this directory instead of the API
    #[arg(long, value_name = "DIR")]
    pub offline: Option<String>,
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// 命令列參數覆蓋 TOML 設定
    pub fn apply_overrides(&self, config: &mut TomlConfig) {
        if let Some(path) = &self.transforms {
            tracing::info!("🔧 Transforms file overridden to: {}", path);
            config.transform.transforms_file = path.clone();
        }
        if let Some(start) = &self.start_date {
            config.extract.start_date = Some(start.clone());
            // a new start without an end means a single day
            if self.end_date.is_none() {
                config.extract.end_date = None;
            }
        }
        if let Some(end) = &self.end_date {
            config.extract.end_date = Some(end.clone());
        }
        if let Some(kind) = &self.interaction_type {
            config.extract.interaction_type = kind.clone();
        }
        if self.monitor {
            let monitoring = config.monitoring.get_or_insert(toml_config::MonitoringConfig {
                enabled: true,
                log_level: None,
            });
            monitoring.enabled = true;
        }
    }
}
