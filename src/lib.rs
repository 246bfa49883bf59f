pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use config::cli::LocalStorage;
#[cfg(feature = "cli")]
pub use config::CliConfig;

#[cfg(feature = "lambda")]
pub use config::lambda::{LambdaConfig, S3Storage};

pub use adapters::{IcescapeClient, ReplaySource};
pub use app::pipelines::ContactPipeline;
pub use config::toml_config::TomlConfig;
pub use config::transforms_config::TransformsConfig;
pub use core::{etl::EtlEngine, transcript::parse_transcript, transformer::Transformer};
pub use domain::{Table, Value};
pub use utils::error::{EtlError, Result};
