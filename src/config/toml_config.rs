use crate::core::ConfigProvider;
use crate::utils::error::{EtlError, Result};
use crate::utils::time::{parse_date, parse_timezone};
use crate::utils::validation::{self, Validate};
use chrono::NaiveDate;
use chrono_tz::Tz;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

pub const DEFAULT_SYSTEM_TIMEZONE: &str = "US/Eastern";
pub const DEFAULT_API_TIMEZONE: &str = "UTC";
pub const DEFAULT_CHUNK_SIZE: usize = 20;
pub const DEFAULT_MAX_RESULTS: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    pub pipeline: PipelineConfig,
    pub source: Option<SourceConfig>,
    pub extract: ExtractConfig,
    #[serde(default)]
    pub time: TimeConfig,
    pub transform: TransformConfig,
    pub load: LoadConfig,
    pub monitoring: Option<MonitoringConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub description: Option<String>,
    pub version: String,
}

/// Contact-center API connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub login_url: String,
    pub contacts_url: String,
    pub recordings_url: String,
    pub user: String,
    pub password: String,
    pub user_agent: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_results: Option<usize>,
    /// Extra request headers; `{token}` is replaced by the session token.
    pub headers: Option<IndexMap<String, String>>,
}

impl SourceConfig {
    pub fn max_results(&self) -> usize {
        self.max_results.unwrap_or(DEFAULT_MAX_RESULTS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    pub interaction_type: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeConfig {
    pub system_timezone: Option<String>,
    pub api_timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    pub transforms_file: String,
    /// Column that identifies a conversation.
    pub group_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    pub output_path: String,
    pub prefix: Option<String>,
    pub filetype: Option<String>,
    /// Where raw API payloads are kept under the output path.
    pub raw_prefix: Option<String>,
    /// Postgres URL; tables are also inserted there when built with `warehouse`.
    pub warehouse_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub log_level: Option<String>,
}

fn env_var_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("static regex"))
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${ICESCAPE_PASSWORD})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> String {
        env_var_pattern()
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        if let Some(source) = &self.source {
            validation::validate_url("source.login_url", &source.login_url)?;
            validation::validate_url("source.contacts_url", &source.contacts_url)?;
            validation::validate_url("source.recordings_url", &source.recordings_url)?;
            validation::validate_non_empty_string("source.user", &source.user)?;
            validation::validate_positive_number("source.max_results", source.max_results(), 1)?;
            if let Some(timeout) = source.timeout_seconds {
                validation::validate_range("source.timeout_seconds", timeout, 1, 600)?;
            }
        }

        validation::validate_non_empty_string(
            "extract.interaction_type",
            &self.extract.interaction_type,
        )?;
        validation::validate_positive_number("extract.chunk_size", self.chunk_size(), 1)?;
        self.parsed_date_range()?;

        validation::validate_timezone("time.system_timezone", self.system_timezone_name())?;
        validation::validate_timezone("time.api_timezone", self.api_timezone_name())?;

        validation::validate_path("transform.transforms_file", &self.transform.transforms_file)?;
        validation::validate_path("load.output_path", &self.load.output_path)?;
        validation::validate_filetype("load.filetype", self.filetype_name())?;

        Ok(())
    }

    /// 解析日期區間；只有起始日時視為單日
    pub fn parsed_date_range(&self) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let start = self
            .extract
            .start_date
            .as_deref()
            .map(|raw| parse_date("extract.start_date", raw))
            .transpose()?;
        let end = self
            .extract
            .end_date
            .as_deref()
            .map(|raw| parse_date("extract.end_date", raw))
            .transpose()?;

        match (start, end) {
            (None, None) => Ok(None),
            (Some(s), None) => Ok(Some((s, s))),
            (None, Some(_)) => Err(EtlError::MissingConfigError {
                field: "extract.start_date".to_string(),
            }),
            (Some(s), Some(e)) if e < s => Err(EtlError::InvalidConfigValueError {
                field: "extract.end_date".to_string(),
                value: e.to_string(),
                reason: format!("end date is before start date {}", s),
            }),
            (Some(s), Some(e)) => Ok(Some((s, e))),
        }
    }

    pub fn system_timezone_name(&self) -> &str {
        self.time
            .system_timezone
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_TIMEZONE)
    }

    pub fn api_timezone_name(&self) -> &str {
        self.time.api_timezone.as_deref().unwrap_or(DEFAULT_API_TIMEZONE)
    }

    pub fn filetype_name(&self) -> &str {
        self.load.filetype.as_deref().unwrap_or("csv")
    }

    pub fn chunk_size(&self) -> usize {
        self.extract.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    pub fn group_key(&self) -> &str {
        self.transform.group_key.as_deref().unwrap_or("contact_id")
    }

    pub fn raw_prefix(&self) -> &str {
        self.load.raw_prefix.as_deref().unwrap_or("raw")
    }

    /// 取得監控設定
    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }
}

impl ConfigProvider for TomlConfig {
    fn output_path(&self) -> &str {
        &self.load.output_path
    }

    fn output_prefix(&self) -> &str {
        self.load.prefix.as_deref().unwrap_or("")
    }

    fn filetype(&self) -> &str {
        self.filetype_name()
    }

    fn interaction_type(&self) -> &str {
        &self.extract.interaction_type
    }

    fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.parsed_date_range().ok().flatten()
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size()
    }

    fn system_timezone(&self) -> Tz {
        parse_timezone(self.system_timezone_name()).unwrap_or(chrono_tz::US::Eastern)
    }

    fn api_timezone(&self) -> Tz {
        parse_timezone(self.api_timezone_name()).unwrap_or(chrono_tz::UTC)
    }

    fn raw_prefix(&self) -> &str {
        self.raw_prefix()
    }

    fn group_key(&self) -> &str {
        self.group_key()
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
