use crate::config::toml_config::{
    SourceConfig, DEFAULT_API_TIMEZONE, DEFAULT_CHUNK_SIZE, DEFAULT_SYSTEM_TIMEZONE,
};
use crate::core::{ConfigProvider, Storage};
use crate::utils::error::{EtlError, Result};
use crate::utils::time::{parse_date, parse_timezone};
use crate::utils::validation::{self, Validate};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::Client as S3Client;
use chrono::NaiveDate;
use chrono_tz::Tz;

/// Lambda 環境變數設定
#[derive(Debug, Clone)]
pub struct LambdaConfig {
    pub s3_bucket: String,
    pub s3_prefix: String,
    pub s3_region: String,
    /// S3 key of the YAML transforms file.
    pub transforms_key: String,
    pub interaction_type: String,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub chunk_size: usize,
    pub filetype: String,
    pub raw_prefix: String,
    pub group_key: String,
    pub system_timezone: Tz,
    pub api_timezone: Tz,
    pub source: Option<SourceConfig>,
}

impl LambdaConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable lookup.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(var: F) -> Result<Self> {
        let required = |name: &str| {
            var(name).ok_or_else(|| EtlError::MissingConfigError {
                field: name.to_string(),
            })
        };

        let start = var("START_DATE")
            .map(|raw| parse_date("START_DATE", &raw))
            .transpose()?;
        let end = var("END_DATE")
            .map(|raw| parse_date("END_DATE", &raw))
            .transpose()?;
        let date_range = match (start, end) {
            (Some(s), Some(e)) => Some((s, e)),
            (Some(s), None) => Some((s, s)),
            (None, Some(_)) => {
                return Err(EtlError::MissingConfigError {
                    field: "START_DATE".to_string(),
                })
            }
            (None, None) => None,
        };

        let source = match var("ICESCAPE_LOGIN_URL") {
            Some(login_url) => Some(SourceConfig {
                login_url,
                contacts_url: required("ICESCAPE_CONTACTS_URL")?,
                recordings_url: required("ICESCAPE_RECORDINGS_URL")?,
                user: required("ICESCAPE_USER")?,
                password: required("ICESCAPE_PASSWORD")?,
                user_agent: var("ICESCAPE_USER_AGENT"),
                timeout_seconds: var("ICESCAPE_TIMEOUT").and_then(|v| v.parse().ok()),
                max_results: var("ICESCAPE_MAX_RESULTS").and_then(|v| v.parse().ok()),
                headers: None,
            }),
            None => None,
        };

        Ok(Self {
            s3_bucket: required("S3_BUCKET")?,
            s3_prefix: var("S3_PREFIX").unwrap_or_else(|| "contact-etl".to_string()),
            s3_region: var("S3_REGION").unwrap_or_else(|| "ca-central-1".to_string()),
            transforms_key: var("TRANSFORMS_KEY")
                .unwrap_or_else(|| "config/transforms.yml".to_string()),
            interaction_type: var("INTERACTION_TYPE").unwrap_or_else(|| "IM".to_string()),
            date_range,
            chunk_size: var("CHUNK_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            filetype: var("OUTPUT_FILETYPE").unwrap_or_else(|| "csv".to_string()),
            raw_prefix: var("RAW_PREFIX").unwrap_or_else(|| "raw".to_string()),
            group_key: var("GROUP_KEY").unwrap_or_else(|| "contact_id".to_string()),
            system_timezone: parse_timezone(
                &var("SYSTEM_TIMEZONE").unwrap_or_else(|| DEFAULT_SYSTEM_TIMEZONE.to_string()),
            )?,
            api_timezone: parse_timezone(
                &var("API_TIMEZONE").unwrap_or_else(|| DEFAULT_API_TIMEZONE.to_string()),
            )?,
            source,
        })
    }
}

impl ConfigProvider for LambdaConfig {
    fn output_path(&self) -> &str {
        &self.s3_bucket
    }

    fn output_prefix(&self) -> &str {
        &self.s3_prefix
    }

    fn filetype(&self) -> &str {
        &self.filetype
    }

    fn interaction_type(&self) -> &str {
        &self.interaction_type
    }

    fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.date_range
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn system_timezone(&self) -> Tz {
        self.system_timezone
    }

    fn api_timezone(&self) -> Tz {
        self.api_timezone
    }

    fn raw_prefix(&self) -> &str {
        &self.raw_prefix
    }

    fn group_key(&self) -> &str {
        &self.group_key
    }
}

impl Validate for LambdaConfig {
    fn validate(&self) -> Result<()> {
        validate_s3_bucket_name("s3_bucket", &self.s3_bucket)?;
        validation::validate_non_empty_string("s3_prefix", &self.s3_prefix)?;
        validate_aws_region("s3_region", &self.s3_region)?;
        validation::validate_non_empty_string("transforms_key", &self.transforms_key)?;
        validation::validate_non_empty_string("interaction_type", &self.interaction_type)?;
        validation::validate_positive_number("chunk_size", self.chunk_size, 1)?;
        validation::validate_filetype("filetype", &self.filetype)?;

        if let Some((start, end)) = self.date_range {
            if end < start {
                return Err(EtlError::InvalidConfigValueError {
                    field: "END_DATE".to_string(),
                    value: end.to_string(),
                    reason: format!("end date is before start date {}", start),
                });
            }
        }

        let source = validation::validate_required_field("ICESCAPE_LOGIN_URL", &self.source)?;
        validation::validate_url("ICESCAPE_LOGIN_URL", &source.login_url)?;
        validation::validate_url("ICESCAPE_CONTACTS_URL", &source.contacts_url)?;
        validation::validate_url("ICESCAPE_RECORDINGS_URL", &source.recordings_url)?;

        tracing::info!("✅ Lambda configuration validation passed");
        Ok(())
    }
}

fn validate_s3_bucket_name(field_name: &str, bucket_name: &str) -> Result<()> {
    let invalid = |reason: &str| EtlError::InvalidConfigValueError {
        field: field_name.to_string(),
        value: bucket_name.to_string(),
        reason: reason.to_string(),
    };

    if bucket_name.len() < 3 || bucket_name.len() > 63 {
        return Err(invalid("S3 bucket name must be between 3 and 63 characters"));
    }
    if !bucket_name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(invalid(
            "S3 bucket name can only contain lowercase letters, numbers, hyphens, and dots",
        ));
    }
    if bucket_name.starts_with('-') || bucket_name.ends_with('-') {
        return Err(invalid("S3 bucket name cannot start or end with a hyphen"));
    }
    Ok(())
}

fn validate_aws_region(field_name: &str, region: &str) -> Result<()> {
    validation::validate_non_empty_string(field_name, region)?;

    if !region
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: region.to_string(),
            reason: "AWS region can only contain lowercase letters, numbers, and hyphens"
                .to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

impl Storage for S3Storage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| match e.into_service_error() {
                GetObjectError::NoSuchKey(_) => EtlError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("s3://{}/{} does not exist", self.bucket, path),
                )),
                other => EtlError::StorageError {
                    message: format!("Failed to read s3://{}/{}: {}", self.bucket, path, other),
                },
            })?;

        let data = resp.body.collect().await.map_err(|e| EtlError::StorageError {
            message: format!("Failed to collect S3 data: {}", e),
        })?;

        Ok(data.into_bytes().to_vec())
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(data.to_vec().into())
            .send()
            .await
            .map_err(|e| EtlError::StorageError {
                message: format!(
                    "Failed to write s3://{}/{}: {}",
                    self.bucket,
                    path,
                    e.into_service_error()
                ),
            })?;
        tracing::debug!("Wrote s3://{}/{} ({} bytes)", self.bucket, path, data.len());
        Ok(())
    }
}
