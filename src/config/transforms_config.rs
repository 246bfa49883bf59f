use crate::core::contacts::{ContactMapper, RawFieldMapping};
use crate::core::spec::{parse_specs, RawTransformSpec, TransformSpec};
use crate::core::transformer::check_summary_specs;
use crate::utils::error::{EtlError, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTransformsFile {
    #[serde(default)]
    contacts: Vec<RawFieldMapping>,
    #[serde(default)]
    transcript: Vec<RawTransformSpec>,
    #[serde(default)]
    transcript_meta: Vec<RawTransformSpec>,
}

/// Declarative transform lists, validated when loaded.
///
/// ```yaml
/// contacts:
///   - field: ContactID
///     name: contact_id
/// transcript:
///   - name: word_count
///     output: n_words
///     input_cols: [message]
/// transcript_meta:
///   - name: calc_handle_time
///     output: handle_time
/// ```
#[derive(Debug, Clone, Default)]
pub struct TransformsConfig {
    pub contacts: ContactMapper,
    pub transcript: Vec<TransformSpec>,
    pub transcript_meta: Vec<TransformSpec>,
}

impl TransformsConfig {
    /// 從 YAML 檔案載入 transform 設定
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| EtlError::ConfigError {
            message: format!(
                "Cannot read transforms file '{}': {}",
                path.as_ref().display(),
                e
            ),
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: RawTransformsFile = serde_yaml::from_slice(bytes)?;
        Self::from_raw(raw)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let raw: RawTransformsFile = serde_yaml::from_str(content)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawTransformsFile) -> Result<Self> {
        let config = Self {
            contacts: ContactMapper::from_raw(raw.contacts)?,
            transcript: parse_specs(raw.transcript)?,
            transcript_meta: parse_specs(raw.transcript_meta)?,
        };
        check_summary_specs(&config.transcript_meta)?;
        tracing::debug!(
            "Loaded {} transcript and {} summary transforms",
            config.transcript.len(),
            config.transcript_meta.len()
        );
        Ok(config)
    }
}
