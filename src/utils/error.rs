use thiserror::Error;

/// 單一轉換操作內部的錯誤，不含 spec 資訊；由 Transformer 轉成 [`EtlError`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("column '{0}' not found")]
    MissingColumn(String),

    #[error("timezone mismatch: {0}")]
    TimezoneMismatch(String),

    #[error("cannot aggregate zero rows of column '{0}'")]
    EmptyAggregation(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("column '{column}' expected {expected} values, found {found}")]
    ColumnLength {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("column '{column}' row {row}: expected {expected}, found {found}")]
    TypeMismatch {
        column: String,
        row: usize,
        expected: &'static str,
        found: String,
    },
}

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("API returned status {status}: {body}")]
    ApiStatusError { status: u16, body: String },

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Transform '{transform}' (output '{output}'): missing column '{column}'")]
    MissingColumnError {
        transform: String,
        output: String,
        column: String,
    },

    #[error("Unknown transform operation '{name}'")]
    UnknownOperationError { name: String },

    #[error("Transform '{transform}' (output '{output}'): timezone mismatch: {reason}")]
    TimezoneMismatchError {
        transform: String,
        output: String,
        reason: String,
    },

    #[error("Transform '{transform}' (output '{output}'): cannot aggregate zero rows of column '{column}'")]
    EmptyAggregationError {
        transform: String,
        output: String,
        column: String,
    },

    #[error("Malformed transcript entry at index {index}: {reason}")]
    MalformedEntryError { index: usize, reason: String },

    #[error("Transform '{transform}' (output '{output}') failed: {source}")]
    TransformFailed {
        transform: String,
        output: String,
        #[source]
        source: TransformError,
    },
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Io,
    Configuration,
    Transform,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EtlError {
    /// 將 operation 層的錯誤附上出錯的 transform 名稱與輸出欄位
    pub fn from_transform(transform: &str, output: &str, err: TransformError) -> Self {
        match err {
            TransformError::MissingColumn(column) => EtlError::MissingColumnError {
                transform: transform.to_string(),
                output: output.to_string(),
                column,
            },
            TransformError::TimezoneMismatch(reason) => EtlError::TimezoneMismatchError {
                transform: transform.to_string(),
                output: output.to_string(),
                reason,
            },
            TransformError::EmptyAggregation(column) => EtlError::EmptyAggregationError {
                transform: transform.to_string(),
                output: output.to_string(),
                column,
            },
            other => EtlError::TransformFailed {
                transform: transform.to_string(),
                output: output.to_string(),
                source: other,
            },
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::ApiError(_) | EtlError::ApiStatusError { .. } => ErrorCategory::Network,
            EtlError::ZipError(_)
            | EtlError::IoError(_)
            | EtlError::CsvError(_)
            | EtlError::StorageError { .. } => ErrorCategory::Io,
            EtlError::YamlError(_)
            | EtlError::ConfigError { .. }
            | EtlError::ConfigValidationError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::UnknownOperationError { .. } => ErrorCategory::Configuration,
            EtlError::MissingColumnError { .. }
            | EtlError::TimezoneMismatchError { .. }
            | EtlError::EmptyAggregationError { .. }
            | EtlError::TransformFailed { .. } => ErrorCategory::Transform,
            EtlError::SerializationError(_)
            | EtlError::ProcessingError { .. }
            | EtlError::ValidationError { .. }
            | EtlError::MalformedEntryError { .. } => ErrorCategory::Data,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            EtlError::MalformedEntryError { .. } => ErrorSeverity::Low,
            EtlError::ApiError(_) | EtlError::ApiStatusError { .. } => ErrorSeverity::Medium,
            EtlError::IoError(_) | EtlError::StorageError { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Network => "Check API credentials and connectivity, then re-run the same date range",
            ErrorCategory::Io => "Check the output location exists and is writable",
            ErrorCategory::Configuration => "Fix the configuration file; operation names must match the registry",
            ErrorCategory::Transform => "Reorder the transform list so every input column is produced before it is used",
            ErrorCategory::Data => "Inspect the raw payload for the failing contact",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            EtlError::MissingColumnError {
                transform, column, ..
            } => format!(
                "Transform '{}' needs column '{}', which does not exist at that point of the run",
                transform, column
            ),
            EtlError::UnknownOperationError { name } => {
                format!("'{}' is not a known transform operation", name)
            }
            EtlError::ApiStatusError { status, .. } => {
                format!("The contact API answered with HTTP {}", status)
            }
            other => other.to_string(),
        }
    }
}
