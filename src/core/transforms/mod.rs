//! Operation kernels dispatched through [`crate::core::registry::Operation::kernel`].

pub mod aggregate;
pub mod sequence;
pub mod text;
pub mod time;

use crate::core::registry::OpContext;
use crate::domain::{Table, Timestamp, Value};
use crate::utils::error::TransformError;
use crate::utils::time::{parse_timestamp_str, TimeNormalizer, TimeUnit};

/// Conversation groups for sequence-aware operations.
///
/// A `group_by` parameter wins over the engine's key. Whichever key applies must
/// be a column of the table; without any key the table is one conversation.
pub(crate) fn conversation_groups(
    table: &Table,
    ctx: &OpContext<'_>,
) -> Result<Vec<Vec<usize>>, TransformError> {
    let key = ctx.params.group_by.as_deref().or(ctx.group_key);
    if let Some(key) = key {
        table.require(key)?;
    }
    if table.is_empty() {
        return Ok(Vec::new());
    }
    table.group_indices(key)
}

/// Timestamp cell, accepting text that still needs parsing.
pub(crate) fn timestamp_at(
    column: &str,
    values: &[Value],
    row: usize,
) -> Result<Option<Timestamp>, TransformError> {
    match &values[row] {
        Value::Null => Ok(None),
        Value::Timestamp(ts) => Ok(Some(*ts)),
        Value::Text(s) => parse_timestamp_str(s).map(Some).ok_or_else(|| {
            TransformError::TypeMismatch {
                column: column.to_string(),
                row,
                expected: "timestamp",
                found: format!("'{}'", s),
            }
        }),
        other => Err(TransformError::TypeMismatch {
            column: column.to_string(),
            row,
            expected: "timestamp",
            found: other.type_name().to_string(),
        }),
    }
}

/// Normalizer for this call: a `timezone` parameter overrides the engine default.
pub(crate) fn normalizer(ctx: &OpContext<'_>) -> TimeNormalizer {
    match ctx.params.timezone {
        Some(tz) => TimeNormalizer::new(Some(tz)),
        None => ctx.time,
    }
}

pub(crate) fn unit_or(ctx: &OpContext<'_>, default: TimeUnit) -> TimeUnit {
    ctx.params.unit.unwrap_or(default)
}

/// Indicator cells count as set when they equal 1 (`true` and `1.0` included).
pub(crate) fn is_flagged(value: &Value) -> bool {
    matches!(value, Value::Bool(true)) || value.loosely_equals(&Value::Int(1))
}
