use crate::core::registry::{Operation, Registry};
use crate::domain::{Table, Value};
use crate::utils::error::{EtlError, Result, TransformError};
use crate::utils::time::TimeUnit;
use chrono_tz::Tz;
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use std::cmp::Ordering;

/// `input_cols` may be written as a single name or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// Transform entry exactly as written in the declarative file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTransformSpec {
    pub name: String,
    pub output: String,
    #[serde(default)]
    pub input_cols: Option<OneOrMany>,
    #[serde(default)]
    pub params: IndexMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FilterOp {
    fn parse(raw: &str) -> std::result::Result<Self, TransformError> {
        match raw {
            "eq" | "==" => Ok(FilterOp::Eq),
            "ne" | "!=" => Ok(FilterOp::Ne),
            "lt" | "<" => Ok(FilterOp::Lt),
            "le" | "<=" => Ok(FilterOp::Le),
            "gt" | ">" => Ok(FilterOp::Gt),
            "ge" | ">=" => Ok(FilterOp::Ge),
            other => Err(TransformError::InvalidParameter {
                name: "filters.operator".to_string(),
                reason: format!("unknown operator '{}'", other),
            }),
        }
    }
}

/// Row predicate `column <operator> value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub operator: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn matches(&self, cell: &Value) -> bool {
        if self.operator == FilterOp::Eq {
            return cell.loosely_equals(&self.value);
        }
        if self.operator == FilterOp::Ne {
            return !cell.loosely_equals(&self.value);
        }
        match cell.compare(&self.value) {
            Some(ord) => match self.operator {
                FilterOp::Lt => ord == Ordering::Less,
                FilterOp::Le => ord != Ordering::Greater,
                FilterOp::Gt => ord == Ordering::Greater,
                FilterOp::Ge => ord != Ordering::Less,
                FilterOp::Eq | FilterOp::Ne => unreachable!(),
            },
            None => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFilter {
    column: String,
    operator: String,
    value: serde_json::Value,
}

/// Parameters shared by several operations, parsed once when the config is loaded.
/// Operation specific keys stay available through [`OpParams::get`].
#[derive(Debug, Clone, Default)]
pub struct OpParams {
    raw: IndexMap<String, serde_json::Value>,
    pub unit: Option<TimeUnit>,
    pub timezone: Option<Tz>,
    pub filters: Vec<Filter>,
    pub pattern: Option<Regex>,
    pub group_by: Option<String>,
    pub allow_empty: bool,
    /// `column_operator` reducers, in configured order.
    pub aggregators: Vec<Operation>,
    /// Unit a `convert_timedelta` post operator rescales seconds into.
    pub post_unit: Option<TimeUnit>,
}

impl OpParams {
    pub fn parse(raw: IndexMap<String, serde_json::Value>) -> std::result::Result<Self, TransformError> {
        let unit = match raw.get("unit") {
            Some(v) => Some(TimeUnit::parse(expect_str("unit", v)?)?),
            None => None,
        };

        let timezone = match raw.get("timezone") {
            Some(v) => {
                let name = expect_str("timezone", v)?;
                Some(name.parse::<Tz>().map_err(|_| TransformError::InvalidParameter {
                    name: "timezone".to_string(),
                    reason: format!("'{}' is not an IANA timezone", name),
                })?)
            }
            None => None,
        };

        let filters = match raw.get("filters") {
            Some(v) => {
                let parsed: Vec<RawFilter> =
                    serde_json::from_value(v.clone()).map_err(|e| TransformError::InvalidParameter {
                        name: "filters".to_string(),
                        reason: e.to_string(),
                    })?;
                parsed
                    .into_iter()
                    .map(|f| {
                        Ok(Filter {
                            column: f.column,
                            operator: FilterOp::parse(&f.operator)?,
                            value: Value::from_json(&f.value),
                        })
                    })
                    .collect::<std::result::Result<Vec<_>, TransformError>>()?
            }
            None => Vec::new(),
        };

        let pattern = match raw.get("pattern") {
            Some(v) => {
                let source = expect_str("pattern", v)?;
                Some(Regex::new(source).map_err(|e| TransformError::InvalidParameter {
                    name: "pattern".to_string(),
                    reason: e.to_string(),
                })?)
            }
            None => None,
        };

        let group_by = match raw.get("group_by") {
            Some(v) => Some(expect_str("group_by", v)?.to_string()),
            None => None,
        };

        let allow_empty = match raw.get("allow_empty") {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(_) => {
                return Err(TransformError::InvalidParameter {
                    name: "allow_empty".to_string(),
                    reason: "expected true or false".to_string(),
                })
            }
            None => false,
        };

        let aggregators = match raw.get("aggregator") {
            Some(v) => parse_aggregators(v)?,
            None => Vec::new(),
        };

        let post_unit = match raw.get("post_operator") {
            Some(v) => Some(parse_post_operator(v)?),
            None => None,
        };

        Ok(Self {
            raw,
            unit,
            timezone,
            filters,
            pattern,
            group_by,
            allow_empty,
            aggregators,
            post_unit,
        })
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.raw.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.raw.get(key).and_then(|v| v.as_str())
    }

    /// A scalar or a list, as table values.
    pub fn get_values(&self, key: &str) -> Option<Vec<Value>> {
        self.raw.get(key).map(|v| match v {
            serde_json::Value::Array(items) => items.iter().map(Value::from_json).collect(),
            other => vec![Value::from_json(other)],
        })
    }

    /// Rows of `table` that pass every filter (all filters must hold).
    pub fn filtered_rows(&self, table: &Table) -> std::result::Result<Vec<usize>, TransformError> {
        let columns = self
            .filters
            .iter()
            .map(|f| table.require(&f.column).map(|col| (f, col)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok((0..table.len())
            .filter(|&row| columns.iter().all(|(f, col)| f.matches(&col[row])))
            .collect())
    }
}

/// `aggregator: mean` or `aggregator: [mean, max]`
fn parse_aggregators(value: &serde_json::Value) -> std::result::Result<Vec<Operation>, TransformError> {
    let names = match value {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|v| expect_str("aggregator", v))
            .collect::<std::result::Result<Vec<_>, _>>()?,
        other => vec![expect_str("aggregator", other)?],
    };
    names
        .into_iter()
        .map(|name| match name {
            "mean" => Ok(Operation::Mean),
            "max" => Ok(Operation::Max),
            "min" => Ok(Operation::Min),
            "sum" => Ok(Operation::Sum),
            other => Err(TransformError::InvalidParameter {
                name: "aggregator".to_string(),
                reason: format!("'{}' is not one of mean, max, min, sum", other),
            }),
        })
        .collect()
}

/// `post_operator: {name: convert_timedelta, args: m}`
fn parse_post_operator(value: &serde_json::Value) -> std::result::Result<TimeUnit, TransformError> {
    let invalid = |reason: String| TransformError::InvalidParameter {
        name: "post_operator".to_string(),
        reason,
    };
    match value.get("name").and_then(serde_json::Value::as_str) {
        Some("convert_timedelta") => {}
        other => return Err(invalid(format!("unsupported post operator {:?}", other))),
    }
    let unit = value
        .get("args")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| invalid("convert_timedelta needs a unit in 'args'".to_string()))?;
    TimeUnit::parse(unit)
}

fn expect_str<'a>(name: &str, value: &'a serde_json::Value) -> std::result::Result<&'a str, TransformError> {
    value.as_str().ok_or_else(|| TransformError::InvalidParameter {
        name: name.to_string(),
        reason: format!("expected a string, found {}", value),
    })
}

/// A validated transform: the operation is resolved and its parameters parsed.
#[derive(Debug, Clone)]
pub struct TransformSpec {
    pub operation: Operation,
    pub output: String,
    pub input_cols: Option<Vec<String>>,
    pub params: OpParams,
}

impl TransformSpec {
    pub fn new(operation: Operation, output: impl Into<String>) -> Self {
        Self {
            operation,
            output: output.into(),
            input_cols: None,
            params: OpParams::default(),
        }
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_cols = Some(inputs.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_params(mut self, params: OpParams) -> Self {
        self.params = params;
        self
    }

    /// 將檔案中的設定轉為可執行的 spec；未知的 operation 在此即報錯
    pub fn from_raw(raw: RawTransformSpec) -> Result<Self> {
        let operation = Registry::global().lookup(&raw.name)?;
        let label = |e: TransformError| EtlError::from_transform(&raw.name, &raw.output, e);

        let params = OpParams::parse(raw.params).map_err(label)?;
        let input_cols = raw.input_cols.map(OneOrMany::into_vec);

        let spec = Self {
            operation,
            output: raw.output.clone(),
            input_cols,
            params,
        };
        spec.check_arity().map_err(label)?;
        spec.check_aggregators().map_err(label)?;
        Ok(spec)
    }

    /// A `column_operator` with several aggregators becomes one spec per
    /// aggregator, writing `{aggregator}_{output}`.
    pub fn expand(self) -> Vec<TransformSpec> {
        if self.operation != Operation::ColumnOperator || self.params.aggregators.len() < 2 {
            return vec![self];
        }
        let inputs = self.resolve_inputs();
        self.params
            .aggregators
            .iter()
            .map(|agg| {
                let mut params = self.params.clone();
                params.aggregators = vec![*agg];
                TransformSpec {
                    operation: self.operation,
                    output: format!("{}_{}", agg.name(), self.output),
                    input_cols: Some(inputs.clone()),
                    params,
                }
            })
            .collect()
    }

    pub fn name(&self) -> &'static str {
        self.operation.name()
    }

    /// Explicit `input_cols`, otherwise the operation's defaults.
    pub fn resolve_inputs(&self) -> Vec<String> {
        match &self.input_cols {
            Some(cols) => cols.clone(),
            None => self.operation.default_inputs(&self.output, &self.params),
        }
    }

    /// Every column that must exist before this spec runs.
    pub fn required_columns(&self) -> Vec<String> {
        let mut cols = self.resolve_inputs();
        cols.extend(self.params.filters.iter().map(|f| f.column.clone()));
        if let Some(key) = &self.params.group_by {
            cols.push(key.clone());
        }
        cols
    }

    fn check_aggregators(&self) -> std::result::Result<(), TransformError> {
        if self.operation == Operation::ColumnOperator && self.params.aggregators.is_empty() {
            return Err(TransformError::InvalidParameter {
                name: "aggregator".to_string(),
                reason: "column_operator needs at least one aggregator".to_string(),
            });
        }
        Ok(())
    }

    fn check_arity(&self) -> std::result::Result<(), TransformError> {
        let (min, max) = self.operation.arity();
        let found = self.resolve_inputs().len();
        if found < min || found > max {
            return Err(TransformError::InvalidParameter {
                name: "input_cols".to_string(),
                reason: format!(
                    "{} takes {} to {} input columns, got {}",
                    self.operation.name(),
                    min,
                    max,
                    found
                ),
            });
        }
        Ok(())
    }
}

/// 解析整個 transform 清單；`__name__` 形式的保留項目會被略過
pub fn parse_specs(raw: Vec<RawTransformSpec>) -> Result<Vec<TransformSpec>> {
    let mut specs = Vec::with_capacity(raw.len());
    for entry in raw.into_iter().filter(|r| !is_reserved(&r.name)) {
        specs.extend(TransformSpec::from_raw(entry)?.expand());
    }
    Ok(specs)
}

fn is_reserved(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, output: &str) -> RawTransformSpec {
        RawTransformSpec {
            name: name.to_string(),
            output: output.to_string(),
            input_cols: None,
            params: IndexMap::new(),
        }
    }

    #[test]
    fn test_unknown_operation_fails_at_load() {
        let err = TransformSpec::from_raw(raw("frobnicate", "x")).unwrap_err();
        assert!(matches!(err, EtlError::UnknownOperationError { name } if name == "frobnicate"));
    }

    #[test]
    fn test_reserved_entries_are_skipped() {
        let specs = parse_specs(vec![raw("__comment__", "x"), raw("word_count", "n")]).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].operation, Operation::WordCount);
    }

    #[test]
    fn test_single_input_defaults_to_output_column() {
        let spec = TransformSpec::from_raw(raw("clean_text", "message")).unwrap();
        assert_eq!(spec.resolve_inputs(), vec!["message".to_string()]);
    }

    #[test]
    fn test_column_name_param_is_honoured() {
        let mut r = raw("word_count", "n_words");
        r.params
            .insert("column_name".to_string(), serde_json::json!("message"));
        let spec = TransformSpec::from_raw(r).unwrap();
        assert_eq!(spec.resolve_inputs(), vec!["message".to_string()]);
    }

    #[test]
    fn test_arity_is_checked() {
        let mut r = raw("word_count", "n");
        r.input_cols = Some(OneOrMany::Many(vec!["a".into(), "b".into()]));
        assert!(matches!(
            TransformSpec::from_raw(r).unwrap_err(),
            EtlError::TransformFailed { .. }
        ));
    }

    #[test]
    fn test_aggregator_list_expands_to_prefixed_outputs() {
        let mut r = raw("column_operator", "response_time");
        r.params
            .insert("aggregator".to_string(), serde_json::json!(["mean", "max"]));
        r.params.insert(
            "post_operator".to_string(),
            serde_json::json!({"name": "convert_timedelta", "args": "m"}),
        );
        let specs = parse_specs(vec![r]).unwrap();

        let outputs: Vec<&str> = specs.iter().map(|s| s.output.as_str()).collect();
        assert_eq!(outputs, vec!["mean_response_time", "max_response_time"]);
        assert_eq!(specs[1].params.aggregators, vec![Operation::Max]);
        assert_eq!(specs[1].resolve_inputs(), vec!["response_time".to_string()]);
        assert_eq!(specs[0].params.post_unit, Some(TimeUnit::Minutes));
    }

    #[test]
    fn test_single_aggregator_keeps_output_name() {
        let mut r = raw("column_operator", "longest");
        r.params.insert("aggregator".to_string(), serde_json::json!("max"));
        r.params.insert("column".to_string(), serde_json::json!("n_words"));
        let specs = parse_specs(vec![r]).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].output, "longest");
        assert_eq!(specs[0].resolve_inputs(), vec!["n_words".to_string()]);
    }

    #[test]
    fn test_column_operator_needs_a_known_aggregator() {
        assert!(TransformSpec::from_raw(raw("column_operator", "x")).is_err());

        let mut r = raw("column_operator", "x");
        r.params
            .insert("aggregator".to_string(), serde_json::json!(["mean", "median"]));
        assert!(TransformSpec::from_raw(r).is_err());
    }

    #[test]
    fn test_bad_unit_is_rejected_at_load() {
        let mut r = raw("calc_handle_time", "handle_time");
        r.params.insert("unit".to_string(), serde_json::json!("days"));
        assert!(TransformSpec::from_raw(r).is_err());
    }

    #[test]
    fn test_filters_are_and_combined() {
        let mut raw_params = IndexMap::new();
        raw_params.insert(
            "filters".to_string(),
            serde_json::json!([
                {"column": "message_type", "operator": "eq", "value": "agent"},
                {"column": "n", "operator": "gt", "value": 1}
            ]),
        );
        let params = OpParams::parse(raw_params).unwrap();
        let table = Table::from_columns([
            (
                "message_type",
                vec![Value::from("agent"), Value::from("agent"), Value::from("customer")],
            ),
            ("n", vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        ])
        .unwrap();
        assert_eq!(params.filtered_rows(&table).unwrap(), vec![1]);
    }
}
