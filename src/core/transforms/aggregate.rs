use crate::core::registry::{OpContext, Operation};
use crate::domain::{Table, Value};
use crate::utils::error::TransformError;
use std::cmp::Ordering;

/// Messages that carry the pre-chat survey.
const SURVEY_MARKERS: &[&str] = &[
    "User profile:",
    "Pre survey response",
    "Sondage avant le clavardage",
];

/// Question whose answer is the distress score.
const SURVEY_QUESTIONS: &[&str] = &["How upset are you right now?:", "en ce moment?:"];

/// Non-null cells of the input column on rows passing the filters.
///
/// `Ok(None)` means there were no rows and `allow_empty` is set.
fn selected_values(
    table: &Table,
    ctx: &OpContext<'_>,
) -> Result<Option<Vec<(usize, Value)>>, TransformError> {
    let name = ctx.input(0)?;
    let column = table.require(name)?;
    let rows = ctx.params.filtered_rows(table)?;
    if rows.is_empty() {
        if ctx.params.allow_empty {
            return Ok(None);
        }
        return Err(TransformError::EmptyAggregation(name.to_string()));
    }
    Ok(Some(
        rows.into_iter()
            .filter(|&row| !column[row].is_null())
            .map(|row| (row, column[row].clone()))
            .collect(),
    ))
}

fn numbers(table: &Table, ctx: &OpContext<'_>) -> Result<Option<Vec<Value>>, TransformError> {
    let Some(values) = selected_values(table, ctx)? else {
        return Ok(None);
    };
    let name = ctx.input(0)?;
    values
        .into_iter()
        .map(|(row, value)| match value {
            Value::Int(_) | Value::Float(_) => Ok(value),
            other => Err(TransformError::TypeMismatch {
                column: name.to_string(),
                row,
                expected: "number",
                found: other.type_name().to_string(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

pub fn mean(table: &Table, ctx: &OpContext<'_>) -> Result<Value, TransformError> {
    match numbers(table, ctx)? {
        Some(values) if !values.is_empty() => {
            let total: f64 = values.iter().filter_map(Value::as_f64).sum();
            Ok(Value::Float(total / values.len() as f64))
        }
        _ => Ok(Value::Null),
    }
}

/// Integer sum while every value is an integer.
pub fn sum(table: &Table, ctx: &OpContext<'_>) -> Result<Value, TransformError> {
    let Some(values) = numbers(table, ctx)? else {
        return Ok(Value::Null);
    };
    if values.is_empty() {
        return Ok(Value::Null);
    }
    if values.iter().all(|v| matches!(v, Value::Int(_))) {
        let total = values
            .iter()
            .filter_map(Value::as_i64)
            .try_fold(0i64, |acc, v| acc.checked_add(v));
        if let Some(total) = total {
            return Ok(Value::Int(total));
        }
    }
    Ok(Value::Float(values.iter().filter_map(Value::as_f64).sum()))
}

pub fn max(table: &Table, ctx: &OpContext<'_>) -> Result<Value, TransformError> {
    extreme(table, ctx, Ordering::Greater)
}

pub fn min(table: &Table, ctx: &OpContext<'_>) -> Result<Value, TransformError> {
    extreme(table, ctx, Ordering::Less)
}

fn extreme(table: &Table, ctx: &OpContext<'_>, wanted: Ordering) -> Result<Value, TransformError> {
    let Some(values) = selected_values(table, ctx)? else {
        return Ok(Value::Null);
    };
    let name = ctx.input(0)?;
    let mut best: Option<Value> = None;
    for (row, value) in values {
        best = match best {
            None => Some(value),
            Some(current) => match value.compare(&current) {
                Some(ord) if ord == wanted => Some(value),
                Some(_) => Some(current),
                None => {
                    return Err(TransformError::TypeMismatch {
                        column: name.to_string(),
                        row,
                        expected: current.type_name(),
                        found: value.type_name().to_string(),
                    })
                }
            },
        };
    }
    Ok(best.unwrap_or(Value::Null))
}

/// The configured `aggregator` over the input column, optionally rescaled from
/// seconds by a `convert_timedelta` post operator.
pub fn column_operator(table: &Table, ctx: &OpContext<'_>) -> Result<Value, TransformError> {
    let value = match ctx.params.aggregators.first() {
        Some(Operation::Mean) => mean(table, ctx)?,
        Some(Operation::Max) => max(table, ctx)?,
        Some(Operation::Min) => min(table, ctx)?,
        Some(Operation::Sum) => sum(table, ctx)?,
        _ => {
            return Err(TransformError::InvalidParameter {
                name: "aggregator".to_string(),
                reason: "expected one of mean, max, min, sum".to_string(),
            })
        }
    };
    Ok(match (ctx.params.post_unit, value.as_f64()) {
        (Some(unit), Some(seconds)) => Value::Float(unit.from_seconds(seconds)),
        _ => value,
    })
}

/// Rows passing every filter; zero is a valid count.
pub fn row_count(table: &Table, ctx: &OpContext<'_>) -> Result<Value, TransformError> {
    Ok(Value::Int(ctx.params.filtered_rows(table)?.len() as i64))
}

/// Distress score answered in the pre-chat survey, if the conversation has one.
pub fn survey_score(table: &Table, ctx: &OpContext<'_>) -> Result<Value, TransformError> {
    let messages = table.require(ctx.input(0)?)?;
    let markers = string_list(ctx, "markers", SURVEY_MARKERS);
    let questions = string_list(ctx, "questions", SURVEY_QUESTIONS);

    let score = messages
        .iter()
        .filter_map(Value::as_str)
        .filter(|m| markers.iter().any(|marker| m.contains(marker.as_str())))
        .find_map(|m| extract_score(m, &questions));
    Ok(score.map(Value::Int).unwrap_or(Value::Null))
}

fn string_list(ctx: &OpContext<'_>, key: &str, default: &[&str]) -> Vec<String> {
    match ctx.params.get_values(key) {
        Some(values) => values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

fn extract_score(message: &str, questions: &[String]) -> Option<i64> {
    questions.iter().find_map(|q| {
        let (_, answer) = message.split_once(q.as_str())?;
        let token: String = answer
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect();
        token.parse::<f64>().ok().map(|n| n as i64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spec::OpParams;
    use crate::utils::time::TimeNormalizer;
    use indexmap::IndexMap;

    fn ctx<'a>(inputs: &'a [String], params: &'a OpParams) -> OpContext<'a> {
        OpContext {
            inputs,
            params,
            group_key: None,
            time: TimeNormalizer::default(),
        }
    }

    fn lengths() -> Table {
        Table::from_columns([
            (
                "message_type",
                vec![Value::from("agent"), Value::from("customer"), Value::from("agent")],
            ),
            ("length", vec![Value::Int(10), Value::Int(3), Value::Int(20)]),
        ])
        .unwrap()
    }

    fn params(raw: serde_json::Value) -> OpParams {
        let map: IndexMap<String, serde_json::Value> = serde_json::from_value(raw).unwrap();
        OpParams::parse(map).unwrap()
    }

    #[test]
    fn test_mean_with_filter() {
        let inputs = vec!["length".to_string()];
        let p = params(serde_json::json!({
            "filters": [{"column": "message_type", "operator": "eq", "value": "agent"}]
        }));
        assert_eq!(mean(&lengths(), &ctx(&inputs, &p)).unwrap(), Value::Float(15.0));
    }

    #[test]
    fn test_mean_of_zero_rows_is_an_error() {
        let inputs = vec!["length".to_string()];
        let p = OpParams::default();
        let empty = lengths().select_rows(&[]);
        assert_eq!(
            mean(&empty, &ctx(&inputs, &p)).unwrap_err(),
            TransformError::EmptyAggregation("length".to_string())
        );
    }

    #[test]
    fn test_allow_empty_gives_null() {
        let inputs = vec!["length".to_string()];
        let p = params(serde_json::json!({
            "allow_empty": true,
            "filters": [{"column": "message_type", "operator": "eq", "value": "system"}]
        }));
        assert!(max(&lengths(), &ctx(&inputs, &p)).unwrap().is_null());
    }

    #[test]
    fn test_min_max_sum() {
        let inputs = vec!["length".to_string()];
        let p = OpParams::default();
        let table = lengths();
        assert_eq!(max(&table, &ctx(&inputs, &p)).unwrap(), Value::Int(20));
        assert_eq!(min(&table, &ctx(&inputs, &p)).unwrap(), Value::Int(3));
        assert_eq!(sum(&table, &ctx(&inputs, &p)).unwrap(), Value::Int(33));
    }

    #[test]
    fn test_row_count_filters() {
        let p = params(serde_json::json!({
            "filters": [
                {"column": "message_type", "operator": "eq", "value": "agent"},
                {"column": "length", "operator": "lt", "value": 15}
            ]
        }));
        assert_eq!(row_count(&lengths(), &ctx(&[], &p)).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_survey_score() {
        let table = Table::from_columns([(
            "message",
            vec![
                Value::from("hello"),
                Value::from("User profile: Age: 15 How upset are you right now?: 4 Gender: n/a"),
            ],
        )])
        .unwrap();
        let inputs = vec!["message".to_string()];
        let p = OpParams::default();
        assert_eq!(survey_score(&table, &ctx(&inputs, &p)).unwrap(), Value::Int(4));
    }

    #[test]
    fn test_survey_score_absent() {
        let table = Table::from_columns([("message", vec![Value::from("hello")])]).unwrap();
        let inputs = vec!["message".to_string()];
        let p = OpParams::default();
        assert!(survey_score(&table, &ctx(&inputs, &p)).unwrap().is_null());
    }

    #[test]
    fn test_column_operator_with_post_operator() {
        let table = Table::from_columns([(
            "response_time",
            vec![Value::Float(30.0), Value::Float(150.0), Value::Null],
        )])
        .unwrap();
        let inputs = vec!["response_time".to_string()];

        let p = params(serde_json::json!({
            "aggregator": "max",
            "post_operator": {"name": "convert_timedelta", "args": "m"}
        }));
        assert_eq!(
            column_operator(&table, &ctx(&inputs, &p)).unwrap(),
            Value::Float(2.5)
        );

        let p = params(serde_json::json!({"aggregator": "mean"}));
        assert_eq!(
            column_operator(&table, &ctx(&inputs, &p)).unwrap(),
            Value::Float(90.0)
        );
    }
}
