use crate::core::registry::OpContext;
use crate::core::transforms::{conversation_groups, is_flagged, normalizer, timestamp_at, unit_or};
use crate::domain::{Table, Timestamp, Value};
use crate::utils::error::TransformError;
use crate::utils::time::{TimeNormalizer, TimeUnit};
use std::cmp::Ordering;

/// Seconds between consecutive messages of a conversation (first message 0).
/// With two input columns, the per-row difference `end - start` instead.
pub fn calc_response_time(
    table: &Table,
    ctx: &OpContext<'_>,
) -> Result<Vec<Value>, TransformError> {
    let time = normalizer(ctx);
    let unit = unit_or(ctx, TimeUnit::Seconds);

    if ctx.inputs.len() == 2 {
        let start_name = ctx.input(0)?;
        let end_name = ctx.input(1)?;
        let starts = table.require(start_name)?;
        let ends = table.require(end_name)?;
        return (0..table.len())
            .map(|row| {
                match (
                    timestamp_at(start_name, starts, row)?,
                    timestamp_at(end_name, ends, row)?,
                ) {
                    (Some(a), Some(b)) => Ok(Value::Float(unit.convert(time.elapsed(&a, &b)?))),
                    _ => Ok(Value::Null),
                }
            })
            .collect();
    }

    let name = ctx.input(0)?;
    let column = table.require(name)?;
    let mut out = vec![Value::Null; table.len()];
    for group in conversation_groups(table, ctx)? {
        let mut previous: Option<Timestamp> = None;
        for (position, &row) in group.iter().enumerate() {
            let current = timestamp_at(name, column, row)?;
            out[row] = match (position, previous, current) {
                (0, _, Some(_)) => Value::Float(0.0),
                (_, Some(prev), Some(cur)) => Value::Float(unit.convert(time.elapsed(&prev, &cur)?)),
                _ => Value::Null,
            };
            previous = current;
        }
    }
    Ok(out)
}

/// Span between the first and last in-conversation message, in minutes by default.
pub fn calc_handle_time(table: &Table, ctx: &OpContext<'_>) -> Result<Value, TransformError> {
    let time = normalizer(ctx);
    let flagged = flagged_timestamps(table, ctx)?;
    let (Some(first), Some(last)) = (earliest(&time, &flagged)?, latest(&time, &flagged)?) else {
        return Ok(Value::Null);
    };
    let unit = unit_or(ctx, TimeUnit::Minutes);
    Ok(Value::Float(unit.convert(time.elapsed(&first, &last)?)))
}

/// Time from the first message of the group to the first in-conversation message.
pub fn calc_wait_time(table: &Table, ctx: &OpContext<'_>) -> Result<Value, TransformError> {
    let time = normalizer(ctx);
    let name = ctx.input(0)?;
    let column = table.require(name)?;
    let all = (0..table.len())
        .filter_map(|row| timestamp_at(name, column, row).transpose())
        .collect::<Result<Vec<_>, _>>()?;

    let flagged = flagged_timestamps(table, ctx)?;
    let (Some(arrived), Some(answered)) = (earliest(&time, &all)?, earliest(&time, &flagged)?)
    else {
        return Ok(Value::Null);
    };
    let unit = unit_or(ctx, TimeUnit::Minutes);
    Ok(Value::Float(unit.convert(time.elapsed(&arrived, &answered)?)))
}

fn flagged_timestamps(table: &Table, ctx: &OpContext<'_>) -> Result<Vec<Timestamp>, TransformError> {
    let name = ctx.input(0)?;
    let column = table.require(name)?;
    let indicator = table.require(ctx.input(1)?)?;
    (0..table.len())
        .filter(|&row| is_flagged(&indicator[row]))
        .filter_map(|row| timestamp_at(name, column, row).transpose())
        .collect()
}

fn earliest(time: &TimeNormalizer, values: &[Timestamp]) -> Result<Option<Timestamp>, TransformError> {
    extreme(time, values, Ordering::Less)
}

fn latest(time: &TimeNormalizer, values: &[Timestamp]) -> Result<Option<Timestamp>, TransformError> {
    extreme(time, values, Ordering::Greater)
}

fn extreme(
    time: &TimeNormalizer,
    values: &[Timestamp],
    wanted: Ordering,
) -> Result<Option<Timestamp>, TransformError> {
    let mut best: Option<Timestamp> = None;
    for ts in values {
        best = match best {
            Some(current) if time.cmp(ts, &current)? != wanted => Some(current),
            _ => Some(*ts),
        };
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spec::OpParams;
    use crate::utils::time::parse_timestamp_str;
    use indexmap::IndexMap;

    fn ts(s: &str) -> Value {
        Value::Timestamp(parse_timestamp_str(s).unwrap())
    }

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    fn ctx<'a>(inputs: &'a [String], params: &'a OpParams) -> OpContext<'a> {
        OpContext {
            inputs,
            params,
            group_key: Some("contact_id"),
            time: TimeNormalizer::default(),
        }
    }

    fn transcript() -> Table {
        Table::from_columns([
            (
                "contact_id",
                vec![Value::Int(7), Value::Int(7), Value::Int(7), Value::Int(7)],
            ),
            (
                "dt",
                vec![
                    ts("2018-02-10T12:00:00"),
                    ts("2018-02-10T12:04:00"),
                    ts("2018-02-10T12:05:30"),
                    ts("2018-02-10T12:20:00"),
                ],
            ),
            (
                "convo_ind",
                vec![Value::Int(0), Value::Int(0), Value::Int(1), Value::Int(1)],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_response_time_between_consecutive_messages() {
        let inputs = names(&["dt"]);
        let params = OpParams::default();
        let out = calc_response_time(&transcript(), &ctx(&inputs, &params)).unwrap();
        assert_eq!(
            out,
            vec![
                Value::Float(0.0),
                Value::Float(240.0),
                Value::Float(90.0),
                Value::Float(870.0)
            ]
        );
    }

    #[test]
    fn test_handle_and_wait_time_in_minutes() {
        let inputs = names(&["dt", "convo_ind"]);
        let params = OpParams::default();
        let table = transcript();
        assert_eq!(
            calc_handle_time(&table, &ctx(&inputs, &params)).unwrap(),
            Value::Float(14.5)
        );
        assert_eq!(
            calc_wait_time(&table, &ctx(&inputs, &params)).unwrap(),
            Value::Float(5.5)
        );
    }

    #[test]
    fn test_no_conversation_gives_null() {
        let table = transcript()
            .with_column("convo_ind", vec![Value::Int(0); 4])
            .unwrap();
        let inputs = names(&["dt", "convo_ind"]);
        let params = OpParams::default();
        assert!(calc_handle_time(&table, &ctx(&inputs, &params))
            .unwrap()
            .is_null());
    }

    #[test]
    fn test_mixed_timestamps_with_timezone_param() {
        let table = Table::from_columns([
            ("contact_id", vec![Value::Int(7)]),
            ("start", vec![ts("2018-02-10T12:00:00")]),
            ("end", vec![ts("2018-02-10T17:00:45Z")]),
        ])
        .unwrap();
        let mut raw = IndexMap::new();
        raw.insert("timezone".to_string(), serde_json::json!("US/Eastern"));
        let params = OpParams::parse(raw).unwrap();
        let inputs = names(&["start", "end"]);
        let out = calc_response_time(&table, &ctx(&inputs, &params)).unwrap();
        assert_eq!(out, vec![Value::Float(45.0)]);
    }

    #[test]
    fn test_mixed_timestamps_without_timezone_fail() {
        let table = Table::from_columns([
            ("contact_id", vec![Value::Int(7)]),
            ("start", vec![ts("2018-02-10T12:00:00")]),
            ("end", vec![ts("2018-02-10T17:00:45Z")]),
        ])
        .unwrap();
        let params = OpParams::default();
        let inputs = names(&["start", "end"]);
        let err = calc_response_time(&table, &ctx(&inputs, &params)).unwrap_err();
        assert!(matches!(err, TransformError::TimezoneMismatch(_)));
    }

    #[test]
    fn test_missing_conversation_key_is_an_error() {
        let table = Table::from_columns([
            ("conversation", vec![Value::Int(1), Value::Int(2)]),
            ("dt", vec![ts("2018-02-10T12:00:00"), ts("2018-02-10T15:00:00")]),
        ])
        .unwrap();
        let inputs = names(&["dt"]);
        let params = OpParams::default();
        let err = calc_response_time(&table, &ctx(&inputs, &params)).unwrap_err();
        assert_eq!(err, TransformError::MissingColumn("contact_id".to_string()));
    }
}
