use crate::core::registry::OpContext;
use crate::core::transforms::{conversation_groups, is_flagged};
use crate::domain::{Table, Value};
use crate::utils::error::TransformError;
use regex::Regex;
use std::sync::OnceLock;

/// System notices announcing that an agent joined (English and French widgets).
const JOIN_PATTERN: &str = r"(?:(?:joined\sthe\s)|(?:sest\sjoint\s.\sla\s))conversation\.";

fn join_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(JOIN_PATTERN).expect("static regex"))
}

/// `"{previous}-{current}"` message type pairs. The first message of a
/// conversation is paired with itself.
pub fn calc_message_sequence(
    table: &Table,
    ctx: &OpContext<'_>,
) -> Result<Vec<Value>, TransformError> {
    let types = table.require(ctx.input(0)?)?;
    let mut out = vec![Value::Null; table.len()];

    for group in conversation_groups(table, ctx)? {
        let mut previous: Option<&Value> = None;
        for &row in &group {
            let current = &types[row];
            if !current.is_null() {
                let prev = previous.unwrap_or(current);
                out[row] = Value::Text(format!("{}-{}", prev, current));
            }
            previous = Some(current);
        }
    }
    Ok(out)
}

/// 1 on system messages that announce the start of the conversation.
pub fn convo_start_indicator(
    table: &Table,
    ctx: &OpContext<'_>,
) -> Result<Vec<Value>, TransformError> {
    let types = table.require(ctx.input(0)?)?;
    let messages = table.require(ctx.input(1)?)?;
    let system_types = ctx
        .params
        .get_values("system_type")
        .unwrap_or_else(|| vec![Value::from("system")]);
    let pattern = ctx.params.pattern.as_ref().unwrap_or_else(|| join_pattern());

    Ok(types
        .iter()
        .zip(messages)
        .map(|(kind, message)| {
            let is_system = system_types.iter().any(|t| kind.loosely_equals(t));
            let announces = message.as_str().is_some_and(|m| pattern.is_match(m));
            Value::Int((is_system && announces) as i64)
        })
        .collect())
}

/// 1 on agent/customer messages after the last conversation-start marker of the
/// group. Groups without a marker are all 0.
pub fn convo_indicator(table: &Table, ctx: &OpContext<'_>) -> Result<Vec<Value>, TransformError> {
    let types = table.require(ctx.input(0)?)?;
    let starts = table.require(ctx.input(1)?)?;
    let participant_types = ctx
        .params
        .get_values("message_types")
        .unwrap_or_else(|| vec![Value::from("agent"), Value::from("customer")]);
    let mut out = vec![Value::Int(0); table.len()];

    for group in conversation_groups(table, ctx)? {
        let Some(last_start) = group.iter().rposition(|&row| is_flagged(&starts[row])) else {
            continue;
        };
        for &row in &group[last_start + 1..] {
            if participant_types.iter().any(|t| types[row].loosely_equals(t)) {
                out[row] = Value::Int(1);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spec::OpParams;
    use crate::utils::time::TimeNormalizer;
    use indexmap::IndexMap;

    fn conversation() -> Table {
        Table::from_columns([
            (
                "contact_id",
                vec![
                    Value::Int(1),
                    Value::Int(1),
                    Value::Int(1),
                    Value::Int(1),
                    Value::Int(2),
                    Value::Int(2),
                ],
            ),
            (
                "message_type",
                vec![
                    Value::from("customer"),
                    Value::from("system"),
                    Value::from("agent"),
                    Value::from("customer"),
                    Value::from("customer"),
                    Value::from("agent"),
                ],
            ),
            (
                "message",
                vec![
                    Value::from("hello?"),
                    Value::from("Counsellor joined the conversation."),
                    Value::from("Hi, I'm here"),
                    Value::from("thanks"),
                    Value::from("anyone?"),
                    Value::from("yes"),
                ],
            ),
        ])
        .unwrap()
    }

    fn ctx<'a>(inputs: &'a [String], params: &'a OpParams) -> OpContext<'a> {
        OpContext {
            inputs,
            params,
            group_key: Some("contact_id"),
            time: TimeNormalizer::default(),
        }
    }

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_message_sequence_restarts_per_conversation() {
        let inputs = names(&["message_type"]);
        let params = OpParams::default();
        let out = calc_message_sequence(&conversation(), &ctx(&inputs, &params)).unwrap();
        assert_eq!(
            out,
            vec![
                Value::from("customer-customer"),
                Value::from("customer-system"),
                Value::from("system-agent"),
                Value::from("agent-customer"),
                Value::from("customer-customer"),
                Value::from("customer-agent"),
            ]
        );
    }

    #[test]
    fn test_start_indicator_matches_join_notice() {
        let inputs = names(&["message_type", "message"]);
        let params = OpParams::default();
        let out = convo_start_indicator(&conversation(), &ctx(&inputs, &params)).unwrap();
        assert_eq!(out[1], Value::Int(1));
        assert_eq!(out.iter().filter(|v| **v == Value::Int(1)).count(), 1);
    }

    #[test]
    fn test_start_indicator_french_notice() {
        let table = Table::from_columns([
            ("message_type", vec![Value::from("system")]),
            (
                "message",
                vec![Value::from("Intervenante sest joint à la conversation.")],
            ),
        ])
        .unwrap();
        let inputs = names(&["message_type", "message"]);
        let params = OpParams::default();
        let out = convo_start_indicator(&table, &ctx(&inputs, &params)).unwrap();
        assert_eq!(out, vec![Value::Int(1)]);
    }

    #[test]
    fn test_convo_indicator_after_last_start() {
        let table = conversation();
        let inputs = names(&["message_type", "message"]);
        let params = OpParams::default();
        let starts = convo_start_indicator(&table, &ctx(&inputs, &params)).unwrap();
        let table = table.with_column("convo_start_ind", starts).unwrap();

        let inputs = names(&["message_type", "convo_start_ind"]);
        let out = convo_indicator(&table, &ctx(&inputs, &params)).unwrap();
        // conversation 2 never started
        assert_eq!(
            out,
            vec![
                Value::Int(0),
                Value::Int(0),
                Value::Int(1),
                Value::Int(1),
                Value::Int(0),
                Value::Int(0),
            ]
        );
    }

    #[test]
    fn test_numeric_type_codes_via_params() {
        let table = Table::from_columns([
            ("message_type", vec![Value::Int(1), Value::Int(3)]),
            (
                "message",
                vec![Value::from("Bob joined the conversation."), Value::from("hi")],
            ),
        ])
        .unwrap();
        let mut raw = IndexMap::new();
        raw.insert("system_type".to_string(), serde_json::json!(1));
        let params = OpParams::parse(raw).unwrap();
        let inputs = names(&["message_type", "message"]);
        let out = convo_start_indicator(&table, &ctx(&inputs, &params)).unwrap();
        assert_eq!(out, vec![Value::Int(1), Value::Int(0)]);
    }
}
