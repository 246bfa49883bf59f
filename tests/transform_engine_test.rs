use anyhow::Result;
use contact_etl::{parse_transcript, EtlError, Table, Transformer, TransformsConfig, Value};
use serde_json::json;

fn transcript() -> serde_json::Value {
    json!({"Value": {"ContactID": 7, "IMMessages": {"Value": [
        {"Timestamp": "2018-02-10T12:00:00", "MessageType": 4, "Message": "Hi,   I need help!"},
        {"Timestamp": "2018-02-10T12:00:45", "MessageType": 3, "Message": "<p>Hello&nbsp;<b>world</b></p>", "IsHtml": true},
        {"Timestamp": "2018-02-10T12:02:00", "MessageType": 4, "Message": "Thanks <3 ~"}
    ]}}})
}

fn transformer(yaml: &str) -> Result<Transformer> {
    let config = TransformsConfig::from_yaml_str(yaml)?;
    Ok(Transformer::new(config.transcript).with_group_key("contact_id"))
}

#[test]
fn test_parsed_transcript_rows() -> Result<()> {
    let parsed = parse_transcript(&transcript());
    let table = parsed.to_table();

    assert_eq!(
        table.column("sequence").unwrap(),
        &[Value::Int(0), Value::Int(1), Value::Int(2)]
    );
    assert_eq!(
        table.column("prev_message_type").unwrap(),
        &[Value::Null, Value::from("customer"), Value::from("agent")]
    );
    assert_eq!(table.column("message").unwrap()[1], Value::from("Hello world"));
    Ok(())
}

#[test]
fn test_row_level_transforms_keep_row_count_and_are_idempotent() -> Result<()> {
    let table = parse_transcript(&transcript()).to_table();
    let engine = transformer(
        r#"
transcript:
  - name: clean_text
    output: message
  - name: word_count
    output: n_words
    input_cols: [message]
  - name: calc_response_time
    output: response_time
"#,
    )?;

    let first = engine.run_transforms(&table)?;
    let second = engine.run_transforms(&table)?;

    assert_eq!(first, second);
    assert_eq!(first.len(), table.len());
    assert_eq!(first.column("message").unwrap()[2], Value::from("Thanks 3"));
    assert_eq!(
        first.column("n_words").unwrap(),
        &[Value::Int(4), Value::Int(2), Value::Int(2)]
    );
    assert_eq!(
        first.column("response_time").unwrap(),
        &[Value::Float(0.0), Value::Float(45.0), Value::Float(75.0)]
    );
    Ok(())
}

#[test]
fn test_specs_run_in_declared_order() -> Result<()> {
    let table = parse_transcript(&transcript()).to_table();
    let ordered = transformer(
        r#"
transcript:
  - name: str_length
    output: length
    input_cols: message
  - name: mean
    output: mean_length
    input_cols: length
"#,
    )?;
    assert!(ordered.run_transforms(&table)?.has_column("mean_length"));

    let reversed = transformer(
        r#"
transcript:
  - name: mean
    output: mean_length
    input_cols: length
  - name: str_length
    output: length
    input_cols: message
"#,
    )?;
    match reversed.run_transforms(&table) {
        Err(EtlError::MissingColumnError {
            transform,
            output,
            column,
        }) => {
            assert_eq!(transform, "mean");
            assert_eq!(output, "mean_length");
            assert_eq!(column, "length");
        }
        other => panic!("expected a missing column error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_unknown_operation_fails_before_running() {
    let err = TransformsConfig::from_yaml_str(
        "transcript:\n  - name: sentiment_score\n    output: mood\n",
    )
    .unwrap_err();
    assert!(matches!(err, EtlError::UnknownOperationError { name } if name == "sentiment_score"));
}

#[test]
fn test_mixed_timestamps_need_a_timezone() -> Result<()> {
    let table = Table::from_columns([
        ("contact_id", vec![Value::Int(1), Value::Int(1)]),
        (
            "dt",
            vec![
                Value::from("2018-02-10T12:00:00"),
                Value::from("2018-02-10T17:00:30Z"),
            ],
        ),
    ])?;
    let yaml = r#"
transcript:
  - name: calc_response_time
    output: first_rt
    params:
      timezone: US/Eastern
  - name: calc_response_time
    output: second_rt
"#;

    let strict = transformer(yaml)?;
    match strict.run_transforms(&table) {
        Err(EtlError::TimezoneMismatchError {
            transform, output, ..
        }) => {
            assert_eq!(transform, "calc_response_time");
            assert_eq!(output, "second_rt");
        }
        other => panic!("expected a timezone mismatch, got {other:?}"),
    }

    let eastern = transformer(yaml)?.with_timezone(Some(chrono_tz::US::Eastern));
    let result = eastern.run_transforms(&table)?;
    assert_eq!(result.column("first_rt").unwrap(), result.column("second_rt").unwrap());
    assert_eq!(
        result.column("second_rt").unwrap(),
        &[Value::Float(0.0), Value::Float(30.0)]
    );
    Ok(())
}

#[test]
fn test_empty_inputs() -> Result<()> {
    let empty = Table::from_columns([("message", Vec::<Value>::new())])?;
    let counted = transformer("transcript:\n  - name: word_count\n    output: message\n")?
        .run_transforms(&empty)?;
    assert!(counted.is_empty());
    assert!(counted.has_column("message"));

    let table = Table::from_columns([
        ("contact_id", vec![Value::Int(1), Value::Int(2)]),
        ("message_type", vec![Value::from("agent"), Value::from("customer")]),
        ("n_words", vec![Value::Int(4), Value::Int(2)]),
    ])?;
    let config = TransformsConfig::from_yaml_str(
        r#"
transcript_meta:
  - name: mean
    output: agent_words
    input_cols: n_words
    params:
      filters:
        - {column: message_type, operator: eq, value: agent}
"#,
    )?;
    let meta = Transformer::new(config.transcript_meta).with_group_key("contact_id");
    assert!(matches!(
        meta.run_meta_transforms(&table),
        Err(EtlError::EmptyAggregationError { .. })
    ));
    Ok(())
}

#[test]
fn test_one_summary_spec_can_write_several_columns() -> Result<()> {
    let messages = Table::from_columns([
        ("contact_id", vec![Value::Int(1), Value::Int(1), Value::Int(2)]),
        (
            "response_time",
            vec![Value::Float(60.0), Value::Float(180.0), Value::Float(30.0)],
        ),
    ])?;
    let config = TransformsConfig::from_yaml_str(
        r#"
transcript_meta:
  - name: column_operator
    output: response_time
    params:
      aggregator: [mean, max]
      post_operator: {name: convert_timedelta, args: m}
"#,
    )?;
    let summary = Transformer::new(config.transcript_meta)
        .with_group_key("contact_id")
        .run_meta_transforms(&messages)?;

    assert_eq!(
        summary.column_names().collect::<Vec<_>>(),
        vec!["contact_id", "mean_response_time", "max_response_time"]
    );
    assert_eq!(
        summary.column("mean_response_time").unwrap(),
        &[Value::Float(2.0), Value::Float(0.5)]
    );
    assert_eq!(
        summary.column("max_response_time").unwrap(),
        &[Value::Float(3.0), Value::Float(0.5)]
    );
    Ok(())
}

#[test]
fn test_row_pass_without_the_group_key_fails() -> Result<()> {
    let table = Table::from_columns([
        ("conversation", vec![Value::Int(1), Value::Int(1), Value::Int(2)]),
        (
            "dt",
            vec![
                Value::from("2018-02-10T12:00:00"),
                Value::from("2018-02-10T12:01:00"),
                Value::from("2018-02-10T15:00:00"),
            ],
        ),
    ])?;
    let engine = transformer("transcript:\n  - name: calc_response_time\n    output: rt\n")?;
    assert!(matches!(
        engine.run_transforms(&table),
        Err(EtlError::MissingColumnError { column, .. }) if column == "contact_id"
    ));
    Ok(())
}
