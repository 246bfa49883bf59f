use crate::core::transforms::text::{collapse_whitespace, strip_html};
use crate::domain::{Table, Timestamp, Value};
use crate::utils::error::{EtlError, Result};
use crate::utils::time::{parse_timestamp, TimeNormalizer};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, warn};

/// Who wrote a message. Numeric codes come from the chat platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    System,
    Agent,
    Customer,
    Other(i64),
}

impl MessageType {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => MessageType::System,
            3 => MessageType::Agent,
            4 => MessageType::Customer,
            other => MessageType::Other(other),
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "system" => Some(MessageType::System),
            "agent" => Some(MessageType::Agent),
            "customer" => Some(MessageType::Customer),
            other => other.parse::<i64>().ok().map(Self::from_code),
        }
    }

    fn from_json(raw: &serde_json::Value) -> Option<Self> {
        match raw {
            serde_json::Value::Number(n) => n.as_i64().map(Self::from_code),
            serde_json::Value::String(s) => Self::from_label(s),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::System => f.write_str("system"),
            MessageType::Agent => f.write_str("agent"),
            MessageType::Customer => f.write_str("customer"),
            MessageType::Other(code) => write!(f, "type_{}", code),
        }
    }
}

/// One chat line after validation and normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub contact_id: Value,
    pub sequence: usize,
    pub sender: Value,
    pub display_name: Option<String>,
    pub dt: Timestamp,
    pub message_type: MessageType,
    pub prev_message_type: Option<MessageType>,
    pub message: String,
    /// Seconds since the first message; null when the two timestamps cannot be compared.
    pub elapsed_seconds: Option<f64>,
}

/// An entry that was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEntry {
    pub index: usize,
    pub reason: String,
}

impl From<MalformedEntry> for EtlError {
    fn from(entry: MalformedEntry) -> Self {
        EtlError::MalformedEntryError {
            index: entry.index,
            reason: entry.reason,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTranscript {
    pub contact_id: Value,
    pub rows: Vec<MessageRow>,
    pub warnings: Vec<MalformedEntry>,
}

impl ParsedTranscript {
    /// Fills in the contact id on rows that did not carry one.
    pub fn with_default_contact(mut self, contact_id: Value) -> Self {
        if self.contact_id.is_null() {
            self.contact_id = contact_id.clone();
        }
        for row in &mut self.rows {
            if row.contact_id.is_null() {
                row.contact_id = contact_id.clone();
            }
        }
        self
    }

    pub fn to_table(&self) -> Table {
        messages_table(&self.rows)
    }
}

/// Message rows as a table with the canonical transcript columns.
pub fn messages_table(rows: &[MessageRow]) -> Table {
    let column = |f: &dyn Fn(&MessageRow) -> Value| rows.iter().map(f).collect::<Vec<_>>();
    let columns = [
        ("contact_id", column(&|r| r.contact_id.clone())),
        ("sequence", column(&|r| Value::Int(r.sequence as i64))),
        ("sender", column(&|r| r.sender.clone())),
        ("display_name", column(&|r| r.display_name.clone().into())),
        ("dt", column(&|r| Value::Timestamp(r.dt))),
        ("message_type", column(&|r| Value::Text(r.message_type.to_string()))),
        (
            "prev_message_type",
            column(&|r| r.prev_message_type.map(|t| t.to_string()).into()),
        ),
        ("message", column(&|r| Value::Text(r.message.clone()))),
        ("elapsed_seconds", column(&|r| r.elapsed_seconds.into())),
    ];

    columns
        .into_iter()
        .try_fold(Table::new(), |table, (name, values)| table.with_column(name, values))
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawEntry {
    message: Option<String>,
    timestamp: Option<serde_json::Value>,
    message_type: Option<serde_json::Value>,
    sender: Option<serde_json::Value>,
    display_name: Option<String>,
    #[serde(alias = "ContactID")]
    contact_id: Option<serde_json::Value>,
    is_html: Option<bool>,
}

struct ValidEntry {
    contact_id: Value,
    sender: Value,
    display_name: Option<String>,
    dt: Timestamp,
    message_type: MessageType,
    message: String,
}

/// 將原始對話紀錄解析為有序的訊息列
///
/// Accepted payload shapes: the API envelope `{"Value": {"ContactID", "IMMessages": {"Value": [..]}}}`,
/// an object with `IMMessages` directly, or a bare list of entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct TranscriptParser {
    time: TimeNormalizer,
}

impl TranscriptParser {
    pub fn new(time: TimeNormalizer) -> Self {
        Self { time }
    }

    pub fn parse(&self, payload: &serde_json::Value) -> ParsedTranscript {
        let (contact_id, entries) = unwrap_envelope(payload);
        let mut parsed = ParsedTranscript {
            contact_id: contact_id.clone(),
            ..Default::default()
        };
        let Some(entries) = entries else {
            debug!("Transcript for {} has no message list", contact_id);
            return parsed;
        };

        let mut first: Option<Timestamp> = None;
        let mut previous: Option<MessageType> = None;

        for (index, raw) in entries.iter().enumerate() {
            let entry = match validate_entry(raw) {
                Ok(entry) => entry,
                Err(reason) => {
                    warn!("⚠️ Skipping transcript entry {}: {}", index, reason);
                    parsed.warnings.push(MalformedEntry { index, reason });
                    continue;
                }
            };

            let start = *first.get_or_insert(entry.dt);
            let elapsed = match self.time.elapsed(&start, &entry.dt) {
                Ok(delta) => Some(delta.num_milliseconds() as f64 / 1000.0),
                Err(e) => {
                    warn!("⚠️ No elapsed time for transcript entry {}: {}", index, e);
                    None
                }
            };

            let row_contact = if entry.contact_id.is_null() {
                contact_id.clone()
            } else {
                entry.contact_id
            };

            parsed.rows.push(MessageRow {
                contact_id: row_contact,
                sequence: parsed.rows.len(),
                sender: entry.sender,
                display_name: entry.display_name,
                dt: entry.dt,
                message_type: entry.message_type,
                prev_message_type: previous,
                message: entry.message,
                elapsed_seconds: elapsed,
            });
            previous = Some(entry.message_type);
        }
        parsed
    }
}

/// Parses with default settings (naive and aware timestamps are not mixed).
pub fn parse_transcript(payload: &serde_json::Value) -> ParsedTranscript {
    TranscriptParser::default().parse(payload)
}

/// Reads a raw transcript file and parses it.
pub fn parse_transcript_bytes(parser: &TranscriptParser, bytes: &[u8]) -> Result<ParsedTranscript> {
    let payload: serde_json::Value = serde_json::from_slice(bytes)?;
    Ok(parser.parse(&payload))
}

fn unwrap_envelope(payload: &serde_json::Value) -> (Value, Option<&Vec<serde_json::Value>>) {
    let body = payload.get("Value").unwrap_or(payload);
    let contact_id = body
        .get("ContactID")
        .or_else(|| body.get("ContactId"))
        .map(Value::from_json)
        .unwrap_or(Value::Null);

    let entries = match body {
        serde_json::Value::Array(items) => Some(items),
        other => other.get("IMMessages").and_then(|messages| match messages {
            serde_json::Value::Array(items) => Some(items),
            wrapped => wrapped.get("Value").and_then(serde_json::Value::as_array),
        }),
    };
    (contact_id, entries)
}

fn validate_entry(raw: &serde_json::Value) -> std::result::Result<ValidEntry, String> {
    let entry: RawEntry =
        serde_json::from_value(raw.clone()).map_err(|e| format!("unreadable entry: {}", e))?;

    let message = entry.message.ok_or("missing Message")?;
    let raw_ts = entry.timestamp.ok_or("missing Timestamp")?;
    let dt = parse_timestamp(&raw_ts).ok_or_else(|| format!("unparseable Timestamp {}", raw_ts))?;
    let raw_type = entry.message_type.ok_or("missing MessageType")?;
    let message_type =
        MessageType::from_json(&raw_type).ok_or_else(|| format!("unknown MessageType {}", raw_type))?;

    let is_html = entry
        .is_html
        .unwrap_or_else(|| message.contains('<') && message.contains('>'));
    let message = if is_html {
        strip_html(&message)
    } else {
        collapse_whitespace(&message)
    };

    Ok(ValidEntry {
        contact_id: entry.contact_id.as_ref().map(Value::from_json).unwrap_or(Value::Null),
        sender: entry.sender.as_ref().map(Value::from_json).unwrap_or(Value::Null),
        display_name: entry.display_name,
        dt,
        message_type,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(messages: serde_json::Value) -> serde_json::Value {
        json!({"Value": {"ContactID": 42, "IMMessages": {"Value": messages}}})
    }

    fn entry(ts: &str, kind: i64, text: &str) -> serde_json::Value {
        json!({
            "Sender": 1001,
            "DisplayName": "Visitor",
            "Timestamp": ts,
            "MessageType": kind,
            "Message": text,
            "IsHtml": false
        })
    }

    #[test]
    fn test_three_valid_entries() {
        let payload = envelope(json!([
            entry("2018-02-10T12:00:00", 4, "hi"),
            entry("2018-02-10T12:00:30", 3, "hello"),
            entry("2018-02-10T12:01:00", 4, "ok"),
        ]));
        let parsed = parse_transcript(&payload);

        assert!(parsed.warnings.is_empty());
        assert_eq!(
            parsed.rows.iter().map(|r| r.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(
            parsed
                .rows
                .iter()
                .map(|r| r.prev_message_type)
                .collect::<Vec<_>>(),
            vec![None, Some(MessageType::Customer), Some(MessageType::Agent)]
        );
        assert_eq!(parsed.rows[2].elapsed_seconds, Some(60.0));
        assert_eq!(parsed.rows[0].contact_id, Value::Int(42));
    }

    #[test]
    fn test_html_body_is_stripped() {
        let mut raw = entry("2018-02-10T12:00:00", 3, "<p>Hello&nbsp;<b>world</b></p>");
        raw["IsHtml"] = json!(true);
        let parsed = parse_transcript(&envelope(json!([raw])));
        assert_eq!(parsed.rows[0].message, "Hello world");
    }

    #[test]
    fn test_html_is_detected_without_flag() {
        let raw = json!({
            "Timestamp": "2018-02-10T12:00:00",
            "MessageType": "agent",
            "Message": "<div>take   care</div>"
        });
        let parsed = parse_transcript(&json!([raw]));
        assert_eq!(parsed.rows[0].message, "take care");
        assert!(parsed.rows[0].contact_id.is_null());
    }

    #[test]
    fn test_malformed_entry_is_skipped_and_reported() {
        let payload = envelope(json!([
            entry("2018-02-10T12:00:00", 4, "hi"),
            {"Message": "no timestamp", "MessageType": 3},
            entry("2018-02-10T12:00:30", 3, "hello"),
        ]));
        let parsed = parse_transcript(&payload);

        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[1].sequence, 1);
        assert_eq!(parsed.rows[1].prev_message_type, Some(MessageType::Customer));
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.warnings[0].index, 1);
        assert!(parsed.warnings[0].reason.contains("Timestamp"));
    }

    #[test]
    fn test_empty_transcript_is_not_an_error() {
        let parsed = parse_transcript(&envelope(json!([])));
        assert!(parsed.rows.is_empty());
        assert!(parsed.warnings.is_empty());
        assert!(parsed.to_table().is_empty());
    }

    #[test]
    fn test_mixed_timestamp_kinds_need_timezone() {
        let payload = envelope(json!([
            entry("2018-02-10T12:00:00", 4, "hi"),
            entry("2018-02-10T17:00:30Z", 3, "hello"),
        ]));

        let strict = parse_transcript(&payload);
        assert_eq!(strict.rows.len(), 2);
        assert!(strict.warnings.is_empty());
        assert_eq!(strict.rows[0].elapsed_seconds, Some(0.0));
        assert_eq!(strict.rows[1].elapsed_seconds, None);
        assert_eq!(strict.rows[1].message, "hello");

        let eastern = TranscriptParser::new(TimeNormalizer::new(Some(chrono_tz::US::Eastern)));
        let parsed = eastern.parse(&payload);
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[1].elapsed_seconds, Some(30.0));
    }

    #[test]
    fn test_complete_entries_are_kept_when_elapsed_is_unknown() {
        let payload = envelope(json!([
            entry("2018-02-10T12:00:00", 4, "hi"),
            entry("2018-02-10T17:00:30Z", 3, "hello"),
            entry("2018-02-10T17:01:00Z", 4, "thanks"),
        ]));
        let parsed = parse_transcript(&payload);
        assert_eq!(parsed.rows.len(), 3);
        assert!(parsed.warnings.is_empty());
        assert_eq!(
            parsed.rows.iter().map(|r| r.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        let table = parsed.to_table();
        assert_eq!(
            table.column("elapsed_seconds").unwrap(),
            &[Value::Float(0.0), Value::Null, Value::Null]
        );
    }

    #[test]
    fn test_local_time_in_dst_gap_keeps_the_row() {
        let payload = envelope(json!([
            entry("2018-03-11T06:59:00Z", 4, "hi"),
            entry("2018-03-11T02:30:00", 3, "hello"),
        ]));
        let eastern = TranscriptParser::new(TimeNormalizer::new(Some(chrono_tz::US::Eastern)));
        let parsed = eastern.parse(&payload);
        assert_eq!(parsed.rows.len(), 2);
        assert!(parsed.warnings.is_empty());
        assert_eq!(parsed.rows[1].elapsed_seconds, None);
    }

    #[test]
    fn test_table_columns() {
        let parsed = parse_transcript(&envelope(json!([entry(
            "2018-02-10T12:00:00",
            1,
            "Ana joined the conversation."
        )])));
        let table = parsed.to_table();
        assert_eq!(table.len(), 1);
        assert_eq!(table.column("message_type").unwrap(), &[Value::from("system")]);
        assert!(table.column("prev_message_type").unwrap()[0].is_null());
    }
}
