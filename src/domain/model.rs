use crate::domain::table::Table;
use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A loosely typed record as returned by the contact API.
///
/// Serializes as the bare JSON object so saved raw files can be replayed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    pub data: IndexMap<String, serde_json::Value>,
}

impl Record {
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Object(obj) => Some(Record {
                data: obj.into_iter().collect(),
            }),
            _ => None,
        }
    }
}

/// One day of contacts to request, already rendered in the API's timezone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub day: NaiveDate,
    pub start: String,
    pub end: String,
}

/// A raw transcript payload together with the contact it was requested for.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTranscript {
    pub contact_id: i64,
    pub payload: serde_json::Value,
}

/// Everything pulled from the source for one run.
#[derive(Debug, Clone, Default)]
pub struct ExtractedBatch {
    /// (load file name, contacts of that day)
    pub contact_files: Vec<(String, Vec<Record>)>,
    pub transcripts: Vec<RawTranscript>,
}

#[derive(Debug, Clone, Default)]
pub struct TransformResult {
    pub contacts: Table,
    pub messages: Table,
    pub summary: Table,
    pub malformed_entries: usize,
}
