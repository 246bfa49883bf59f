use crate::core::transforms::text::{clean, strip_html};
use crate::domain::Record;
use crate::utils::error::{EtlError, Result};
use crate::utils::time::parse_timestamp;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Per-field conversion applied while mapping a contact record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTransform {
    /// `Handlers` list: first entry becomes `agent_id`, the rest `secondary_agents`.
    ParseHandlers,
    ParseHtml,
    CleanText,
    ParseTimestamp,
}

impl FieldTransform {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "parse_handlers" => Ok(FieldTransform::ParseHandlers),
            "parse_html" => Ok(FieldTransform::ParseHtml),
            "clean_text" => Ok(FieldTransform::CleanText),
            "parse_timestamp" => Ok(FieldTransform::ParseTimestamp),
            other => Err(EtlError::UnknownOperationError {
                name: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFieldMapping {
    pub field: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub transform: Option<String>,
}

/// `field` is a path into the record; `A|B` reads `record["A"]["B"]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    pub field: String,
    pub name: Option<String>,
    pub transform: Option<FieldTransform>,
}

impl FieldMapping {
    pub fn from_raw(raw: RawFieldMapping) -> Result<Self> {
        let transform = raw
            .transform
            .as_deref()
            .map(FieldTransform::from_name)
            .transpose()?;
        if raw.name.is_none() && transform != Some(FieldTransform::ParseHandlers) {
            return Err(EtlError::ConfigValidationError {
                field: format!("contacts.{}", raw.field),
                message: "a mapped field needs an output name".to_string(),
            });
        }
        Ok(Self {
            field: raw.field,
            name: raw.name,
            transform,
        })
    }
}

/// Nested lookup by `|`-separated path. Missing keys read as null.
pub fn get_value<'a>(path: &str, record: &'a IndexMap<String, JsonValue>) -> Option<&'a JsonValue> {
    let mut keys = path.split('|');
    let first = record.get(keys.next()?)?;
    keys.try_fold(first, |value, key| value.get(key))
}

/// 將聯絡人清單的原始記錄轉為輸出欄位
#[derive(Debug, Clone, Default)]
pub struct ContactMapper {
    mappings: Vec<FieldMapping>,
}

impl ContactMapper {
    pub fn new(mappings: Vec<FieldMapping>) -> Self {
        Self { mappings }
    }

    pub fn from_raw(raw: Vec<RawFieldMapping>) -> Result<Self> {
        Ok(Self::new(
            raw.into_iter()
                .map(FieldMapping::from_raw)
                .collect::<Result<Vec<_>>>()?,
        ))
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Without mappings the record passes through unchanged.
    pub fn map(&self, record: &Record) -> Record {
        if self.mappings.is_empty() {
            return record.clone();
        }

        let mut data = IndexMap::new();
        for mapping in &self.mappings {
            let value = get_value(&mapping.field, &record.data)
                .cloned()
                .unwrap_or(JsonValue::Null);
            match mapping.transform {
                Some(FieldTransform::ParseHandlers) => {
                    for (key, v) in parse_handlers(&value) {
                        data.insert(key, v);
                    }
                }
                other => {
                    if let Some(name) = &mapping.name {
                        data.insert(name.clone(), apply(other, value));
                    }
                }
            }
        }
        Record { data }
    }

    pub fn map_all(&self, records: &[Record]) -> Vec<Record> {
        records.iter().map(|r| self.map(r)).collect()
    }
}

fn apply(transform: Option<FieldTransform>, value: JsonValue) -> JsonValue {
    match (transform, value) {
        (Some(FieldTransform::ParseHtml), JsonValue::String(s)) => JsonValue::String(strip_html(&s)),
        (Some(FieldTransform::CleanText), JsonValue::String(s)) => JsonValue::String(clean(&s)),
        (Some(FieldTransform::ParseTimestamp), raw) => parse_timestamp(&raw)
            .map(|ts| JsonValue::String(ts.to_string()))
            .unwrap_or(JsonValue::Null),
        (_, value) => value,
    }
}

/// `agent_id` is the first handler, `secondary_agents` the others joined by commas.
pub fn parse_handlers(value: &JsonValue) -> Vec<(String, JsonValue)> {
    let handlers: Vec<&JsonValue> = match value {
        JsonValue::Array(items) => items.iter().filter(|v| !v.is_null()).collect(),
        JsonValue::Null => Vec::new(),
        single => vec![single],
    };

    let agent_id = handlers.first().map(|v| (*v).clone()).unwrap_or(JsonValue::Null);
    let secondary = if handlers.len() > 1 {
        JsonValue::String(
            handlers[1..]
                .iter()
                .map(|v| match v {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
        )
    } else {
        JsonValue::Null
    };

    vec![
        ("agent_id".to_string(), agent_id),
        ("secondary_agents".to_string(), secondary),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: JsonValue) -> Record {
        Record::from_json(value).unwrap()
    }

    fn mapping(field: &str, name: Option<&str>, transform: Option<&str>) -> RawFieldMapping {
        RawFieldMapping {
            field: field.to_string(),
            name: name.map(str::to_string),
            transform: transform.map(str::to_string),
        }
    }

    #[test]
    fn test_nested_path() {
        let r = record(json!({"AdditionalData": {"Language": "fr"}}));
        assert_eq!(get_value("AdditionalData|Language", &r.data), Some(&json!("fr")));
        assert_eq!(get_value("AdditionalData|Missing", &r.data), None);
    }

    #[test]
    fn test_parse_handlers() {
        let out = parse_handlers(&json!([101, 205, 309]));
        assert_eq!(out[0], ("agent_id".to_string(), json!(101)));
        assert_eq!(out[1], ("secondary_agents".to_string(), json!("205,309")));

        let none = parse_handlers(&json!([]));
        assert_eq!(none[0].1, JsonValue::Null);
        assert_eq!(none[1].1, JsonValue::Null);
    }

    #[test]
    fn test_mapper() {
        let mapper = ContactMapper::from_raw(vec![
            mapping("ContactID", Some("contact_id"), None),
            mapping("Handlers", None, Some("parse_handlers")),
            mapping("AdditionalData|Notes", Some("notes"), Some("parse_html")),
            mapping("Missing", Some("missing"), None),
        ])
        .unwrap();

        let out = mapper.map(&record(json!({
            "ContactID": 9,
            "Handlers": ["a1"],
            "AdditionalData": {"Notes": "<p>called&nbsp;back</p>"}
        })));

        assert_eq!(
            out.data.keys().collect::<Vec<_>>(),
            vec!["contact_id", "agent_id", "secondary_agents", "notes", "missing"]
        );
        assert_eq!(out.data["agent_id"], json!("a1"));
        assert_eq!(out.data["notes"], json!("called back"));
        assert_eq!(out.data["missing"], JsonValue::Null);
    }

    #[test]
    fn test_unknown_field_transform() {
        let err = ContactMapper::from_raw(vec![mapping("X", Some("x"), Some("shout"))]).unwrap_err();
        assert!(matches!(err, EtlError::UnknownOperationError { .. }));
    }

    #[test]
    fn test_unnamed_mapping_rejected() {
        assert!(ContactMapper::from_raw(vec![mapping("X", None, None)]).is_err());
    }
}
