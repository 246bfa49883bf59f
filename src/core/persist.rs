use crate::core::Storage;
use crate::domain::{Record, Table, Value};
use crate::utils::error::{EtlError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};
use std::str::FromStr;
use zip::write::{FileOptions, ZipWriter};

/// Output encodings for result tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Csv,
    Tsv,
    Json,
    /// CSV, TSV and JSON renditions bundled in one archive.
    Zip,
}

impl FileType {
    pub fn extension(&self) -> &'static str {
        match self {
            FileType::Csv => "csv",
            FileType::Tsv => "tsv",
            FileType::Json => "json",
            FileType::Zip => "zip",
        }
    }
}

impl FromStr for FileType {
    type Err = EtlError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(FileType::Csv),
            "tsv" | "txt" => Ok(FileType::Tsv),
            "json" => Ok(FileType::Json),
            "zip" => Ok(FileType::Zip),
            other => Err(EtlError::InvalidConfigValueError {
                field: "load.filetype".to_string(),
                value: other.to_string(),
                reason: "expected csv, tsv, json or zip".to_string(),
            }),
        }
    }
}

/// `{prefix}/{name}.{ext}`, without a leading slash when the prefix is empty.
pub fn object_key(prefix: &str, name: &str, filetype: FileType) -> String {
    join_key(prefix, &format!("{}.{}", name, filetype.extension()))
}

/// Raw contact list of one day, e.g. `IM_2018-02-10_contacts.txt`.
pub fn contacts_file_name(interaction_type: &str, day: chrono::NaiveDate) -> String {
    format!("{}_{}_contacts.txt", interaction_type, day.format("%Y-%m-%d"))
}

/// Raw transcript of one contact, e.g. `197621_data.txt`.
pub fn transcript_file_name(contact_id: i64) -> String {
    format!("{}_data.txt", contact_id)
}

/// Joins storage path segments, skipping empty ones.
pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

fn delimited(table: &Table, delimiter: u8) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());
    if table.width() > 0 {
        writer.write_record(table.column_names())?;
    }
    for row in table.rows() {
        writer.write_record(row.values().map(|v| v.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| EtlError::StorageError {
            message: format!("Failed to flush delimited output: {}", e),
        })
}

/// 將表格編碼為指定格式
pub fn encode_table(name: &str, table: &Table, filetype: FileType) -> Result<Vec<u8>> {
    match filetype {
        FileType::Csv => delimited(table, b','),
        FileType::Tsv => delimited(table, b'\t'),
        FileType::Json => Ok(serde_json::to_vec_pretty(&table.to_json_rows())?),
        FileType::Zip => {
            let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
            for inner in [FileType::Csv, FileType::Tsv, FileType::Json] {
                let entry = format!("{}.{}", name, inner.extension());
                zip.start_file::<_, ()>(entry, FileOptions::default())?;
                zip.write_all(&encode_table(name, table, inner)?)?;
            }
            Ok(zip.finish()?.into_inner())
        }
    }
}

/// Reads a table back. Delimited cells come back as text (empty cells as null);
/// a zip archive is read through its JSON entry.
pub fn decode_table(name: &str, bytes: &[u8], filetype: FileType) -> Result<Table> {
    match filetype {
        FileType::Csv => read_delimited(bytes, b','),
        FileType::Tsv => read_delimited(bytes, b'\t'),
        FileType::Json => {
            let rows: Vec<serde_json::Value> = serde_json::from_slice(bytes)?;
            let records: Vec<Record> = rows.into_iter().filter_map(Record::from_json).collect();
            Ok(Table::from_records(&records))
        }
        FileType::Zip => {
            let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))?;
            let mut entry = archive.by_name(&format!("{}.json", name))?;
            let mut json = Vec::new();
            entry.read_to_end(&mut json)?;
            decode_table(name, &json, FileType::Json)
        }
    }
}

fn read_delimited(bytes: &[u8], delimiter: u8) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_reader(bytes);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut columns: Vec<Vec<Value>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record?;
        for (i, cell) in record.iter().enumerate().take(headers.len()) {
            columns[i].push(if cell.is_empty() {
                Value::Null
            } else {
                Value::from(cell)
            });
        }
    }
    Table::from_columns(headers.into_iter().zip(columns)).map_err(|e| EtlError::ValidationError {
        message: format!("Inconsistent delimited file: {}", e),
    })
}

pub async fn write_table<S: Storage>(
    storage: &S,
    key: &str,
    name: &str,
    table: &Table,
    filetype: FileType,
) -> Result<()> {
    let data = encode_table(name, table, filetype)?;
    tracing::debug!("Writing {} ({} rows, {} bytes)", key, table.len(), data.len());
    storage.write_file(key, &data).await
}

pub async fn read_table<S: Storage>(
    storage: &S,
    key: &str,
    name: &str,
    filetype: FileType,
) -> Result<Table> {
    let data = storage.read_file(key).await?;
    decode_table(name, &data, filetype)
}

/// Persists any serializable value (raw payloads, run state) as JSON.
pub async fn write_json<S: Storage, T: Serialize + ?Sized>(storage: &S, key: &str, value: &T) -> Result<()> {
    let data = serde_json::to_vec(value)?;
    storage.write_file(key, &data).await
}

pub async fn read_json<S: Storage, T: DeserializeOwned>(storage: &S, key: &str) -> Result<T> {
    let data = storage.read_file(key).await?;
    Ok(serde_json::from_slice(&data)?)
}
