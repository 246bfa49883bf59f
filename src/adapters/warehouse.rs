use crate::domain::{Table, Timestamp, Value};
use crate::utils::error::{EtlError, Result};
use diesel::pg::{Pg, PgConnection};
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types::{BigInt, Bool, Double, Nullable, Text};
use diesel::{Connection, RunQueryDsl};

/// Rows per INSERT statement.
const BATCH_ROWS: usize = 500;

/// Postgres type a column is bound as, taken from its non-null cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    BigInt,
    Double,
    Bool,
    Text,
    Timestamp,
    Timestamptz,
}

impl ColumnKind {
    fn of(values: &[Value]) -> Self {
        let mut kind: Option<ColumnKind> = None;
        for value in values {
            let next = match value {
                Value::Null => continue,
                Value::Bool(_) => ColumnKind::Bool,
                Value::Int(_) => ColumnKind::BigInt,
                Value::Float(_) => ColumnKind::Double,
                Value::Text(_) => ColumnKind::Text,
                Value::Timestamp(Timestamp::Naive(_)) => ColumnKind::Timestamp,
                Value::Timestamp(Timestamp::Aware(_)) => ColumnKind::Timestamptz,
            };
            kind = Some(match (kind, next) {
                (None, k) => k,
                (Some(a), b) if a == b => a,
                (Some(ColumnKind::BigInt), ColumnKind::Double)
                | (Some(ColumnKind::Double), ColumnKind::BigInt) => ColumnKind::Double,
                _ => ColumnKind::Text,
            });
        }
        kind.unwrap_or(ColumnKind::Text)
    }

    /// 時間戳以文字綁定後再轉型
    fn placeholder(&self, n: usize) -> String {
        match self {
            ColumnKind::Timestamp => format!("CAST(${} AS timestamp)", n),
            ColumnKind::Timestamptz => format!("CAST(${} AS timestamptz)", n),
            _ => format!("${}", n),
        }
    }
}

/// One INSERT with its bind values in placeholder order.
#[derive(Debug, Clone)]
pub struct InsertBatch {
    pub sql: String,
    pub params: Vec<(ColumnKind, Value)>,
}

impl InsertBatch {
    fn query(&self) -> BoxedSqlQuery<'_, Pg, SqlQuery> {
        let mut query = diesel::sql_query(self.sql.as_str()).into_boxed::<Pg>();
        for (kind, value) in &self.params {
            query = match kind {
                ColumnKind::BigInt => query.bind::<Nullable<BigInt>, _>(value.as_i64()),
                ColumnKind::Double => {
                    query.bind::<Nullable<Double>, _>(value.as_f64().filter(|f| f.is_finite()))
                }
                ColumnKind::Bool => query.bind::<Nullable<Bool>, _>(match value {
                    Value::Bool(b) => Some(*b),
                    _ => None,
                }),
                ColumnKind::Text | ColumnKind::Timestamp | ColumnKind::Timestamptz => {
                    query.bind::<Nullable<Text>, _>(text_of(value))
                }
            };
        }
        query
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Text(s) => Some(s.clone()),
        Value::Timestamp(ts) => Some(ts.to_string()),
        Value::Float(f) if !f.is_finite() => None,
        other => Some(other.to_json().to_string()),
    }
}

/// 將結果表格批次寫入 Postgres
#[derive(Debug, Clone)]
pub struct PostgresSink {
    database_url: String,
}

impl PostgresSink {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Appends every row of `table` to `table_name`. Returns the number of rows written.
    pub async fn insert_table(&self, table_name: &str, table: &Table) -> Result<usize> {
        let batches = insert_batches(table_name, table, BATCH_ROWS);
        if batches.is_empty() {
            return Ok(0);
        }

        let url = self.database_url.clone();
        let rows = table.len();
        let target = table_name.to_string();
        tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut conn = PgConnection::establish(&url).map_err(|e| EtlError::StorageError {
                message: format!("Cannot connect to warehouse: {}", e),
            })?;
            conn.transaction(|conn| {
                for batch in &batches {
                    batch.query().execute(conn)?;
                }
                Ok::<_, diesel::result::Error>(())
            })
            .map_err(|e| EtlError::StorageError {
                message: format!("Insert into {} failed: {}", target, e),
            })?;
            Ok(rows)
        })
        .await
        .map_err(|e| EtlError::ProcessingError {
            message: format!("Warehouse task panicked: {}", e),
        })?
        .inspect(|n| tracing::info!("🗄️ Inserted {} rows into {}", n, table_name))
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Multi-row INSERT statements with `$n` placeholders; empty for an empty table.
pub fn insert_batches(table_name: &str, table: &Table, batch_rows: usize) -> Vec<InsertBatch> {
    if table.is_empty() || table.width() == 0 {
        return Vec::new();
    }
    let names: Vec<&str> = table.column_names().collect();
    let kinds: Vec<ColumnKind> = names
        .iter()
        .map(|name| ColumnKind::of(table.column(name).unwrap_or_default()))
        .collect();
    let columns = names
        .iter()
        .map(|name| quote_ident(name))
        .collect::<Vec<_>>()
        .join(", ");
    let rows: Vec<_> = table.rows().collect();

    rows.chunks(batch_rows.max(1))
        .map(|chunk| {
            let mut params = Vec::with_capacity(chunk.len() * kinds.len());
            let tuples = chunk
                .iter()
                .map(|row| {
                    let cells = row
                        .values()
                        .zip(&kinds)
                        .map(|(value, kind)| {
                            params.push((*kind, value.clone()));
                            kind.placeholder(params.len())
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("({})", cells)
                })
                .collect::<Vec<_>>()
                .join(", ");
            InsertBatch {
                sql: format!(
                    "INSERT INTO {} ({}) VALUES {}",
                    quote_ident(table_name),
                    columns,
                    tuples
                ),
                params,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_insert_uses_placeholders() {
        let table = Table::from_columns([
            ("contact_id", vec![Value::Int(1), Value::Int(2)]),
            ("note", vec![Value::from("it's fine"), Value::Null]),
            ("answered", vec![Value::Bool(true), Value::Null]),
        ])
        .unwrap();

        let batches = insert_batches("summary", &table, 500);
        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0].sql,
            "INSERT INTO \"summary\" (\"contact_id\", \"note\", \"answered\") \
             VALUES ($1, $2, $3), ($4, $5, $6)"
        );
        assert_eq!(batches[0].params.len(), 6);
        assert_eq!(batches[0].params[1], (ColumnKind::Text, Value::from("it's fine")));
        assert_eq!(batches[0].params[5], (ColumnKind::Bool, Value::Null));
    }

    #[test]
    fn test_column_kinds_follow_values() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let table = Table::from_columns([
            ("wait", vec![Value::Int(3), Value::Float(1.5)]),
            ("started", vec![Value::Timestamp(Timestamp::Naive(start)), Value::Null]),
            ("empty", vec![Value::Null, Value::Null]),
        ])
        .unwrap();

        let batch = &insert_batches("t", &table, 500)[0];
        assert!(batch.sql.ends_with("VALUES ($1, CAST($2 AS timestamp), $3), ($4, CAST($5 AS timestamp), $6)"));
        assert_eq!(batch.params[0].0, ColumnKind::Double);
        assert_eq!(batch.params[2].0, ColumnKind::Text);
        assert_eq!(text_of(&batch.params[1].1).as_deref(), Some("2024-01-01T09:00:00"));
    }

    #[test]
    fn test_batches_and_empty_table() {
        let table = Table::from_columns([("n", (0..5).map(Value::Int).collect::<Vec<_>>())]).unwrap();
        let batches = insert_batches("t", &table, 2);
        assert_eq!(batches.len(), 3);
        assert!(batches[2].sql.ends_with("VALUES ($1)"));
        assert!(insert_batches("t", &Table::new(), 2).is_empty());
    }
}
