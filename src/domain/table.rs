use crate::domain::model::Record;
use crate::domain::value::Value;
use crate::utils::error::TransformError;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

pub type Column = Arc<Vec<Value>>;

/// Named, equally long columns. Adding a column returns a new table; the
/// existing columns are shared between the two snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: IndexMap<String, Column>,
    rows: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns<I, S>(columns: I) -> Result<Self, TransformError>
    where
        I: IntoIterator<Item = (S, Vec<Value>)>,
        S: Into<String>,
    {
        columns
            .into_iter()
            .try_fold(Table::new(), |table, (name, values)| {
                table.with_column(name, values)
            })
    }

    /// 由記錄建立表格，欄位為所有記錄鍵的聯集（依首次出現順序），缺值補 Null
    pub fn from_records(records: &[Record]) -> Self {
        let mut names: IndexMap<String, ()> = IndexMap::new();
        for record in records {
            for key in record.data.keys() {
                names.entry(key.clone()).or_insert(());
            }
        }

        let columns = names
            .into_keys()
            .map(|name| {
                let values = records
                    .iter()
                    .map(|r| r.data.get(&name).map(Value::from_json).unwrap_or(Value::Null))
                    .collect::<Vec<_>>();
                (name, Arc::new(values))
            })
            .collect();

        Self {
            columns,
            rows: records.len(),
        }
    }

    pub fn from_rows(rows: &[IndexMap<String, Value>]) -> Self {
        let mut names: IndexMap<&str, ()> = IndexMap::new();
        for row in rows {
            for key in row.keys() {
                names.entry(key.as_str()).or_insert(());
            }
        }

        let columns = names
            .into_keys()
            .map(|name| {
                let values = rows
                    .iter()
                    .map(|r| r.get(name).cloned().unwrap_or(Value::Null))
                    .collect::<Vec<_>>();
                (name.to_string(), Arc::new(values))
            })
            .collect();

        Self {
            columns,
            rows: rows.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns.get(name).map(|c| c.as_slice())
    }

    pub fn require(&self, name: &str) -> Result<&[Value], TransformError> {
        self.column(name)
            .ok_or_else(|| TransformError::MissingColumn(name.to_string()))
    }

    /// Returns a new table with `name` set to `values`, replacing any column of that name.
    pub fn with_column(
        &self,
        name: impl Into<String>,
        values: Vec<Value>,
    ) -> Result<Table, TransformError> {
        let name = name.into();
        let only_this_column = self.width() == 1 && self.has_column(&name);
        if self.width() > 0 && !only_this_column && values.len() != self.rows {
            return Err(TransformError::ColumnLength {
                column: name,
                expected: self.rows,
                found: values.len(),
            });
        }

        let mut columns = self.columns.clone();
        let rows = values.len();
        columns.insert(name, Arc::new(values));
        Ok(Table { columns, rows })
    }

    pub fn without_column(&self, name: &str) -> Table {
        let mut columns = self.columns.clone();
        columns.shift_remove(name);
        Table {
            columns,
            rows: self.rows,
        }
    }

    pub fn select_rows(&self, indices: &[usize]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                let picked = indices
                    .iter()
                    .filter_map(|&i| values.get(i).cloned())
                    .collect::<Vec<_>>();
                (name.clone(), Arc::new(picked))
            })
            .collect();

        Table {
            columns,
            rows: indices.iter().filter(|&&i| i < self.rows).count(),
        }
    }

    /// Splits the table by the values of `key`, keeping groups in first-seen order and
    /// rows within a group in their original order.
    pub fn group_by(&self, key: &str) -> Result<Vec<(Value, Table)>, TransformError> {
        let keys = self.require(key)?;
        Ok(self
            .group_indices(Some(key))?
            .into_iter()
            .map(|rows| (keys[rows[0]].clone(), self.select_rows(&rows)))
            .collect())
    }

    /// Row indices per group of `key` (first-seen order), or a single group of all rows when `key` is `None`.
    pub fn group_indices(&self, key: Option<&str>) -> Result<Vec<Vec<usize>>, TransformError> {
        let Some(key) = key else {
            return Ok(vec![(0..self.rows).collect()]);
        };
        let keys = self.require(key)?;
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (row, value) in keys.iter().enumerate() {
            let slot = *positions.entry(value.group_key()).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(row);
        }
        Ok(groups)
    }

    pub fn row(&self, index: usize) -> Option<IndexMap<String, Value>> {
        if index >= self.rows {
            return None;
        }
        Some(
            self.columns
                .iter()
                .map(|(name, values)| (name.clone(), values[index].clone()))
                .collect(),
        )
    }

    pub fn rows(&self) -> impl Iterator<Item = IndexMap<String, Value>> + '_ {
        (0..self.rows).filter_map(|i| self.row(i))
    }

    pub fn to_json_rows(&self) -> Vec<serde_json::Value> {
        self.rows()
            .map(|row| {
                serde_json::Value::Object(
                    row.into_iter().map(|(k, v)| (k, v.to_json())).collect(),
                )
            })
            .collect()
    }

    /// Stacks tables vertically; columns missing from a table are filled with nulls.
    pub fn concat(tables: &[Table]) -> Table {
        let mut names: IndexMap<&str, ()> = IndexMap::new();
        for table in tables {
            for name in table.column_names() {
                names.entry(name).or_insert(());
            }
        }

        let rows = tables.iter().map(Table::len).sum();
        let columns = names
            .into_keys()
            .map(|name| {
                let mut values = Vec::with_capacity(rows);
                for table in tables {
                    match table.column(name) {
                        Some(col) => values.extend_from_slice(col),
                        None => values.extend(std::iter::repeat(Value::Null).take(table.len())),
                    }
                }
                (name.to_string(), Arc::new(values))
            })
            .collect();

        Table { columns, rows }
    }
}
