use crate::core::registry::{Kernel, OpContext};
use crate::core::spec::TransformSpec;
use crate::domain::{Table, Value};
use crate::utils::error::{EtlError, Result, TransformError};
use crate::utils::time::TimeNormalizer;
use chrono_tz::Tz;
use tracing::{debug, info};

/// Runs an ordered list of transforms over a table.
///
/// Specs execute strictly in list order; each one sees the columns produced by
/// the specs before it. The input table is never modified, every step returns
/// a new snapshot.
#[derive(Debug, Clone, Default)]
pub struct Transformer {
    specs: Vec<TransformSpec>,
    group_key: Option<String>,
    timezone: Option<Tz>,
}

impl Transformer {
    pub fn new(specs: Vec<TransformSpec>) -> Self {
        Self {
            specs,
            group_key: None,
            timezone: None,
        }
    }

    /// 對話分組欄位（例如 `contact_id`）
    pub fn with_group_key(mut self, key: impl Into<String>) -> Self {
        self.group_key = Some(key.into());
        self
    }

    /// Timezone used to read naive timestamps when they meet offset-carrying ones.
    pub fn with_timezone(mut self, timezone: Option<Tz>) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn specs(&self) -> &[TransformSpec] {
        &self.specs
    }

    pub fn group_key(&self) -> Option<&str> {
        self.group_key.as_deref()
    }

    /// 依序執行每個 transform，回傳含所有新欄位的表格
    ///
    /// Column operations write one value per row. Aggregate operations are
    /// computed per conversation and repeated on each of its rows.
    pub fn run_transforms(&self, table: &Table) -> Result<Table> {
        let mut current = table.clone();
        for spec in &self.specs {
            let inputs = self.checked_inputs(spec, &current)?;
            info!(
                "🔄 Running transform {} -> '{}' on {} rows",
                spec.name(),
                spec.output,
                current.len()
            );
            let ctx = self.context(spec, &inputs);

            let values = match spec.operation.kernel() {
                Kernel::Column(f) => f(&current, &ctx),
                Kernel::Aggregate(f) => self.broadcast(f, &current, &ctx),
            }
            .map_err(|e| fail(spec, e))?;

            current = current
                .with_column(spec.output.as_str(), values)
                .map_err(|e| fail(spec, e))?;
        }
        Ok(current)
    }

    /// 每段對話產生一列摘要
    ///
    /// The summary table starts with the group key column. Aggregate specs are
    /// evaluated over each conversation's rows of `table`; column specs run on
    /// the summary table itself, so they may use earlier summary columns.
    pub fn run_meta_transforms(&self, table: &Table) -> Result<Table> {
        check_summary_specs(&self.specs)?;
        let groups = if table.is_empty() {
            Vec::new()
        } else {
            table
                .group_indices(self.group_key())
                .map_err(|e| EtlError::from_transform("summary", "group_key", e))?
        };

        let mut meta = match self.group_key() {
            Some(key) => {
                let values = match groups.is_empty() {
                    true => Vec::new(),
                    false => {
                        let keys = table
                            .require(key)
                            .map_err(|e| EtlError::from_transform("summary", key, e))?;
                        groups.iter().map(|rows| keys[rows[0]].clone()).collect()
                    }
                };
                Table::new()
                    .with_column(key, values)
                    .map_err(|e| EtlError::from_transform("summary", key, e))?
            }
            None => Table::new(),
        };
        let parts: Vec<Table> = groups.iter().map(|rows| table.select_rows(rows)).collect();

        for spec in &self.specs {
            info!(
                "🔄 Running summary transform {} -> '{}' over {} conversations",
                spec.name(),
                spec.output,
                parts.len()
            );
            let values = match spec.operation.kernel() {
                Kernel::Aggregate(f) => {
                    let inputs = self.checked_inputs(spec, table)?;
                    let ctx = self.context(spec, &inputs);
                    parts
                        .iter()
                        .map(|part| f(part, &OpContext { group_key: None, ..ctx }))
                        .collect::<std::result::Result<Vec<_>, _>>()
                }
                Kernel::Column(f) => {
                    let inputs = self.checked_inputs(spec, &meta)?;
                    let ctx = self.context(spec, &inputs);
                    f(&meta, &OpContext { group_key: None, ..ctx })
                }
            }
            .map_err(|e| fail(spec, e))?;

            meta = meta
                .with_column(spec.output.as_str(), values)
                .map_err(|e| fail(spec, e))?;
        }
        Ok(meta)
    }

    fn checked_inputs(&self, spec: &TransformSpec, table: &Table) -> Result<Vec<String>> {
        if let Some(missing) = spec
            .required_columns()
            .into_iter()
            .find(|c| !table.has_column(c))
        {
            return Err(EtlError::MissingColumnError {
                transform: spec.name().to_string(),
                output: spec.output.clone(),
                column: missing,
            });
        }
        let inputs = spec.resolve_inputs();
        debug!("{} inputs: {:?}", spec.name(), inputs);
        Ok(inputs)
    }

    fn context<'a>(&'a self, spec: &'a TransformSpec, inputs: &'a [String]) -> OpContext<'a> {
        OpContext {
            inputs,
            params: &spec.params,
            group_key: self.group_key(),
            time: TimeNormalizer::new(self.timezone),
        }
    }

    fn broadcast(
        &self,
        f: crate::core::registry::AggregateFn,
        table: &Table,
        ctx: &OpContext<'_>,
    ) -> std::result::Result<Vec<Value>, TransformError> {
        let mut out = vec![Value::Null; table.len()];
        for rows in crate::core::transforms::conversation_groups(table, ctx)? {
            let value = f(&table.select_rows(&rows), ctx)?;
            for row in rows {
                out[row] = value.clone();
            }
        }
        Ok(out)
    }
}

/// Summary aggregates always see one conversation, split by the engine's group
/// key, so they cannot regroup with `group_by`.
pub fn check_summary_specs(specs: &[TransformSpec]) -> Result<()> {
    match specs
        .iter()
        .find(|spec| spec.operation.is_aggregate() && spec.params.group_by.is_some())
    {
        Some(spec) => Err(fail(
            spec,
            TransformError::InvalidParameter {
                name: "group_by".to_string(),
                reason: "summary aggregates are grouped by the engine's group key".to_string(),
            },
        )),
        None => Ok(()),
    }
}

fn fail(spec: &TransformSpec, err: TransformError) -> EtlError {
    EtlError::from_transform(spec.name(), &spec.output, err)
}
