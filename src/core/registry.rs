use crate::core::spec::OpParams;
use crate::core::transforms::{aggregate, sequence, text, time};
use crate::domain::{Table, Value};
use crate::utils::error::{EtlError, Result, TransformError};
use crate::utils::time::TimeNormalizer;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Everything an operation sees besides the table itself.
#[derive(Debug, Clone, Copy)]
pub struct OpContext<'a> {
    pub inputs: &'a [String],
    pub params: &'a OpParams,
    /// Column that separates conversations; sequence operations restart per group.
    pub group_key: Option<&'a str>,
    pub time: TimeNormalizer,
}

impl<'a> OpContext<'a> {
    pub fn input(&self, position: usize) -> std::result::Result<&'a str, TransformError> {
        self.inputs
            .get(position)
            .map(String::as_str)
            .ok_or_else(|| TransformError::InvalidParameter {
                name: "input_cols".to_string(),
                reason: format!("missing input column #{}", position + 1),
            })
    }
}

/// Produces one value per row.
pub type ColumnFn = fn(&Table, &OpContext<'_>) -> std::result::Result<Vec<Value>, TransformError>;

/// Reduces a (group) table to a single value.
pub type AggregateFn = fn(&Table, &OpContext<'_>) -> std::result::Result<Value, TransformError>;

#[derive(Clone, Copy)]
pub enum Kernel {
    Column(ColumnFn),
    Aggregate(AggregateFn),
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Kernel::Column(_) => f.write_str("Kernel::Column"),
            Kernel::Aggregate(_) => f.write_str("Kernel::Aggregate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CleanText,
    ParseHtml,
    StrLength,
    WordCount,
    CalcMessageSequence,
    ConvoStartIndicator,
    ConvoIndicator,
    CalcResponseTime,
    CalcHandleTime,
    CalcWaitTime,
    Mean,
    Max,
    Min,
    Sum,
    RowCount,
    SurveyScore,
    ColumnOperator,
}

impl Operation {
    pub const ALL: [Operation; 17] = [
        Operation::CleanText,
        Operation::ParseHtml,
        Operation::StrLength,
        Operation::WordCount,
        Operation::CalcMessageSequence,
        Operation::ConvoStartIndicator,
        Operation::ConvoIndicator,
        Operation::CalcResponseTime,
        Operation::CalcHandleTime,
        Operation::CalcWaitTime,
        Operation::Mean,
        Operation::Max,
        Operation::Min,
        Operation::Sum,
        Operation::RowCount,
        Operation::SurveyScore,
        Operation::ColumnOperator,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::CleanText => "clean_text",
            Operation::ParseHtml => "parse_html",
            Operation::StrLength => "str_length",
            Operation::WordCount => "word_count",
            Operation::CalcMessageSequence => "calc_message_sequence",
            Operation::ConvoStartIndicator => "convo_start_indicator",
            Operation::ConvoIndicator => "convo_indicator",
            Operation::CalcResponseTime => "calc_response_time",
            Operation::CalcHandleTime => "calc_handle_time",
            Operation::CalcWaitTime => "calc_wait_time",
            Operation::Mean => "mean",
            Operation::Max => "max",
            Operation::Min => "min",
            Operation::Sum => "sum",
            Operation::RowCount => "row_count",
            Operation::SurveyScore => "survey_score",
            Operation::ColumnOperator => "column_operator",
        }
    }

    pub fn kernel(&self) -> Kernel {
        match self {
            Operation::CleanText => Kernel::Column(text::clean_text),
            Operation::ParseHtml => Kernel::Column(text::parse_html),
            Operation::StrLength => Kernel::Column(text::str_length),
            Operation::WordCount => Kernel::Column(text::word_count),
            Operation::CalcMessageSequence => Kernel::Column(sequence::calc_message_sequence),
            Operation::ConvoStartIndicator => Kernel::Column(sequence::convo_start_indicator),
            Operation::ConvoIndicator => Kernel::Column(sequence::convo_indicator),
            Operation::CalcResponseTime => Kernel::Column(time::calc_response_time),
            Operation::CalcHandleTime => Kernel::Aggregate(time::calc_handle_time),
            Operation::CalcWaitTime => Kernel::Aggregate(time::calc_wait_time),
            Operation::Mean => Kernel::Aggregate(aggregate::mean),
            Operation::Max => Kernel::Aggregate(aggregate::max),
            Operation::Min => Kernel::Aggregate(aggregate::min),
            Operation::Sum => Kernel::Aggregate(aggregate::sum),
            Operation::RowCount => Kernel::Aggregate(aggregate::row_count),
            Operation::SurveyScore => Kernel::Aggregate(aggregate::survey_score),
            Operation::ColumnOperator => Kernel::Aggregate(aggregate::column_operator),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.kernel(), Kernel::Aggregate(_))
    }

    /// Inclusive bounds on the number of input columns.
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Operation::CleanText
            | Operation::ParseHtml
            | Operation::StrLength
            | Operation::WordCount
            | Operation::CalcMessageSequence
            | Operation::Mean
            | Operation::Max
            | Operation::Min
            | Operation::Sum
            | Operation::ColumnOperator
            | Operation::SurveyScore => (1, 1),
            Operation::CalcResponseTime => (1, 2),
            Operation::ConvoStartIndicator
            | Operation::ConvoIndicator
            | Operation::CalcHandleTime
            | Operation::CalcWaitTime => (2, 2),
            Operation::RowCount => (0, 0),
        }
    }

    /// 未指定 input_cols 時使用的輸入欄位
    pub fn default_inputs(&self, output: &str, params: &OpParams) -> Vec<String> {
        let own = || {
            vec![params
                .get_str("column_name")
                .or_else(|| params.get_str("column"))
                .unwrap_or(output)
                .to_string()]
        };
        let named = |cols: &[&str]| cols.iter().map(|c| c.to_string()).collect();

        match self {
            Operation::CleanText
            | Operation::ParseHtml
            | Operation::StrLength
            | Operation::WordCount
            | Operation::Mean
            | Operation::Max
            | Operation::Min
            | Operation::Sum
            | Operation::ColumnOperator => own(),
            Operation::CalcMessageSequence => named(&["message_type"]),
            Operation::ConvoStartIndicator => named(&["message_type", "message"]),
            Operation::ConvoIndicator => named(&["message_type", "convo_start_ind"]),
            Operation::CalcResponseTime => named(&["dt"]),
            Operation::CalcHandleTime | Operation::CalcWaitTime => named(&["dt", "convo_ind"]),
            Operation::SurveyScore => named(&["message"]),
            Operation::RowCount => Vec::new(),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Read-only lookup from configured names to operations, shared process-wide.
#[derive(Debug)]
pub struct Registry {
    by_name: HashMap<&'static str, Operation>,
}

impl Registry {
    pub fn global() -> &'static Registry {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(|| Registry {
            by_name: Operation::ALL.iter().map(|op| (op.name(), *op)).collect(),
        })
    }

    pub fn lookup(&self, name: &str) -> Result<Operation> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| EtlError::UnknownOperationError {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.by_name.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
