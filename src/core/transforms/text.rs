use crate::core::registry::OpContext;
use crate::domain::{Table, Value};
use crate::utils::error::TransformError;
use scraper::{Html, Node};

/// Punctuation kept by [`clean`] besides letters, digits and spaces.
const KEPT_PUNCTUATION: &[char] = &[
    '!', '?', '[', ']', '(', ')', '.', '$', '#', '*', ',', ':', ';',
];

const BLOCK_ELEMENTS: &[&str] = &[
    "br", "p", "div", "li", "ul", "ol", "tr", "td", "th", "h1", "h2", "h3", "h4", "h5", "h6",
    "blockquote", "pre", "table",
];

/// Collapses whitespace to single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 移除不在允許清單內的字元並壓縮空白
pub fn clean(text: &str) -> String {
    let kept: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || KEPT_PUNCTUATION.contains(c))
        .collect();
    collapse_whitespace(&kept)
}

/// Plain text of an HTML fragment. Tags are dropped, entities decoded and
/// block boundaries become spaces.
pub fn strip_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut text = String::with_capacity(html.len());
    for node in fragment.root_element().descendants() {
        match node.value() {
            Node::Text(t) => text.push_str(t),
            Node::Element(el) if BLOCK_ELEMENTS.contains(&el.name()) => text.push(' '),
            _ => {}
        }
    }
    collapse_whitespace(&text)
}

pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Applies `f` to every text cell of the single input column. Nulls stay null.
fn map_text(
    table: &Table,
    ctx: &OpContext<'_>,
    f: impl Fn(&str) -> Value,
) -> Result<Vec<Value>, TransformError> {
    let name = ctx.input(0)?;
    let column = table.require(name)?;
    column
        .iter()
        .enumerate()
        .map(|(row, value)| match value {
            Value::Null => Ok(Value::Null),
            Value::Text(s) => Ok(f(s)),
            other => Err(TransformError::TypeMismatch {
                column: name.to_string(),
                row,
                expected: "text",
                found: other.type_name().to_string(),
            }),
        })
        .collect()
}

pub fn clean_text(table: &Table, ctx: &OpContext<'_>) -> Result<Vec<Value>, TransformError> {
    map_text(table, ctx, |s| Value::Text(clean(s)))
}

pub fn parse_html(table: &Table, ctx: &OpContext<'_>) -> Result<Vec<Value>, TransformError> {
    map_text(table, ctx, |s| Value::Text(strip_html(s)))
}

/// Length in characters.
pub fn str_length(table: &Table, ctx: &OpContext<'_>) -> Result<Vec<Value>, TransformError> {
    map_text(table, ctx, |s| Value::Int(s.chars().count() as i64))
}

/// Null text counts as zero words.
pub fn word_count(table: &Table, ctx: &OpContext<'_>) -> Result<Vec<Value>, TransformError> {
    let counts = map_text(table, ctx, |s| Value::Int(count_words(s) as i64))?;
    Ok(counts
        .into_iter()
        .map(|v| if v.is_null() { Value::Int(0) } else { v })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spec::OpParams;
    use crate::utils::time::TimeNormalizer;

    fn run(
        f: fn(&Table, &OpContext<'_>) -> Result<Vec<Value>, TransformError>,
        values: Vec<Value>,
    ) -> Result<Vec<Value>, TransformError> {
        let table = Table::from_columns([("message", values)]).unwrap();
        let inputs = vec!["message".to_string()];
        let params = OpParams::default();
        let ctx = OpContext {
            inputs: &inputs,
            params: &params,
            group_key: None,
            time: TimeNormalizer::default(),
        };
        f(&table, &ctx)
    }

    #[test]
    fn test_clean_collapses_whitespace_and_drops_symbols() {
        assert_eq!(clean("  Hi   there\n\t- you? <3 "), "Hi there you? 3");
        assert_eq!(clean("cost: $5 (approx.)"), "cost: $5 (approx.)");
        assert_eq!(clean("Ça va?"), "Ça va?");
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>Hello&nbsp;<b>world</b></p>"), "Hello world");
        assert_eq!(strip_html("line one<br>line two"), "line one line two");
        assert_eq!(strip_html("no markup"), "no markup");
    }

    #[test]
    fn test_word_count_treats_null_as_zero() {
        let out = run(word_count, vec![Value::from("one two  three"), Value::Null]).unwrap();
        assert_eq!(out, vec![Value::Int(3), Value::Int(0)]);
    }

    #[test]
    fn test_word_count_on_empty_column() {
        assert!(run(word_count, Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_str_length_counts_characters() {
        let out = run(str_length, vec![Value::from("héllo"), Value::Null]).unwrap();
        assert_eq!(out, vec![Value::Int(5), Value::Null]);
    }

    #[test]
    fn test_non_text_is_type_mismatch() {
        let err = run(clean_text, vec![Value::Int(4)]).unwrap_err();
        assert!(matches!(err, TransformError::TypeMismatch { row: 0, .. }));
    }
}
