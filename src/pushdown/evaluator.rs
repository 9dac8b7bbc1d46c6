//! Local Predicate Evaluation
//!
//! Applies filters the origin could not evaluate to a fetched table.
//! Filter values are coerced to each column's type; null cells never match.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value as JsonValue;

use super::predicate::{FilterOp, FilterPredicate};
use crate::error::{Error, Result};
use crate::table::{Column, DataType, Table, Value, ISO_DATE_FORMAT};

/// Result of local filtering
#[derive(Debug, Clone)]
pub struct LocalFilterOutcome {
    pub table: Arc<Table>,
    /// Predicates actually evaluated
    pub applied: usize,
    pub rows_before: usize,
    pub rows_after: usize,
    /// Predicates skipped because their value does not fit the column
    pub warnings: Vec<String>,
}

enum Matcher {
    Compare(FilterOp, Value),
    In(Vec<Value>),
    Between(Value, Value),
    Like(Regex),
}

impl Matcher {
    fn compile(predicate: &FilterPredicate, data_type: DataType) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidFilter {
            column: predicate.column.clone(),
            reason,
        };
        let coerce_or_fail = |v: &JsonValue| {
            coerce(v, data_type)
                .ok_or_else(|| invalid(format!("{v} is not a valid {data_type} value")))
        };

        let matcher = match predicate.op {
            FilterOp::In => Matcher::In(
                predicate
                    .list()
                    .iter()
                    .map(coerce_or_fail)
                    .collect::<Result<_>>()?,
            ),
            FilterOp::Between => match predicate.list() {
                [lo, hi] => Matcher::Between(coerce_or_fail(lo)?, coerce_or_fail(hi)?),
                _ => return Err(invalid("BETWEEN expects [low, high]".into())),
            },
            FilterOp::Like => {
                let pattern = predicate
                    .value
                    .as_str()
                    .ok_or_else(|| invalid("LIKE expects a string pattern".into()))?;
                let regex = Regex::new(&like_to_regex(pattern))
                    .map_err(|e| invalid(format!("bad LIKE pattern: {e}")))?;
                Matcher::Like(regex)
            }
            op => Matcher::Compare(op, coerce_or_fail(&predicate.value)?),
        };
        Ok(matcher)
    }

    fn matches(&self, cell: &Value) -> bool {
        if cell.is_null() {
            return false;
        }
        match self {
            Matcher::Compare(op, target) => match compare(cell, target) {
                Some(ord) => match op {
                    FilterOp::Eq => ord == Ordering::Equal,
                    FilterOp::Ne => ord != Ordering::Equal,
                    FilterOp::Gt => ord == Ordering::Greater,
                    FilterOp::Ge => ord != Ordering::Less,
                    FilterOp::Lt => ord == Ordering::Less,
                    FilterOp::Le => ord != Ordering::Greater,
                    _ => false,
                },
                None => false,
            },
            Matcher::In(items) => items
                .iter()
                .any(|item| compare(cell, item) == Some(Ordering::Equal)),
            Matcher::Between(lo, hi) => matches!(
                (compare(cell, lo), compare(cell, hi)),
                (Some(a), Some(b)) if a != Ordering::Less && b != Ordering::Greater
            ),
            Matcher::Like(regex) => regex.is_match(&cell.to_string()),
        }
    }
}

/// SQL `LIKE` to an anchored regex: `%` any run, `_` one character
fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push_str("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
    }
    out.push('$');
    out
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let day = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(day, ISO_DATE_FORMAT).ok()
}

/// Coerce a filter operand to a column's type
fn coerce(v: &JsonValue, data_type: DataType) -> Option<Value> {
    match (data_type, v) {
        (DataType::Boolean, JsonValue::Bool(b)) => Some(Value::Bool(*b)),
        (DataType::Boolean, JsonValue::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (DataType::Int64 | DataType::Float64, JsonValue::Number(n)) => match n.as_i64() {
            Some(i) if data_type == DataType::Int64 => Some(Value::Int(i)),
            _ => n.as_f64().map(Value::Float),
        },
        (DataType::Int64, JsonValue::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(Value::Float)),
        (DataType::Float64, JsonValue::String(s)) => s.trim().parse::<f64>().ok().map(Value::Float),
        (DataType::Utf8, JsonValue::String(s)) => Some(Value::Str(s.clone())),
        (DataType::Utf8, JsonValue::Number(n)) => Some(Value::Str(n.to_string())),
        (DataType::Utf8, JsonValue::Bool(b)) => Some(Value::Str(b.to_string())),
        (DataType::Date, JsonValue::String(s)) => parse_date(s).map(Value::Date),
        _ => None,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn find_column<'a>(table: &'a Table, column: &str) -> Result<&'a Column> {
    table.column(column).ok_or_else(|| Error::UnknownColumn {
        column: column.to_string(),
        available: table.column_names(),
    })
}

/// Filter a shared table, skipping predicates whose operand does not fit
///
/// Zero-row tables are returned untouched. A predicate naming a column the
/// table lacks is [`Error::UnknownColumn`].
pub fn filter_table(table: &Arc<Table>, predicates: &[FilterPredicate]) -> Result<LocalFilterOutcome> {
    let rows = table.num_rows();
    let mut outcome = LocalFilterOutcome {
        table: Arc::clone(table),
        applied: 0,
        rows_before: rows,
        rows_after: rows,
        warnings: Vec::new(),
    };
    if rows == 0 || predicates.is_empty() {
        return Ok(outcome);
    }

    let mut compiled = Vec::with_capacity(predicates.len());
    for predicate in predicates {
        let column = find_column(table, &predicate.column)?;
        match Matcher::compile(predicate, column.data_type()) {
            Ok(matcher) => compiled.push((column, matcher)),
            Err(e) => outcome.warnings.push(format!("skipped local filter: {e}")),
        }
    }
    if compiled.is_empty() {
        return Ok(outcome);
    }

    let mask: Vec<bool> = (0..rows)
        .map(|row| {
            compiled
                .iter()
                .all(|(column, matcher)| matcher.matches(&column.data().value(row)))
        })
        .collect();

    let filtered = table.filter_rows(&mask);
    outcome.applied = compiled.len();
    outcome.rows_after = filtered.num_rows();
    outcome.table = Arc::new(filtered);
    Ok(outcome)
}

/// Filter a table; any unusable predicate is an error
pub fn apply_predicates(table: &Table, predicates: &[FilterPredicate]) -> Result<Table> {
    if table.num_rows() == 0 || predicates.is_empty() {
        return Ok(table.clone());
    }
    let compiled = predicates
        .iter()
        .map(|p| {
            let column = find_column(table, &p.column)?;
            Ok((column, Matcher::compile(p, column.data_type())?))
        })
        .collect::<Result<Vec<_>>>()?;

    let mask: Vec<bool> = (0..table.num_rows())
        .map(|row| {
            compiled
                .iter()
                .all(|(column, matcher)| matcher.matches(&column.data().value(row)))
        })
        .collect();
    Ok(table.filter_rows(&mask))
}

// =============================================================================
// Tests
// =============================================================================
