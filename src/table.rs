//! Canonical Tabular Value
//!
//! [`Table`] is the single tabular type crossing the cache boundary. Origin
//! handlers convert whatever they receive into a `Table` at ingress
//! ([`Table::from_records`], [`Table::from_columns`]); every tier stores and
//! returns exactly this type.

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use serde_json::{Map, Value as JsonValue};

use crate::error::{Error, Result};

/// ISO date format accepted at ingress and by filters
pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

// =============================================================================
// Types
// =============================================================================

/// Logical column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    Int64,
    Float64,
    Utf8,
    /// Calendar date without time zone
    Date,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Boolean => "boolean",
            DataType::Int64 => "int64",
            DataType::Float64 => "float64",
            DataType::Utf8 => "utf8",
            DataType::Date => "date",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert to JSON for egress
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Str(s) => JsonValue::String(s.clone()),
            Value::Date(d) => JsonValue::String(d.format(ISO_DATE_FORMAT).to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format(ISO_DATE_FORMAT)),
        }
    }
}

/// Typed, nullable column storage
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Boolean(Vec<Option<bool>>),
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
    Utf8(Vec<Option<String>>),
    Date(Vec<Option<NaiveDate>>),
}

impl ColumnData {
    /// Empty storage of the given type
    pub fn empty(data_type: DataType) -> Self {
        match data_type {
            DataType::Boolean => ColumnData::Boolean(Vec::new()),
            DataType::Int64 => ColumnData::Int64(Vec::new()),
            DataType::Float64 => ColumnData::Float64(Vec::new()),
            DataType::Utf8 => ColumnData::Utf8(Vec::new()),
            DataType::Date => ColumnData::Date(Vec::new()),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::Boolean(_) => DataType::Boolean,
            ColumnData::Int64(_) => DataType::Int64,
            ColumnData::Float64(_) => DataType::Float64,
            ColumnData::Utf8(_) => DataType::Utf8,
            ColumnData::Date(_) => DataType::Date,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Boolean(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Utf8(v) => v.len(),
            ColumnData::Date(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cell at `row` (panics when out of range, like slice indexing)
    pub fn value(&self, row: usize) -> Value {
        match self {
            ColumnData::Boolean(v) => v[row].map_or(Value::Null, Value::Bool),
            ColumnData::Int64(v) => v[row].map_or(Value::Null, Value::Int),
            ColumnData::Float64(v) => v[row].map_or(Value::Null, Value::Float),
            ColumnData::Utf8(v) => v[row].clone().map_or(Value::Null, Value::Str),
            ColumnData::Date(v) => v[row].map_or(Value::Null, Value::Date),
        }
    }

    fn select(&self, mask: &[bool]) -> Self {
        fn keep<T: Clone>(values: &[Option<T>], mask: &[bool]) -> Vec<Option<T>> {
            values
                .iter()
                .zip(mask)
                .filter(|(_, keep)| **keep)
                .map(|(v, _)| v.clone())
                .collect()
        }
        match self {
            ColumnData::Boolean(v) => ColumnData::Boolean(keep(v, mask)),
            ColumnData::Int64(v) => ColumnData::Int64(keep(v, mask)),
            ColumnData::Float64(v) => ColumnData::Float64(keep(v, mask)),
            ColumnData::Utf8(v) => ColumnData::Utf8(keep(v, mask)),
            ColumnData::Date(v) => ColumnData::Date(keep(v, mask)),
        }
    }

    fn extend(&mut self, other: ColumnData) -> Result<()> {
        match (self, other) {
            (ColumnData::Boolean(a), ColumnData::Boolean(b)) => a.extend(b),
            (ColumnData::Int64(a), ColumnData::Int64(b)) => a.extend(b),
            (ColumnData::Float64(a), ColumnData::Float64(b)) => a.extend(b),
            (ColumnData::Utf8(a), ColumnData::Utf8(b)) => a.extend(b),
            (ColumnData::Date(a), ColumnData::Date(b)) => a.extend(b),
            (a, b) => {
                return Err(Error::Serialization(format!(
                    "cannot append {} column to {} column",
                    b.data_type(),
                    a.data_type()
                )))
            }
        }
        Ok(())
    }

    fn estimated_size(&self) -> u64 {
        match self {
            ColumnData::Boolean(v) => v.len() as u64,
            ColumnData::Int64(v) => v.len() as u64 * 8,
            ColumnData::Float64(v) => v.len() as u64 * 8,
            ColumnData::Date(v) => v.len() as u64 * 4,
            ColumnData::Utf8(v) => v
                .iter()
                .map(|s| 8 + s.as_ref().map_or(0, |s| s.len() as u64))
                .sum(),
        }
    }
}

/// A named column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// =============================================================================
// Table
// =============================================================================

/// Column-oriented table with a fixed schema
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
    num_rows: usize,
}

impl Table {
    /// Table with no columns and no rows
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from columns; all columns must share a length and have unique names
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let num_rows = columns.first().map_or(0, Column::len);
        let mut seen = HashSet::new();
        for column in &columns {
            if column.len() != num_rows {
                return Err(Error::Serialization(format!(
                    "column '{}' has {} rows, expected {}",
                    column.name,
                    column.len(),
                    num_rows
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(Error::Serialization(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        Ok(Self { columns, num_rows })
    }

    /// Zero-column table that still reports a row count
    pub fn with_row_count(num_rows: usize) -> Self {
        Self {
            columns: Vec::new(),
            num_rows,
        }
    }

    /// Build from row records, inferring column types
    ///
    /// Column order follows first appearance across records. Integers and
    /// floats in one column widen to float; ISO `YYYY-MM-DD` strings become
    /// dates; any other mix widens to strings. Missing keys are nulls.
    pub fn from_records(records: &[Map<String, JsonValue>]) -> Result<Self> {
        let mut names: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for record in records {
            for key in record.keys() {
                if seen.insert(key.clone()) {
                    names.push(key.clone());
                }
            }
        }

        let columns = names
            .into_iter()
            .map(|name| {
                let cells: Vec<&JsonValue> = records
                    .iter()
                    .map(|r| r.get(&name).unwrap_or(&JsonValue::Null))
                    .collect();
                let data = build_column(&cells);
                Column::new(name, data)
            })
            .collect();

        let mut table = Self::from_columns(columns)?;
        table.num_rows = records.len();
        Ok(table)
    }

    /// Row records for egress
    pub fn to_records(&self) -> Vec<Map<String, JsonValue>> {
        (0..self.num_rows)
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| (c.name.clone(), c.data.value(row).to_json()))
                    .collect()
            })
            .collect()
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Keep rows where `mask` is true
    pub fn filter_rows(&self, mask: &[bool]) -> Self {
        debug_assert_eq!(mask.len(), self.num_rows);
        Self {
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.data.select(mask)))
                .collect(),
            num_rows: mask.iter().filter(|k| **k).count(),
        }
    }

    /// Append rows of a table with the same schema
    pub fn append(&mut self, other: Table) -> Result<()> {
        if self.columns.is_empty() && self.num_rows == 0 {
            *self = other;
            return Ok(());
        }
        if self.column_names() != other.column_names() {
            return Err(Error::Serialization(
                "cannot append tables with different schemas".into(),
            ));
        }
        for (mine, theirs) in self.columns.iter_mut().zip(other.columns) {
            mine.data.extend(theirs.data)?;
        }
        self.num_rows += other.num_rows;
        Ok(())
    }

    /// Approximate in-memory footprint in bytes
    pub fn estimated_size(&self) -> u64 {
        self.columns
            .iter()
            .map(|c| c.name.len() as u64 + c.data.estimated_size())
            .sum()
    }
}

// =============================================================================
// Type inference
// =============================================================================

fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(s, ISO_DATE_FORMAT).ok()
}

fn infer_type(cells: &[&JsonValue]) -> DataType {
    let mut inferred: Option<DataType> = None;
    for cell in cells {
        let cell_type = match cell {
            JsonValue::Null => continue,
            JsonValue::Bool(_) => DataType::Boolean,
            JsonValue::Number(n) if n.is_i64() => DataType::Int64,
            JsonValue::Number(_) => DataType::Float64,
            JsonValue::String(s) if parse_iso_date(s).is_some() => DataType::Date,
            _ => DataType::Utf8,
        };
        inferred = Some(match (inferred, cell_type) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(DataType::Int64), DataType::Float64)
            | (Some(DataType::Float64), DataType::Int64) => DataType::Float64,
            _ => DataType::Utf8,
        });
    }
    inferred.unwrap_or(DataType::Utf8)
}

fn json_to_string(cell: &JsonValue) -> Option<String> {
    match cell {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn build_column(cells: &[&JsonValue]) -> ColumnData {
    match infer_type(cells) {
        DataType::Boolean => ColumnData::Boolean(cells.iter().map(|c| c.as_bool()).collect()),
        DataType::Int64 => ColumnData::Int64(cells.iter().map(|c| c.as_i64()).collect()),
        DataType::Float64 => ColumnData::Float64(cells.iter().map(|c| c.as_f64()).collect()),
        DataType::Date => ColumnData::Date(
            cells
                .iter()
                .map(|c| c.as_str().and_then(parse_iso_date))
                .collect(),
        ),
        DataType::Utf8 => ColumnData::Utf8(cells.iter().map(|c| json_to_string(c)).collect()),
    }
}

// =============================================================================
// Tests
// =============================================================================
