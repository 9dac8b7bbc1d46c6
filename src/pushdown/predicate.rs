//! Filter Predicates
//!
//! Typed `(column, operator, value)` filters and the parser for the JSON
//! filter-spec shapes callers send.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// Caller filter specs keyed by column name
pub type Filters = BTreeMap<String, JsonValue>;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "BETWEEN")]
    Between,
    #[serde(rename = "LIKE")]
    Like,
}

impl FilterOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            FilterOp::Eq => "==",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::In => "IN",
            FilterOp::Between => "BETWEEN",
            FilterOp::Like => "LIKE",
        }
    }

    /// Whether the bound excludes its endpoint
    pub fn is_strict(&self) -> bool {
        matches!(self, FilterOp::Gt | FilterOp::Lt)
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for FilterOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let op = match s.trim().to_ascii_uppercase().as_str() {
            "==" | "=" => FilterOp::Eq,
            "!=" | "<>" => FilterOp::Ne,
            ">" => FilterOp::Gt,
            ">=" => FilterOp::Ge,
            "<" => FilterOp::Lt,
            "<=" => FilterOp::Le,
            "IN" => FilterOp::In,
            "BETWEEN" => FilterOp::Between,
            "LIKE" => FilterOp::Like,
            other => {
                return Err(Error::InvalidFilter {
                    column: String::new(),
                    reason: format!("unknown operator '{other}'"),
                })
            }
        };
        Ok(op)
    }
}

/// One filter condition
///
/// `value` is a scalar for comparison operators and `LIKE`, a list for `IN`
/// and a two-element `[lo, hi]` list for `BETWEEN`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub column: String,
    pub op: FilterOp,
    pub value: JsonValue,
}

impl FilterPredicate {
    /// Build and validate a predicate
    pub fn new(column: impl Into<String>, op: FilterOp, value: JsonValue) -> Result<Self> {
        let column = column.into();
        let invalid = |reason: String| Error::InvalidFilter {
            column: column.clone(),
            reason,
        };

        let value = match op {
            FilterOp::In => match value {
                JsonValue::Array(items) if !items.is_empty() && items.iter().all(is_scalar) => {
                    JsonValue::Array(items)
                }
                v if is_scalar(&v) => JsonValue::Array(vec![v]),
                _ => return Err(invalid("IN expects a non-empty list of scalars".into())),
            },
            FilterOp::Between => match value {
                JsonValue::Array(bounds) if bounds.len() == 2 && bounds.iter().all(is_scalar) => {
                    JsonValue::Array(bounds)
                }
                _ => return Err(invalid("BETWEEN expects [low, high]".into())),
            },
            FilterOp::Like => match value {
                JsonValue::String(_) => value,
                _ => return Err(invalid("LIKE expects a string pattern".into())),
            },
            _ if is_scalar(&value) => value,
            _ => return Err(invalid(format!("{op} expects a scalar value"))),
        };

        Ok(Self { column, op, value })
    }

    /// Parse one filter spec
    ///
    /// Accepted shapes: `["OP", value]`, `["BETWEEN", lo, hi]`, or a bare
    /// scalar meaning `==`.
    pub fn from_spec(column: &str, spec: &JsonValue) -> Result<Self> {
        let malformed = |reason: &str| Error::InvalidFilter {
            column: column.to_string(),
            reason: reason.to_string(),
        };

        match spec {
            JsonValue::Array(parts) => {
                let op_str = parts
                    .first()
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| malformed("expected [operator, value]"))?;
                let op = op_str.parse::<FilterOp>().map_err(|_| {
                    malformed(&format!("unknown operator '{op_str}'"))
                })?;
                match (op, &parts[1..]) {
                    (_, [value]) => Self::new(column, op, value.clone()),
                    (FilterOp::Between, [lo, hi]) => {
                        Self::new(column, op, JsonValue::Array(vec![lo.clone(), hi.clone()]))
                    }
                    _ => Err(malformed("expected [operator, value]")),
                }
            }
            v if is_scalar(v) => Self::new(column, FilterOp::Eq, v.clone()),
            _ => Err(malformed("expected a scalar or [operator, value]")),
        }
    }

    /// Scalar operand for comparison operators
    pub fn scalar(&self) -> Option<&JsonValue> {
        match self.op {
            FilterOp::In | FilterOp::Between => None,
            _ => Some(&self.value),
        }
    }

    /// Operand list for `IN` / `BETWEEN`
    pub fn list(&self) -> &[JsonValue] {
        match &self.value {
            JsonValue::Array(items) => items,
            _ => &[],
        }
    }
}

impl fmt::Display for FilterPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.op, self.value)
    }
}

fn is_scalar(v: &JsonValue) -> bool {
    matches!(v, JsonValue::Bool(_) | JsonValue::Number(_) | JsonValue::String(_))
}

/// Parse caller filter specs
///
/// Malformed specs are dropped and reported as warnings; they never fail
/// the call.
pub fn parse_filters(filters: &Filters) -> (Vec<FilterPredicate>, Vec<String>) {
    let mut predicates = Vec::with_capacity(filters.len());
    let mut warnings = Vec::new();
    for (column, spec) in filters {
        match FilterPredicate::from_spec(column, spec) {
            Ok(p) => predicates.push(p),
            Err(e) => warnings.push(format!("ignored filter: {e}")),
        }
    }
    (predicates, warnings)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_operator_parsing() {
        assert_eq!("==".parse::<FilterOp>().unwrap(), FilterOp::Eq);
        assert_eq!("=".parse::<FilterOp>().unwrap(), FilterOp::Eq);
        assert_eq!("<>".parse::<FilterOp>().unwrap(), FilterOp::Ne);
        assert_eq!("between".parse::<FilterOp>().unwrap(), FilterOp::Between);
        assert_eq!("like".parse::<FilterOp>().unwrap(), FilterOp::Like);
        assert!("~=".parse::<FilterOp>().is_err());
    }

    #[test]
    fn test_operator_serde_uses_symbols() {
        assert_eq!(serde_json::to_string(&FilterOp::Ge).unwrap(), "\">=\"");
        let op: FilterOp = serde_json::from_str("\"BETWEEN\"").unwrap();
        assert_eq!(op, FilterOp::Between);
    }

    #[test]
    fn test_spec_shapes() {
        let p = FilterPredicate::from_spec("WL", &json!(["==", "W"])).unwrap();
        assert_eq!((p.op, p.value), (FilterOp::Eq, json!("W")));

        let p = FilterPredicate::from_spec("WL", &json!("W")).unwrap();
        assert_eq!(p.op, FilterOp::Eq);

        let p = FilterPredicate::from_spec("D", &json!(["BETWEEN", ["2024-01-01", "2024-02-01"]]))
            .unwrap();
        assert_eq!(p.list().len(), 2);

        let p = FilterPredicate::from_spec("D", &json!(["BETWEEN", "2024-01-01", "2024-02-01"]))
            .unwrap();
        assert_eq!(p.op, FilterOp::Between);

        let p = FilterPredicate::from_spec("T", &json!(["IN", ["A", "B"]])).unwrap();
        assert_eq!(p.list(), &[json!("A"), json!("B")]);

        // A scalar IN operand becomes a one-element list
        let p = FilterPredicate::from_spec("T", &json!(["IN", "A"])).unwrap();
        assert_eq!(p.list(), &[json!("A")]);
    }

    #[test]
    fn test_malformed_specs() {
        for spec in [
            json!(null),
            json!({"op": "=="}),
            json!([]),
            json!(["=="]),
            json!(["??", 1]),
            json!([1, 2]),
            json!(["BETWEEN", [1]]),
            json!(["IN", []]),
            json!(["LIKE", 5]),
            json!([">", [1, 2]]),
        ] {
            assert_matches!(
                FilterPredicate::from_spec("C", &spec),
                Err(Error::InvalidFilter { .. }),
                "{spec}"
            );
        }
    }

    #[test]
    fn test_parse_filters_collects_warnings() {
        let mut filters = Filters::new();
        filters.insert("WL".into(), json!(["==", "W"]));
        filters.insert("BAD".into(), json!({"x": 1}));

        let (predicates, warnings) = parse_filters(&filters);
        assert_eq!(predicates.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("BAD"));
    }

    #[test]
    fn test_display() {
        let p = FilterPredicate::new("PTS", FilterOp::Ge, json!(100)).unwrap();
        assert_eq!(p.to_string(), "PTS >= 100");
        assert!(FilterOp::Gt.is_strict());
        assert!(!FilterOp::Ge.is_strict());
    }
}
