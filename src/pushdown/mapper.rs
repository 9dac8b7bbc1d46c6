//! Pushdown Mapper
//!
//! Decides which caller filters the origin can evaluate itself and turns
//! them into extra request parameters.
//!
//! # Design
//!
//! - Per-namespace column maps are loaded once and never mutated
//! - Pushed parameters become part of the effective request, and therefore
//!   part of the cache key
//! - Anything that cannot be pushed stays a local predicate; nothing here
//!   fails a call

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::format::{Item, StrftimeItems};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use super::predicate::{parse_filters, FilterOp, FilterPredicate, Filters};
use crate::cache::Params;
use crate::config::NamespaceConfig;
use crate::error::{Error, Result};
use crate::table::ISO_DATE_FORMAT;

// =============================================================================
// Column Mappings
// =============================================================================

fn default_direct_ops() -> BTreeSet<FilterOp> {
    BTreeSet::from([FilterOp::Eq])
}

fn default_range_ops() -> BTreeSet<FilterOp> {
    BTreeSet::from([
        FilterOp::Eq,
        FilterOp::Gt,
        FilterOp::Ge,
        FilterOp::Lt,
        FilterOp::Le,
        FilterOp::Between,
    ])
}

fn default_date_format() -> String {
    ISO_DATE_FORMAT.to_string()
}

/// How one result column maps onto origin parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnMapping {
    /// Column equality maps to one parameter
    Direct {
        param: String,
        #[serde(default = "default_direct_ops")]
        operators: BTreeSet<FilterOp>,
        /// Caller value -> origin value rewrites
        #[serde(default)]
        value_map: BTreeMap<String, String>,
        /// Enables `IN`, joining the values with this separator
        #[serde(default)]
        list_separator: Option<String>,
    },
    /// Date column bounded by a from/to parameter pair
    DateRange {
        from_param: String,
        to_param: String,
        #[serde(default = "default_range_ops")]
        operators: BTreeSet<FilterOp>,
        #[serde(default = "default_date_format")]
        date_format: String,
    },
}

impl ColumnMapping {
    /// Equality-only direct mapping
    pub fn direct(param: impl Into<String>) -> Self {
        ColumnMapping::Direct {
            param: param.into(),
            operators: default_direct_ops(),
            value_map: BTreeMap::new(),
            list_separator: None,
        }
    }

    /// Date range mapping with every range operator and ISO formatting
    pub fn date_range(from_param: impl Into<String>, to_param: impl Into<String>) -> Self {
        ColumnMapping::DateRange {
            from_param: from_param.into(),
            to_param: to_param.into(),
            operators: default_range_ops(),
            date_format: default_date_format(),
        }
    }

    /// Add a value rewrite (direct mappings only)
    pub fn with_value(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        if let ColumnMapping::Direct { value_map, .. } = &mut self {
            value_map.insert(from.into(), to.into());
        }
        self
    }

    /// Enable `IN` on a direct mapping
    pub fn with_list_separator(mut self, separator: impl Into<String>) -> Self {
        if let ColumnMapping::Direct {
            operators,
            list_separator,
            ..
        } = &mut self
        {
            operators.insert(FilterOp::In);
            *list_separator = Some(separator.into());
        }
        self
    }

    pub fn operators(&self) -> &BTreeSet<FilterOp> {
        match self {
            ColumnMapping::Direct { operators, .. } | ColumnMapping::DateRange { operators, .. } => {
                operators
            }
        }
    }

    /// Parameter keys this mapping may write
    pub fn params(&self) -> Vec<&str> {
        match self {
            ColumnMapping::Direct { param, .. } => vec![param.as_str()],
            ColumnMapping::DateRange {
                from_param,
                to_param,
                ..
            } => vec![from_param.as_str(), to_param.as_str()],
        }
    }

    /// Reject operator sets the mapping kind cannot express
    pub fn validate(&self, column: &str) -> Result<()> {
        let config_err = |reason: String| Error::Config(format!("pushdown column '{column}': {reason}"));

        if self.operators().is_empty() {
            return Err(config_err("empty operator set".into()));
        }

        match self {
            ColumnMapping::Direct {
                param,
                operators,
                list_separator,
                ..
            } => {
                if param.is_empty() {
                    return Err(config_err("empty parameter name".into()));
                }
                for op in operators {
                    let ok = match op {
                        FilterOp::Eq => true,
                        FilterOp::In => list_separator.is_some(),
                        _ => false,
                    };
                    if !ok {
                        return Err(config_err(format!("direct mapping cannot push {op}")));
                    }
                }
            }
            ColumnMapping::DateRange {
                from_param,
                to_param,
                operators,
                date_format,
            } => {
                if from_param.is_empty() || to_param.is_empty() || from_param == to_param {
                    return Err(config_err("needs two distinct parameter names".into()));
                }
                if let Some(op) = operators.difference(&default_range_ops()).next() {
                    return Err(config_err(format!("date range mapping cannot push {op}")));
                }
                if StrftimeItems::new(date_format).any(|item| matches!(item, Item::Error)) {
                    return Err(config_err(format!("invalid date format '{date_format}'")));
                }
            }
        }
        Ok(())
    }

    fn convert(&self, predicate: &FilterPredicate) -> Result<Vec<(String, JsonValue)>> {
        let invalid = |reason: String| Error::InvalidFilter {
            column: predicate.column.clone(),
            reason,
        };

        match self {
            ColumnMapping::Direct {
                param,
                value_map,
                list_separator,
                ..
            } => {
                let rewrite = |v: &JsonValue| -> JsonValue {
                    match value_map.get(&scalar_text(v)) {
                        Some(mapped) => JsonValue::String(mapped.clone()),
                        None => v.clone(),
                    }
                };
                match predicate.op {
                    FilterOp::Eq => Ok(vec![(param.clone(), rewrite(&predicate.value))]),
                    FilterOp::In => {
                        let separator = list_separator
                            .as_deref()
                            .ok_or_else(|| invalid("IN is not pushable".into()))?;
                        let joined = predicate
                            .list()
                            .iter()
                            .map(|v| scalar_text(&rewrite(v)))
                            .collect::<Vec<_>>()
                            .join(separator);
                        Ok(vec![(param.clone(), JsonValue::String(joined))])
                    }
                    op => Err(invalid(format!("{op} is not pushable"))),
                }
            }
            ColumnMapping::DateRange {
                from_param,
                to_param,
                date_format,
                ..
            } => {
                let render = |v: &JsonValue| -> Result<JsonValue> {
                    let date = parse_date(v).ok_or_else(|| {
                        invalid(format!("{v} is not a YYYY-MM-DD date"))
                    })?;
                    Ok(JsonValue::String(date.format(date_format).to_string()))
                };
                match predicate.op {
                    FilterOp::Ge | FilterOp::Gt => {
                        Ok(vec![(from_param.clone(), render(&predicate.value)?)])
                    }
                    FilterOp::Le | FilterOp::Lt => {
                        Ok(vec![(to_param.clone(), render(&predicate.value)?)])
                    }
                    FilterOp::Eq => {
                        let day = render(&predicate.value)?;
                        Ok(vec![(from_param.clone(), day.clone()), (to_param.clone(), day)])
                    }
                    FilterOp::Between => match predicate.list() {
                        [lo, hi] => Ok(vec![
                            (from_param.clone(), render(lo)?),
                            (to_param.clone(), render(hi)?),
                        ]),
                        _ => Err(invalid("BETWEEN expects [low, high]".into())),
                    },
                    op => Err(invalid(format!("{op} is not pushable"))),
                }
            }
        }
    }
}

fn scalar_text(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_date(v: &JsonValue) -> Option<NaiveDate> {
    let s = v.as_str()?;
    // Accept a datetime by keeping its date part
    let day = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(day, ISO_DATE_FORMAT).ok()
}

// =============================================================================
// Pushdown Result
// =============================================================================

/// Outcome of splitting caller filters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushdownResult {
    /// Parameters to add to the origin request
    pub origin_params: Params,
    /// Predicates to evaluate on the fetched table
    pub local_predicates: Vec<FilterPredicate>,
    /// Human-readable record of what was pushed
    pub pushed: Vec<String>,
    /// Ignored or demoted filters
    pub warnings: Vec<String>,
}

impl PushdownResult {
    /// Base params merged with the pushed additions
    pub fn effective_params(&self, base: &Params) -> Params {
        let mut params = base.clone();
        params.extend(self.origin_params.clone());
        params
    }
}

// =============================================================================
// Pushdown Mapper
// =============================================================================

/// Pushdown mapper over the namespace registry
#[derive(Debug, Clone, Default)]
pub struct PushdownMapper {
    columns: HashMap<String, BTreeMap<String, ColumnMapping>>,
    enabled: bool,
}

impl PushdownMapper {
    /// Build from validated namespace configs
    pub fn new<'a>(namespaces: impl IntoIterator<Item = &'a NamespaceConfig>) -> Self {
        let columns = namespaces
            .into_iter()
            .filter(|ns| !ns.pushdown.is_empty())
            .map(|ns| (ns.name.clone(), ns.pushdown.clone()))
            .collect();
        Self {
            columns,
            enabled: true,
        }
    }

    /// A mapper that keeps every filter local
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn mapping(&self, namespace: &str, column: &str) -> Option<&ColumnMapping> {
        self.columns.get(namespace)?.get(column)
    }

    /// True if `column` is mapped for `namespace` and allows `op`
    pub fn can_push(&self, namespace: &str, column: &str, op: FilterOp) -> bool {
        self.enabled
            && self
                .mapping(namespace, column)
                .is_some_and(|m| m.operators().contains(&op))
    }

    /// Translate one predicate into origin parameters
    pub fn convert_predicate(
        &self,
        namespace: &str,
        predicate: &FilterPredicate,
    ) -> Result<Vec<(String, JsonValue)>> {
        if !self.can_push(namespace, &predicate.column, predicate.op) {
            return Err(Error::InvalidFilter {
                column: predicate.column.clone(),
                reason: format!("{} is not pushable for {namespace}", predicate.op),
            });
        }
        match self.mapping(namespace, &predicate.column) {
            Some(mapping) => mapping.convert(predicate),
            None => Err(Error::Internal("mapping vanished".into())),
        }
    }

    /// Split raw filter specs into pushed params and local predicates
    pub fn split_filters(&self, namespace: &str, filters: &Filters, base_params: &Params) -> PushdownResult {
        let (predicates, mut warnings) = parse_filters(filters);
        let mut result = self.split_predicates(namespace, predicates, base_params);
        warnings.append(&mut result.warnings);
        result.warnings = warnings;
        result
    }

    /// Split typed predicates into pushed params and local predicates
    pub fn split_predicates(
        &self,
        namespace: &str,
        predicates: Vec<FilterPredicate>,
        base_params: &Params,
    ) -> PushdownResult {
        let mut result = PushdownResult::default();

        for predicate in predicates {
            if !self.can_push(namespace, &predicate.column, predicate.op) {
                result.local_predicates.push(predicate);
                continue;
            }

            let params = match self.convert_predicate(namespace, &predicate) {
                Ok(params) => params,
                Err(e) => {
                    result.warnings.push(format!("kept local: {e}"));
                    result.local_predicates.push(predicate);
                    continue;
                }
            };

            let conflict = params.iter().find(|(key, value)| {
                let clashes = |existing: Option<&JsonValue>| existing.is_some_and(|v| v != value);
                clashes(base_params.get(key)) || clashes(result.origin_params.get(key))
            });
            if let Some((key, _)) = conflict {
                result.warnings.push(format!(
                    "kept local: {predicate} conflicts with request parameter '{key}'"
                ));
                result.local_predicates.push(predicate);
                continue;
            }

            let rendered = params
                .iter()
                .map(|(k, v)| format!("{k}={}", scalar_text(v)))
                .collect::<Vec<_>>()
                .join(", ");
            debug!(namespace, filter = %predicate, params = %rendered, "Pushed filter to origin");
            result.pushed.push(format!("{predicate} -> {rendered}"));
            result.origin_params.extend(params);

            // Inclusive origin bounds; re-apply the exclusive edge locally
            if predicate.op.is_strict() {
                result.local_predicates.push(predicate);
            }
        }

        result
    }
}

// =============================================================================
// Tests
// =============================================================================
