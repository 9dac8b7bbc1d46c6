//! TTL Selection
//!
//! Volatile-tier TTLs come from the namespace's configured TTL or freshness
//! class. Unconfigured namespaces fall back to a period heuristic over the
//! request parameters:
//!
//! - a season (`2023-24`), year or date in the current period: short TTL
//! - only finished periods: long TTL
//! - no period at all: the default TTL

use std::fmt;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::cache::Params;
use crate::config::{FreshnessClass, NamespaceConfig};
use crate::table::ISO_DATE_FORMAT;

/// Month a new season starts in
const SEASON_START_MONTH: u32 = 10;

const DEFAULT_SHORT_TTL: Duration = Duration::from_secs(300);
const DEFAULT_LONG_TTL: Duration = Duration::from_secs(86_400);

/// Why a TTL was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlSource {
    /// Explicit `ttl_secs` on the namespace
    Configured,
    /// Namespace freshness class
    Freshness(FreshnessClass),
    /// Params reference the in-progress period
    CurrentPeriod,
    /// Params reference only finished periods
    PastPeriod,
    Default,
}

impl fmt::Display for TtlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TtlSource::Configured => write!(f, "configured"),
            TtlSource::Freshness(class) => write!(f, "freshness={class}"),
            TtlSource::CurrentPeriod => write!(f, "current period"),
            TtlSource::PastPeriod => write!(f, "past period"),
            TtlSource::Default => write!(f, "default"),
        }
    }
}

/// A time period named by a request parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Period {
    /// Season by its starting year
    Season(i32),
    Year(i32),
    Day(NaiveDate),
}

impl Period {
    fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(day) = NaiveDate::parse_from_str(text, ISO_DATE_FORMAT) {
            return Some(Period::Day(day));
        }
        if let Some((start, end)) = text.split_once('-') {
            let (start, end) = (parse_year(start)?, end.parse::<u32>().ok()?);
            // `2023-24` but not `2023-07`
            let next = (start + 1).rem_euclid(100) as u32;
            return (end == next && matches!(text.len(), 7)).then_some(Period::Season(start));
        }
        parse_year(text).map(Period::Year)
    }

    /// -1 past, 0 current, 1 future
    fn relative_to(&self, today: NaiveDate) -> i32 {
        let ord = match self {
            Period::Season(start) => start.cmp(&current_season(today)),
            Period::Year(year) => year.cmp(&today.year()),
            Period::Day(day) => day.cmp(&today),
        };
        ord as i32
    }
}

fn parse_year(text: &str) -> Option<i32> {
    if text.len() != 4 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok().filter(|y| (1900..=2100).contains(y))
}

/// Starting year of the season containing `today`
fn current_season(today: NaiveDate) -> i32 {
    if today.month() >= SEASON_START_MONTH {
        today.year()
    } else {
        today.year() - 1
    }
}

fn collect_periods(value: &JsonValue, out: &mut Vec<Period>) {
    match value {
        JsonValue::String(s) => out.extend(Period::parse(s)),
        JsonValue::Number(n) => {
            if let Some(year) = n.as_i64().and_then(|y| i32::try_from(y).ok()) {
                if (1900..=2100).contains(&year) {
                    out.push(Period::Year(year));
                }
            }
        }
        JsonValue::Array(items) => items.iter().for_each(|v| collect_periods(v, out)),
        _ => {}
    }
}

/// TTL table plus period heuristic
#[derive(Debug, Clone, PartialEq)]
pub struct TtlPolicy {
    pub default_ttl: Duration,
    pub short_ttl: Duration,
    pub long_ttl: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::cache::DEFAULT_TTL_SECS))
    }
}

impl TtlPolicy {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            short_ttl: DEFAULT_SHORT_TTL,
            long_ttl: DEFAULT_LONG_TTL,
        }
    }

    /// Pick the TTL for one request
    pub fn ttl_for(
        &self,
        namespace: Option<&NamespaceConfig>,
        params: &Params,
        today: NaiveDate,
    ) -> (Duration, TtlSource) {
        if let Some(ns) = namespace {
            if let Some(secs) = ns.ttl_secs {
                return (Duration::from_secs(secs), TtlSource::Configured);
            }
            if let Some(class) = ns.freshness {
                return (class.ttl(), TtlSource::Freshness(class));
            }
        }
        self.heuristic(params, today)
    }

    fn heuristic(&self, params: &Params, today: NaiveDate) -> (Duration, TtlSource) {
        let mut periods = Vec::new();
        for value in params.values() {
            collect_periods(value, &mut periods);
        }
        if periods.is_empty() {
            return (self.default_ttl, TtlSource::Default);
        }
        if periods.iter().any(|p| p.relative_to(today) >= 0) {
            (self.short_ttl, TtlSource::CurrentPeriod)
        } else {
            (self.long_ttl, TtlSource::PastPeriod)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
