//! Aggregation Engine
//!
//! Folds canonical [`UsageRecord`]s into an [`AggregateSnapshot`]: per-day and
//! window totals, acceptance rates, window averages, first/last growth trends
//! and top-N rankings. A snapshot is derived from a fixed record set and is
//! never mutated afterwards; every output format renders from it.
//!
//! ## Deduplication
//!
//! Overlapping fetches can return the same `(date, scope, subject)` record
//! more than once. The first occurrence wins and later copies are dropped
//! before anything is summed.
//!
//! ## Rounding
//!
//! Two rounding policies coexist and both are kept:
//! - [`acceptance_rate_floor`] truncates to a whole percentage (record and tabular output)
//! - [`acceptance_rate`] rounds to two decimals (narrative output and window averages)

use crate::models::{DateWindow, RecordKey, UsageRecord};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::debug;

/// Length of every ranking in a snapshot.
pub const TOP_N: usize = 10;

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Acceptance percentage rounded to two decimals; zero when nothing was suggested.
pub fn acceptance_rate(acceptances: u64, suggestions: u64) -> f64 {
    if suggestions == 0 {
        return 0.0;
    }
    round2(acceptances as f64 * 100.0 / suggestions as f64)
}

/// Acceptance percentage floored to an integer; zero when nothing was suggested.
pub fn acceptance_rate_floor(acceptances: u64, suggestions: u64) -> u64 {
    if suggestions == 0 {
        return 0;
    }
    acceptances.saturating_mul(100) / suggestions
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Growth {
    Percent(f64),
    /// The first value of the window was zero.
    NotComputable,
}

impl fmt::Display for Growth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Growth::Percent(pct) => write!(f, "{:.2}%", pct),
            Growth::NotComputable => f.write_str("not computable (first value is 0)"),
        }
    }
}

/// `((last - first) / first) * 100`, two-decimal scale.
pub fn growth_rate(first: u64, last: u64) -> Growth {
    if first == 0 {
        return Growth::NotComputable;
    }
    let delta = last as f64 - first as f64;
    Growth::Percent(round2(delta / first as f64 * 100.0))
}

/// Drop repeated `(date, scope, subject)` records, keeping the first of each.
pub fn dedupe(records: Vec<UsageRecord>) -> Vec<UsageRecord> {
    let before = records.len();
    let kept: Vec<UsageRecord> = unique(&records).into_iter().cloned().collect();
    if kept.len() != before {
        debug!(
            dropped = before - kept.len(),
            kept = kept.len(),
            "Dropped duplicate records"
        );
    }
    kept
}

/// First record per key, in input order.
fn unique(records: &[UsageRecord]) -> Vec<&UsageRecord> {
    let mut seen: HashSet<RecordKey> = HashSet::with_capacity(records.len());
    records
        .iter()
        .filter(|record| seen.insert(record.key()))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub suggestions: u64,
    pub acceptances: u64,
    pub lines_suggested: u64,
    pub lines_accepted: u64,
    pub chat_turns: u64,
    pub active_chat_users: u64,
    pub engaged_users: u64,
    pub active_users: u64,
}

impl UsageTotals {
    pub fn add(&mut self, record: &UsageRecord) {
        self.suggestions += record.suggestions_count;
        self.acceptances += record.acceptances_count;
        self.lines_suggested += record.lines_suggested;
        self.lines_accepted += record.lines_accepted;
        self.chat_turns += record.chat_turns;
        self.active_chat_users += record.active_chat_users;
        self.engaged_users += record.engaged_users;
        self.active_users += record.active_users;
    }

    pub fn acceptance_rate(&self) -> f64 {
        acceptance_rate(self.acceptances, self.suggestions)
    }

    pub fn acceptance_rate_floor(&self) -> u64 {
        acceptance_rate_floor(self.acceptances, self.suggestions)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTotals {
    pub date: NaiveDate,
    pub records: usize,
    pub totals: UsageTotals,
}

/// A date of a range whose fetch failed and was tolerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateGap {
    pub date: NaiveDate,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WindowAverages {
    pub active_users: u64,
    pub engaged_users: u64,
    pub acceptances_per_day: u64,
    pub suggestions_per_day: u64,
    pub acceptance_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricTrend {
    pub first: u64,
    pub last: u64,
    pub growth: Growth,
}

impl MetricTrend {
    fn between(first: u64, last: u64) -> Self {
        Self {
            first,
            last,
            growth: growth_rate(first, last),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSummary {
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub acceptances: MetricTrend,
    pub suggestions: MetricTrend,
    pub active_users: MetricTrend,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectRanking {
    pub login: String,
    pub acceptances: u64,
    pub suggestions: u64,
    pub acceptance_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakdownEntry {
    pub name: String,
    pub suggestions: u64,
    pub acceptances: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateSnapshot {
    /// Calendar span of the dates that produced records.
    pub window: Option<DateWindow>,
    pub record_count: usize,
    pub subject_count: usize,
    pub active_subjects: usize,
    pub totals: UsageTotals,
    pub acceptance_rate: f64,
    pub daily: Vec<DailyTotals>,
    pub gaps: Vec<DateGap>,
    pub averages: WindowAverages,
    pub trend: Option<TrendSummary>,
    pub top_users: Vec<SubjectRanking>,
    pub top_editors: Vec<BreakdownEntry>,
    pub top_languages: Vec<BreakdownEntry>,
}

pub struct Aggregator {
    top_n: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self { top_n: TOP_N }
    }

    pub fn aggregate(&self, records: &[UsageRecord], gaps: &[DateGap]) -> AggregateSnapshot {
        let unique = unique(records);

        let mut totals = UsageTotals::default();
        let mut by_day: BTreeMap<NaiveDate, DailyTotals> = BTreeMap::new();
        for record in &unique {
            totals.add(record);
            let day = by_day.entry(record.date).or_insert_with(|| DailyTotals {
                date: record.date,
                records: 0,
                totals: UsageTotals::default(),
            });
            day.records += 1;
            day.totals.add(record);
        }
        let daily: Vec<DailyTotals> = by_day.into_values().collect();

        let window = match (daily.first(), daily.last()) {
            (Some(first), Some(last)) => Some(DateWindow {
                start: first.date,
                end: last.date,
            }),
            _ => None,
        };

        let mut gaps = gaps.to_vec();
        gaps.sort_by_key(|gap| gap.date);

        let top_users = self.rank_subjects(&unique);
        let active_subjects = unique
            .iter()
            .filter(|r| r.is_active())
            .filter_map(|r| r.subject_login.as_deref())
            .collect::<HashSet<_>>()
            .len();

        AggregateSnapshot {
            window,
            record_count: unique.len(),
            subject_count: unique
                .iter()
                .filter_map(|r| r.subject_login.as_deref())
                .collect::<HashSet<_>>()
                .len(),
            active_subjects,
            acceptance_rate: totals.acceptance_rate(),
            totals,
            averages: window_averages(&daily),
            trend: trend(&daily),
            daily,
            gaps,
            top_users,
            top_editors: self.top_editors(&unique),
            top_languages: self.top_languages(&unique),
        }
    }

    /// Subjects by total acceptances, descending; ties keep first-seen order.
    fn rank_subjects(&self, records: &[&UsageRecord]) -> Vec<SubjectRanking> {
        let mut order: Vec<(String, u64, u64)> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for record in records {
            let Some(login) = record.subject_login.as_deref() else {
                continue;
            };
            let slot = *index.entry(login).or_insert_with(|| {
                order.push((login.to_string(), 0, 0));
                order.len() - 1
            });
            order[slot].1 += record.acceptances_count;
            order[slot].2 += record.suggestions_count;
        }

        order.sort_by(|a, b| b.1.cmp(&a.1));
        order.truncate(self.top_n);
        order
            .into_iter()
            .map(|(login, acceptances, suggestions)| SubjectRanking {
                login,
                acceptances,
                suggestions,
                acceptance_rate: acceptance_rate(acceptances, suggestions),
            })
            .collect()
    }

    fn top_editors(&self, records: &[&UsageRecord]) -> Vec<BreakdownEntry> {
        let mut grouped: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
        for record in records {
            for (name, tally) in &record.editor_breakdown {
                let entry = grouped.entry(name.as_str()).or_default();
                entry.0 += tally.suggestions;
                entry.1 += tally.acceptances;
            }
        }
        self.top_by_suggestions(grouped)
    }

    fn top_languages(&self, records: &[&UsageRecord]) -> Vec<BreakdownEntry> {
        let mut grouped: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
        for record in records {
            for (name, suggestions) in &record.language_breakdown {
                grouped.entry(name.as_str()).or_default().0 += suggestions;
            }
        }
        self.top_by_suggestions(grouped)
    }

    fn top_by_suggestions(&self, grouped: BTreeMap<&str, (u64, u64)>) -> Vec<BreakdownEntry> {
        let mut entries: Vec<BreakdownEntry> = grouped
            .into_iter()
            .map(|(name, (suggestions, acceptances))| BreakdownEntry {
                name: name.to_string(),
                suggestions,
                acceptances,
            })
            .collect();
        entries.sort_by(|a, b| b.suggestions.cmp(&a.suggestions));
        entries.truncate(self.top_n);
        entries
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn window_averages(daily: &[DailyTotals]) -> WindowAverages {
    if daily.is_empty() {
        return WindowAverages::default();
    }
    let rounded = |f: fn(&UsageTotals) -> u64| {
        mean(daily.iter().map(|d| f(&d.totals) as f64)).round() as u64
    };

    WindowAverages {
        active_users: rounded(|t| t.active_users),
        engaged_users: rounded(|t| t.engaged_users),
        acceptances_per_day: rounded(|t| t.acceptances),
        suggestions_per_day: rounded(|t| t.suggestions),
        acceptance_rate: round2(mean(daily.iter().map(|d| {
            if d.totals.suggestions == 0 {
                0.0
            } else {
                d.totals.acceptances as f64 * 100.0 / d.totals.suggestions as f64
            }
        }))),
    }
}

/// First-vs-last comparison by calendar order; needs at least two dates.
fn trend(daily: &[DailyTotals]) -> Option<TrendSummary> {
    if daily.len() < 2 {
        return None;
    }
    let first = daily.first()?;
    let last = daily.last()?;

    Some(TrendSummary {
        first_date: first.date,
        last_date: last.date,
        acceptances: MetricTrend::between(first.totals.acceptances, last.totals.acceptances),
        suggestions: MetricTrend::between(first.totals.suggestions, last.totals.suggestions),
        active_users: MetricTrend::between(first.totals.active_users, last.totals.active_users),
    })
}
