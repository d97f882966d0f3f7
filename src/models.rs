//! Core Data Models
//!
//! This module defines the canonical data structures every wire payload is
//! normalized into, plus the small calendar helpers the pipeline needs.
//!
//! ## Data Flow
//!
//! 1. **Raw Data**: report bytes returned by the fetch adapter
//! 2. **Canonical**: [`UsageRecord`] - one record per subject per day
//! 3. **Aggregation**: [`crate::aggregator::AggregateSnapshot`] - totals, rates and rankings
//! 4. **Output**: [`crate::report::ReportBundle`] - record, tabular and narrative exports
//!
//! ## Core Types
//!
//! - [`UsageRecord`] - canonical per-subject-per-day usage counters
//! - [`Scope`] - what a record describes (organization, enterprise, team, user)
//! - [`RecordKey`] - uniqueness key used for deduplication
//! - [`EditorTally`] - per-editor suggestion/acceptance counters
//! - [`DateWindow`] - inclusive calendar window expanded one day at a time

use crate::error::{MetricsError, MetricsResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Organization,
    Enterprise,
    Team,
    User,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Organization => "organization",
            Scope::Enterprise => "enterprise",
            Scope::Team => "team",
            Scope::User => "user",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorTally {
    pub suggestions: u64,
    pub acceptances: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub date: NaiveDate,
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_login: Option<String>,
    pub suggestions_count: u64,
    pub acceptances_count: u64,
    pub lines_suggested: u64,
    pub lines_accepted: u64,
    pub chat_turns: u64,
    pub active_chat_users: u64,
    pub engaged_users: u64,
    pub active_users: u64,
    #[serde(default)]
    pub editor_breakdown: BTreeMap<String, EditorTally>,
    #[serde(default)]
    pub language_breakdown: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub date: NaiveDate,
    pub scope: Scope,
    pub subject_login: Option<String>,
}

impl UsageRecord {
    pub fn new(date: NaiveDate, scope: Scope, subject_login: Option<String>) -> Self {
        Self {
            date,
            scope,
            subject_login,
            suggestions_count: 0,
            acceptances_count: 0,
            lines_suggested: 0,
            lines_accepted: 0,
            chat_turns: 0,
            active_chat_users: 0,
            engaged_users: 0,
            active_users: 0,
            editor_breakdown: BTreeMap::new(),
            language_breakdown: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            date: self.date,
            scope: self.scope,
            subject_login: self.subject_login.clone(),
        }
    }

    /// A record counts as active once at least one suggestion was accepted.
    pub fn is_active(&self) -> bool {
        self.acceptances_count > 0
    }

    /// Label used in tabular output: the login for user records, the scope otherwise.
    pub fn subject_label(&self) -> &str {
        self.subject_login
            .as_deref()
            .unwrap_or_else(|| self.scope.as_str())
    }
}

/// Inclusive calendar window. Dates are timezone-naive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> MetricsResult<Self> {
        if start > end {
            return Err(MetricsError::Config(format!(
                "window start {} is after end {}",
                start.format(DATE_FORMAT),
                end.format(DATE_FORMAT)
            )));
        }
        Ok(Self { start, end })
    }

    /// Every calendar date in the window, in order.
    pub fn dates(&self) -> Vec<NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(|d| *d <= end).collect()
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start.format(DATE_FORMAT))
        } else {
            write!(
                f,
                "{} to {}",
                self.start.format(DATE_FORMAT),
                self.end.format(DATE_FORMAT)
            )
        }
    }
}

/// Parse a `YYYY-MM-DD` date, reporting failures as configuration errors.
pub fn parse_date(value: &str) -> MetricsResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| {
        MetricsError::Config(format!("invalid date '{}', expected YYYY-MM-DD", value))
    })
}
