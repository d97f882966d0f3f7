//! Report emitter.
//!
//! Renders one [`AggregateSnapshot`] and its record set into three outputs:
//!
//! - **Record export** (`.ndjson`): one canonical record per line, in normalization order
//! - **Tabular export** (`.csv`): fixed header, one row per record, floored acceptance rate
//! - **Narrative export** (`.txt`): fixed sections, two-decimal rates and averages
//!
//! Rows and sections are built as structured values first and serialized
//! last, so all three outputs read from the same numbers. Rendering is
//! deterministic: the only time value involved is the one carried by
//! [`ReportContext`].

use crate::aggregator::{
    acceptance_rate, acceptance_rate_floor, AggregateSnapshot, BreakdownEntry, MetricTrend,
};
use crate::error::MetricsResult;
use crate::models::{UsageRecord, DATE_FORMAT};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const TABLE_HEADER: [&str; 11] = [
    "date",
    "subject",
    "acceptances",
    "suggestions",
    "rate",
    "linesAccepted",
    "linesSuggested",
    "chats",
    "activeChatUsers",
    "engagedUsers",
    "activeUsers",
];

const RULE: &str = "============================================================";

/// Identity of the run, printed in the narrative header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportContext {
    pub scope: String,
    pub report: String,
    pub generated_at: DateTime<Utc>,
}

/// The three rendered outputs of one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportBundle {
    pub records: String,
    pub table: String,
    pub narrative: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenReports {
    pub records: PathBuf,
    pub table: PathBuf,
    pub narrative: PathBuf,
}

/// Comma-separated table with a fixed header.
#[derive(Debug, Clone, Default)]
pub struct Table {
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn render(&self) -> String {
        let mut out = TABLE_HEADER.join(",");
        out.push('\n');
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(|cell| escape_cell(cell)).collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        out
    }
}

fn escape_cell(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[derive(Debug, Clone)]
struct Section {
    title: String,
    lines: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct Narrative {
    sections: Vec<Section>,
}

impl Narrative {
    fn section(&mut self, title: &str, lines: Vec<String>) {
        self.sections.push(Section {
            title: title.to_string(),
            lines,
        });
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for (index, section) in self.sections.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            out.push_str(RULE);
            out.push('\n');
            out.push_str(&section.title);
            out.push('\n');
            out.push_str(RULE);
            out.push('\n');
            for line in &section.lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

fn pct(value: f64) -> String {
    format!("{:.2}%", value)
}

fn trend_line(label: &str, trend: &MetricTrend) -> String {
    format!(
        "{:<24}{} -> {} ({})",
        label, trend.first, trend.last, trend.growth
    )
}

fn ranking_lines(entries: &[BreakdownEntry]) -> Vec<String> {
    entries
        .iter()
        .enumerate()
        .map(|(i, e)| {
            format!(
                "{:>2}. {:<20} suggestions {:>8}  acceptances {:>8}",
                i + 1,
                e.name,
                e.suggestions,
                e.acceptances
            )
        })
        .collect()
}

pub struct ReportEmitter;

impl Default for ReportEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEmitter {
    pub fn new() -> Self {
        Self
    }

    pub fn render(
        &self,
        context: &ReportContext,
        records: &[UsageRecord],
        snapshot: &AggregateSnapshot,
    ) -> MetricsResult<ReportBundle> {
        Ok(ReportBundle {
            records: self.record_export(records)?,
            table: self.table(records).render(),
            narrative: self.narrative(context, snapshot).render(),
        })
    }

    fn record_export(&self, records: &[UsageRecord]) -> MetricsResult<String> {
        let mut out = String::new();
        for record in records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }

    fn table(&self, records: &[UsageRecord]) -> Table {
        let mut table = Table::default();
        for r in records {
            table.push(vec![
                r.date.format(DATE_FORMAT).to_string(),
                r.subject_label().to_string(),
                r.acceptances_count.to_string(),
                r.suggestions_count.to_string(),
                acceptance_rate_floor(r.acceptances_count, r.suggestions_count).to_string(),
                r.lines_accepted.to_string(),
                r.lines_suggested.to_string(),
                r.chat_turns.to_string(),
                r.active_chat_users.to_string(),
                r.engaged_users.to_string(),
                r.active_users.to_string(),
            ]);
        }
        table
    }

    fn narrative(&self, context: &ReportContext, snapshot: &AggregateSnapshot) -> Narrative {
        let mut narrative = Narrative::default();
        let totals = &snapshot.totals;
        let averages = &snapshot.averages;

        let period = snapshot
            .window
            .map(|w| w.to_string())
            .unwrap_or_else(|| "no data".to_string());
        narrative.section(
            "GITHUB COPILOT USAGE REPORT",
            vec![
                format!("{:<24}{}", "Scope:", context.scope),
                format!("{:<24}{}", "Report:", context.report),
                format!("{:<24}{}", "Period:", period),
                format!("{:<24}{}", "Generated:", context.generated_at.to_rfc3339()),
                format!("{:<24}{}", "Records:", snapshot.record_count),
                format!("{:<24}{}", "Users:", snapshot.subject_count),
            ],
        );

        narrative.section(
            "TOTALS",
            vec![
                format!("{:<24}{}", "Suggestions:", totals.suggestions),
                format!("{:<24}{}", "Acceptances:", totals.acceptances),
                format!("{:<24}{}", "Lines suggested:", totals.lines_suggested),
                format!("{:<24}{}", "Lines accepted:", totals.lines_accepted),
                format!("{:<24}{}", "Chat turns:", totals.chat_turns),
                format!("{:<24}{}", "Active chat users:", totals.active_chat_users),
                format!("{:<24}{}", "Avg active users/day:", averages.active_users),
                format!("{:<24}{}", "Avg engaged users/day:", averages.engaged_users),
                format!("{:<24}{}", "Avg acceptances/day:", averages.acceptances_per_day),
            ],
        );

        narrative.section(
            "ACCEPTANCE RATE",
            vec![
                format!("{:<24}{}", "Overall:", pct(snapshot.acceptance_rate)),
                format!("{:<24}{}", "Daily average:", pct(averages.acceptance_rate)),
            ],
        );

        if let Some(trend) = &snapshot.trend {
            narrative.section(
                "TRENDS",
                vec![
                    format!(
                        "{:<24}{} to {}",
                        "Compared:",
                        trend.first_date.format(DATE_FORMAT),
                        trend.last_date.format(DATE_FORMAT)
                    ),
                    trend_line("Acceptances:", &trend.acceptances),
                    trend_line("Suggestions:", &trend.suggestions),
                    trend_line("Active users:", &trend.active_users),
                ],
            );
        }

        if snapshot.daily.len() > 1 || !snapshot.gaps.is_empty() {
            let mut days: BTreeMap<NaiveDate, String> = BTreeMap::new();
            for day in &snapshot.daily {
                let t = &day.totals;
                days.insert(
                    day.date,
                    format!(
                        "{}  suggestions {:>8}  acceptances {:>8}  rate {:>7}  active users {:>5}",
                        day.date.format(DATE_FORMAT),
                        t.suggestions,
                        t.acceptances,
                        pct(acceptance_rate(t.acceptances, t.suggestions)),
                        t.active_users
                    ),
                );
            }
            for gap in &snapshot.gaps {
                days.entry(gap.date).or_insert_with(|| {
                    format!("{}  no data ({})", gap.date.format(DATE_FORMAT), gap.reason)
                });
            }
            narrative.section("DAILY BREAKDOWN", days.into_values().collect());
        }

        if !snapshot.top_users.is_empty() {
            let lines = snapshot
                .top_users
                .iter()
                .enumerate()
                .map(|(i, u)| {
                    format!(
                        "{:>2}. {:<20} acceptances {:>8}  suggestions {:>8}  rate {:>7}",
                        i + 1,
                        u.login,
                        u.acceptances,
                        u.suggestions,
                        pct(u.acceptance_rate)
                    )
                })
                .collect();
            narrative.section("TOP USERS", lines);
        }
        if !snapshot.top_editors.is_empty() {
            narrative.section("TOP EDITORS", ranking_lines(&snapshot.top_editors));
        }
        if !snapshot.top_languages.is_empty() {
            narrative.section("TOP LANGUAGES", ranking_lines(&snapshot.top_languages));
        }

        narrative
    }
}

impl ReportBundle {
    /// Write the three outputs as `<prefix>.ndjson`, `<prefix>.csv` and `<prefix>.txt`.
    pub fn write_to(&self, directory: &Path, prefix: &str) -> MetricsResult<WrittenReports> {
        fs::create_dir_all(directory)?;

        let written = WrittenReports {
            records: directory.join(format!("{}.ndjson", prefix)),
            table: directory.join(format!("{}.csv", prefix)),
            narrative: directory.join(format!("{}.txt", prefix)),
        };
        fs::write(&written.records, &self.records)?;
        fs::write(&written.table, &self.table)?;
        fs::write(&written.narrative, &self.narrative)?;

        info!(
            directory = %directory.display(),
            prefix,
            "Wrote record, tabular and narrative reports"
        );
        Ok(written)
    }
}
