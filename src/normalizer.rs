//! Record normalizer.
//!
//! Every report the fetch adapter returns is a stream of JSON values: a legacy
//! usage array, newline-delimited metrics lines, or several downloaded files
//! joined together. Each object is classified into one of the known
//! [`WireShape`]s, decoded into a typed struct whose counters are all optional,
//! and mapped onto the canonical [`UsageRecord`]. Absent or `null` counters
//! become zero.
//!
//! Normalization is a pure function of the payload text and the
//! [`RecordNormalizer`] context: the same input always produces the same
//! records in the same order.

use crate::error::{MetricsError, MetricsResult};
use crate::fetch::FetchUnit;
use crate::models::{parse_date, EditorTally, Scope, UsageRecord};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const UNKNOWN: &str = "unknown";

/// Known wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireShape {
    /// `/copilot/usage` day aggregates with flat `total_*` counters and a `breakdown` array.
    LegacyDay,
    /// Metrics lines with nested completion / IDE chat / dotcom chat sections.
    DailyMetrics,
    /// Same structure as [`WireShape::DailyMetrics`] tagged with a report window.
    RollingWindow,
    /// Activity lines with flat `*_activity_count` counters, per user or as
    /// an organization/enterprise day row.
    UserActivity,
}

/// Classify one JSON object. Returns `None` for unrecognized shapes.
pub fn detect_shape(object: &Map<String, Value>) -> Option<WireShape> {
    let has = |key: &str| object.contains_key(key);

    if has("total_suggestions_count") || has("total_acceptances_count") || has("breakdown") {
        return Some(WireShape::LegacyDay);
    }
    if has("code_generation_activity_count")
        || has("code_acceptance_activity_count")
        || has("totals_by_ide")
        || has("daily_active_users")
    {
        return Some(WireShape::UserActivity);
    }
    let metrics = has("copilot_ide_code_completions")
        || has("copilot_ide_chat")
        || has("copilot_dotcom_chat")
        || has("total_engaged_users");
    if metrics || has("user_login") {
        if has("report_start_day") && has("report_end_day") {
            return Some(WireShape::RollingWindow);
        }
        return Some(WireShape::DailyMetrics);
    }
    None
}

// Legacy usage shape

#[derive(Debug, Deserialize)]
struct LegacyDay {
    day: Option<String>,
    date: Option<String>,
    total_suggestions_count: Option<u64>,
    total_acceptances_count: Option<u64>,
    total_lines_suggested: Option<u64>,
    total_lines_accepted: Option<u64>,
    total_active_users: Option<u64>,
    total_engaged_users: Option<u64>,
    total_chat_turns: Option<u64>,
    total_active_chat_users: Option<u64>,
    breakdown: Option<Vec<LegacyBreakdown>>,
}

#[derive(Debug, Deserialize)]
struct LegacyBreakdown {
    language: Option<String>,
    editor: Option<String>,
    suggestions_count: Option<u64>,
    acceptances_count: Option<u64>,
}

// Metrics shape (daily and rolling window)

#[derive(Debug, Deserialize)]
struct MetricsDay {
    date: Option<String>,
    day: Option<String>,
    user_login: Option<String>,
    total_active_users: Option<u64>,
    total_engaged_users: Option<u64>,
    copilot_ide_code_completions: Option<CodeCompletions>,
    copilot_ide_chat: Option<IdeChat>,
    copilot_dotcom_chat: Option<DotcomChat>,
}

#[derive(Debug, Deserialize)]
struct CodeCompletions {
    editors: Option<Vec<CompletionEditor>>,
}

#[derive(Debug, Deserialize)]
struct CompletionEditor {
    name: Option<String>,
    models: Option<Vec<CompletionModel>>,
}

#[derive(Debug, Deserialize)]
struct CompletionModel {
    languages: Option<Vec<CompletionLanguage>>,
}

#[derive(Debug, Deserialize)]
struct CompletionLanguage {
    name: Option<String>,
    total_code_suggestions: Option<u64>,
    total_code_acceptances: Option<u64>,
    total_code_lines_suggested: Option<u64>,
    total_code_lines_accepted: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct IdeChat {
    total_engaged_users: Option<u64>,
    editors: Option<Vec<ChatEditor>>,
}

#[derive(Debug, Deserialize)]
struct ChatEditor {
    models: Option<Vec<ChatModel>>,
}

#[derive(Debug, Deserialize)]
struct ChatModel {
    total_chats: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DotcomChat {
    total_engaged_users: Option<u64>,
    models: Option<Vec<ChatModel>>,
}

// Per-user activity shape

#[derive(Debug, Deserialize)]
struct UserActivity {
    day: Option<String>,
    date: Option<String>,
    user_login: Option<String>,
    code_generation_activity_count: Option<u64>,
    code_acceptance_activity_count: Option<u64>,
    loc_suggested_to_add_sum: Option<u64>,
    loc_added_sum: Option<u64>,
    user_initiated_interaction_count: Option<u64>,
    daily_active_users: Option<u64>,
    daily_engaged_users: Option<u64>,
    daily_active_chat_users: Option<u64>,
    totals_by_ide: Option<Vec<IdeActivity>>,
    totals_by_language_feature: Option<Vec<LanguageActivity>>,
}

#[derive(Debug, Deserialize)]
struct IdeActivity {
    ide: Option<String>,
    code_generation_activity_count: Option<u64>,
    code_acceptance_activity_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LanguageActivity {
    language: Option<String>,
    code_generation_activity_count: Option<u64>,
}

fn n(value: Option<u64>) -> u64 {
    value.unwrap_or(0)
}

fn name_or_unknown(name: Option<String>) -> String {
    match name {
        Some(name) if !name.trim().is_empty() => name,
        _ => UNKNOWN.to_string(),
    }
}

/// Context a payload is normalized in: the scope of aggregate records and the
/// date to fall back on when a line carries none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordNormalizer {
    pub scope: Scope,
    pub default_date: Option<NaiveDate>,
}

impl RecordNormalizer {
    pub fn new(scope: Scope, default_date: Option<NaiveDate>) -> Self {
        Self {
            scope,
            default_date,
        }
    }

    pub fn for_unit(unit: &FetchUnit) -> Self {
        Self::new(unit.scope.record_scope(), unit.day())
    }

    /// Normalize a whole payload into canonical records, in payload order.
    pub fn normalize(&self, body: &str) -> MetricsResult<Vec<UsageRecord>> {
        let mut records = Vec::new();
        let stream = serde_json::Deserializer::from_str(body).into_iter::<Value>();

        for (index, value) in stream.enumerate() {
            let value = value.map_err(|e| {
                MetricsError::Normalization(format!("malformed JSON value #{}: {}", index + 1, e))
            })?;
            match value {
                Value::Array(items) => {
                    for item in items {
                        records.push(self.normalize_value(item)?);
                    }
                }
                other => records.push(self.normalize_value(other)?),
            }
        }

        Ok(records)
    }

    fn normalize_value(&self, value: Value) -> MetricsResult<UsageRecord> {
        let shape = match &value {
            Value::Object(object) => detect_shape(object),
            _ => None,
        }
        .ok_or_else(|| {
            let keys = match &value {
                Value::Object(object) => object.keys().cloned().collect::<Vec<_>>().join(", "),
                other => format!("non-object value {}", other),
            };
            MetricsError::Normalization(format!("unrecognized payload shape ({})", keys))
        })?;

        match shape {
            WireShape::LegacyDay => self.legacy_record(decode(value, shape)?),
            WireShape::DailyMetrics | WireShape::RollingWindow => {
                self.metrics_record(decode(value, shape)?)
            }
            WireShape::UserActivity => self.activity_record(decode(value, shape)?),
        }
    }

    fn resolve_date(&self, date: Option<String>, day: Option<String>) -> MetricsResult<NaiveDate> {
        match date.or(day) {
            Some(raw) => parse_date(&raw)
                .map_err(|_| MetricsError::Normalization(format!("invalid record date '{}'", raw))),
            None => self
                .default_date
                .ok_or_else(|| MetricsError::Normalization("record carries no date".into())),
        }
    }

    fn scope_for(&self, login: &Option<String>) -> Scope {
        if login.is_some() {
            Scope::User
        } else {
            self.scope
        }
    }

    fn legacy_record(&self, raw: LegacyDay) -> MetricsResult<UsageRecord> {
        let date = self.resolve_date(raw.date, raw.day)?;
        let mut record = UsageRecord::new(date, self.scope, None);

        record.suggestions_count = n(raw.total_suggestions_count);
        record.acceptances_count = n(raw.total_acceptances_count);
        record.lines_suggested = n(raw.total_lines_suggested);
        record.lines_accepted = n(raw.total_lines_accepted);
        record.chat_turns = n(raw.total_chat_turns);
        record.active_chat_users = n(raw.total_active_chat_users);
        record.active_users = n(raw.total_active_users);
        record.engaged_users = n(raw.total_engaged_users);

        for entry in raw.breakdown.into_iter().flatten() {
            let suggestions = n(entry.suggestions_count);
            let acceptances = n(entry.acceptances_count);

            let tally = record
                .editor_breakdown
                .entry(name_or_unknown(entry.editor))
                .or_default();
            tally.suggestions += suggestions;
            tally.acceptances += acceptances;

            *record
                .language_breakdown
                .entry(name_or_unknown(entry.language))
                .or_default() += suggestions;
        }

        Ok(record)
    }

    fn metrics_record(&self, raw: MetricsDay) -> MetricsResult<UsageRecord> {
        let date = self.resolve_date(raw.date, raw.day)?;
        let scope = self.scope_for(&raw.user_login);
        let mut record = UsageRecord::new(date, scope, raw.user_login);

        let mut editors: BTreeMap<String, EditorTally> = BTreeMap::new();
        let mut languages: BTreeMap<String, u64> = BTreeMap::new();

        let completion_editors = raw
            .copilot_ide_code_completions
            .and_then(|c| c.editors)
            .unwrap_or_default();
        for editor in completion_editors {
            let tally = editors.entry(name_or_unknown(editor.name)).or_default();
            for model in editor.models.into_iter().flatten() {
                for language in model.languages.into_iter().flatten() {
                    let suggestions = n(language.total_code_suggestions);
                    let acceptances = n(language.total_code_acceptances);

                    record.suggestions_count += suggestions;
                    record.acceptances_count += acceptances;
                    record.lines_suggested += n(language.total_code_lines_suggested);
                    record.lines_accepted += n(language.total_code_lines_accepted);

                    tally.suggestions += suggestions;
                    tally.acceptances += acceptances;
                    *languages.entry(name_or_unknown(language.name)).or_default() += suggestions;
                }
            }
        }

        let mut chat_users = 0;
        if let Some(chat) = raw.copilot_ide_chat {
            chat_users += n(chat.total_engaged_users);
            for editor in chat.editors.into_iter().flatten() {
                for model in editor.models.into_iter().flatten() {
                    record.chat_turns += n(model.total_chats);
                }
            }
        }
        if let Some(chat) = raw.copilot_dotcom_chat {
            chat_users += n(chat.total_engaged_users);
            for model in chat.models.into_iter().flatten() {
                record.chat_turns += n(model.total_chats);
            }
        }

        record.editor_breakdown = editors;
        record.language_breakdown = languages;

        if record.subject_login.is_some() {
            record.active_chat_users = u64::from(record.chat_turns > 0);
            record.engaged_users =
                u64::from(record.suggestions_count > 0 || record.chat_turns > 0);
            record.active_users = u64::from(record.is_active());
        } else {
            record.active_chat_users = chat_users;
            record.engaged_users = n(raw.total_engaged_users);
            record.active_users = n(raw.total_active_users);
        }

        Ok(record)
    }

    fn activity_record(&self, raw: UserActivity) -> MetricsResult<UsageRecord> {
        let date = self.resolve_date(raw.date, raw.day)?;
        let scope = self.scope_for(&raw.user_login);
        let mut record = UsageRecord::new(date, scope, raw.user_login);

        record.suggestions_count = n(raw.code_generation_activity_count);
        record.acceptances_count = n(raw.code_acceptance_activity_count);
        record.lines_suggested = n(raw.loc_suggested_to_add_sum);
        record.lines_accepted = n(raw.loc_added_sum);
        record.chat_turns = n(raw.user_initiated_interaction_count);

        for ide in raw.totals_by_ide.into_iter().flatten() {
            let tally = record
                .editor_breakdown
                .entry(name_or_unknown(ide.ide))
                .or_default();
            tally.suggestions += n(ide.code_generation_activity_count);
            tally.acceptances += n(ide.code_acceptance_activity_count);
        }
        for language in raw.totals_by_language_feature.into_iter().flatten() {
            *record
                .language_breakdown
                .entry(name_or_unknown(language.language))
                .or_default() += n(language.code_generation_activity_count);
        }

        if record.subject_login.is_some() {
            record.active_chat_users = u64::from(record.chat_turns > 0);
            record.engaged_users =
                u64::from(record.suggestions_count > 0 || record.chat_turns > 0);
            record.active_users = u64::from(record.is_active());
        } else {
            // aggregate day row: user counts are reported, not derived
            let active = n(raw.daily_active_users);
            record.active_users = active;
            record.engaged_users = raw.daily_engaged_users.unwrap_or(active);
            record.active_chat_users = n(raw.daily_active_chat_users);
        }

        Ok(record)
    }
}

fn decode<T: DeserializeOwned>(value: Value, shape: WireShape) -> MetricsResult<T> {
    serde_json::from_value(value)
        .map_err(|e| MetricsError::Normalization(format!("invalid {:?} record: {}", shape, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_detect_shapes() {
        assert_eq!(
            detect_shape(&object(json!({"day": "2024-01-01", "breakdown": []}))),
            Some(WireShape::LegacyDay)
        );
        assert_eq!(
            detect_shape(&object(json!({"date": "2024-01-01", "copilot_ide_chat": null}))),
            Some(WireShape::DailyMetrics)
        );
        assert_eq!(
            detect_shape(&object(json!({
                "day": "2024-01-01",
                "user_login": "octocat",
                "report_start_day": "2023-12-05",
                "report_end_day": "2024-01-01"
            }))),
            Some(WireShape::RollingWindow)
        );
        assert_eq!(
            detect_shape(&object(json!({"day": "2024-01-01", "totals_by_ide": []}))),
            Some(WireShape::UserActivity)
        );
        assert_eq!(detect_shape(&object(json!({"day": "2024-01-01"}))), None);
    }

    #[test]
    fn test_null_counters_become_zero() {
        let normalizer = RecordNormalizer::new(Scope::Organization, None);
        let records = normalizer
            .normalize(r#"[{"day":"2024-01-01","total_suggestions_count":null,"total_acceptances_count":3}]"#)
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].suggestions_count, 0);
        assert_eq!(records[0].acceptances_count, 3);
        assert_eq!(records[0].lines_accepted, 0);
    }

    #[test]
    fn test_default_date_applies_to_undated_lines() {
        let day = parse_date("2024-03-05").unwrap();
        let normalizer = RecordNormalizer::new(Scope::Enterprise, Some(day));
        let records = normalizer
            .normalize(r#"{"user_login":"octocat","copilot_ide_code_completions":null}"#)
            .unwrap();
        assert_eq!(records[0].date, day);
        assert_eq!(records[0].scope, Scope::User);

        let undated = RecordNormalizer::new(Scope::Enterprise, None);
        assert!(matches!(
            undated.normalize(r#"{"user_login":"octocat"}"#),
            Err(MetricsError::Normalization(_))
        ));
    }

    #[test]
    fn test_unknown_shape_is_rejected() {
        let normalizer = RecordNormalizer::new(Scope::Organization, None);
        let err = normalizer
            .normalize(r#"{"day":"2024-01-01","seats":12}"#)
            .unwrap_err();
        assert!(matches!(err, MetricsError::Normalization(ref m) if m.contains("seats")));
    }

    #[test]
    fn test_empty_payload_yields_no_records() {
        let normalizer = RecordNormalizer::new(Scope::Organization, None);
        assert!(normalizer.normalize("").unwrap().is_empty());
        assert!(normalizer.normalize("\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_aggregate_activity_row_keeps_reported_user_counts() {
        let normalizer = RecordNormalizer::new(Scope::Organization, None);
        let records = normalizer
            .normalize(
                r#"{"day":"2024-06-05","daily_active_users":40,"monthly_active_users":55,"code_generation_activity_count":500,"code_acceptance_activity_count":200,"user_initiated_interaction_count":30}"#,
            )
            .unwrap();

        let day = &records[0];
        assert_eq!(day.scope, Scope::Organization);
        assert_eq!(day.subject_login, None);
        assert_eq!(day.active_users, 40);
        assert_eq!(day.engaged_users, 40);
        assert_eq!(day.active_chat_users, 0);
        assert_eq!(day.suggestions_count, 500);
        assert_eq!(day.chat_turns, 30);
    }
}
