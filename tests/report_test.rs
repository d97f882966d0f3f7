mod common;

use chrono::{TimeZone, Utc};
use copilot_metrics::aggregator::{Aggregator, DateGap};
use copilot_metrics::models::{parse_date, Scope, UsageRecord};
use copilot_metrics::normalizer::RecordNormalizer;
use copilot_metrics::report::{ReportBundle, ReportContext, ReportEmitter};
use std::fs;
use tempfile::tempdir;

#[cfg(test)]
mod report_tests {
    use super::*;

    fn context() -> ReportContext {
        ReportContext {
            scope: "organization acme".to_string(),
            report: "usage summary 2024-06-01 to 2024-06-03".to_string(),
            generated_at: Utc.with_ymd_and_hms(2024, 6, 4, 8, 30, 0).unwrap(),
        }
    }

    fn legacy_records() -> Vec<UsageRecord> {
        RecordNormalizer::new(Scope::Organization, None)
            .normalize(&common::fixture("legacy_usage.json"))
            .unwrap()
    }

    fn render(records: &[UsageRecord], gaps: &[DateGap]) -> ReportBundle {
        let snapshot = Aggregator::new().aggregate(records, gaps);
        ReportEmitter::new()
            .render(&context(), records, &snapshot)
            .expect("render succeeds")
    }

    fn line_with<'a>(text: &'a str, label: &str) -> &'a str {
        text.lines()
            .find(|l| l.starts_with(label))
            .unwrap_or_else(|| panic!("no line starting with {}", label))
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let records = legacy_records();
        assert_eq!(render(&records, &[]), render(&records, &[]));
    }

    #[test]
    fn test_record_export_round_trips() {
        let records = legacy_records();
        let bundle = render(&records, &[]);

        let parsed: Vec<UsageRecord> = bundle
            .records
            .lines()
            .map(|line| serde_json::from_str(line).expect("valid record line"))
            .collect();
        assert_eq!(parsed, records);
        assert!(bundle.records.lines().next().unwrap().contains("\"suggestionsCount\":20"));
    }

    #[test]
    fn test_table_rows_use_floored_rate() {
        let bundle = render(&legacy_records(), &[]);
        let lines: Vec<&str> = bundle.table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "date,subject,acceptances,suggestions,rate,linesAccepted,linesSuggested,chats,activeChatUsers,engagedUsers,activeUsers"
        );
        assert_eq!(lines[1], "2024-06-01,organization,10,20,50,18,45,7,2,0,4");
        assert_eq!(lines[2], "2024-06-02,organization,20,40,50,35,90,0,0,0,5");
        assert_eq!(lines[3], "2024-06-03,organization,30,50,60,60,100,3,1,0,6");
    }

    #[test]
    fn test_table_labels_users_by_login() {
        let records = RecordNormalizer::new(Scope::Enterprise, parse_date("2024-06-05").ok())
            .normalize(&common::fixture("users_day.ndjson"))
            .unwrap();
        let bundle = render(&records, &[]);
        let row = bundle.table.lines().nth(2).unwrap();
        assert_eq!(row, "2024-06-05,bo,50,80,62,90,150,4,1,1,1");
    }

    #[test]
    fn test_narrative_numbers() {
        let bundle = render(&legacy_records(), &[]);
        let text = &bundle.narrative;

        assert!(text.starts_with(&"=".repeat(60)));
        assert!(line_with(text, "Scope:").ends_with("organization acme"));
        assert!(line_with(text, "Period:").ends_with("2024-06-01 to 2024-06-03"));
        assert!(line_with(text, "Generated:").ends_with("2024-06-04T08:30:00+00:00"));
        assert!(line_with(text, "Suggestions:").ends_with("110"));
        assert!(line_with(text, "Overall:").ends_with("54.55%"));
        assert!(line_with(text, "Daily average:").ends_with("53.33%"));
        assert!(line_with(text, "Avg active users/day:").ends_with("5"));
        assert!(text.contains("10 -> 30 (200.00%)"));

        let sections = [
            "GITHUB COPILOT USAGE REPORT",
            "TOTALS",
            "ACCEPTANCE RATE",
            "TRENDS",
            "DAILY BREAKDOWN",
            "TOP EDITORS",
            "TOP LANGUAGES",
        ];
        let positions: Vec<usize> = sections
            .iter()
            .map(|s| text.find(s).unwrap_or_else(|| panic!("missing section {}", s)))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(!text.contains("TOP USERS"));
    }

    #[test]
    fn test_narrative_marks_missing_dates() {
        let records: Vec<UsageRecord> = legacy_records()
            .into_iter()
            .filter(|r| r.date != parse_date("2024-06-02").unwrap())
            .collect();
        let gaps = vec![DateGap {
            date: parse_date("2024-06-02").unwrap(),
            reason: "no report for this day".to_string(),
        }];
        let bundle = render(&records, &gaps);

        let daily: Vec<&str> = bundle
            .narrative
            .lines()
            .filter(|l| l.starts_with("2024-06-0"))
            .collect();
        assert_eq!(daily.len(), 3);
        assert!(daily[0].starts_with("2024-06-01  suggestions"));
        assert_eq!(daily[1], "2024-06-02  no data (no report for this day)");
        assert!(daily[2].starts_with("2024-06-03  suggestions"));
    }

    #[test]
    fn test_write_to_creates_three_files() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("nested").join("reports");
        let bundle = render(&legacy_records(), &[]);

        let written = bundle.write_to(&out, "copilot_metrics_org_acme").unwrap();
        assert_eq!(written.records, out.join("copilot_metrics_org_acme.ndjson"));
        assert_eq!(written.table, out.join("copilot_metrics_org_acme.csv"));
        assert_eq!(written.narrative, out.join("copilot_metrics_org_acme.txt"));

        assert_eq!(fs::read_to_string(&written.records).unwrap(), bundle.records);
        assert_eq!(fs::read_to_string(&written.table).unwrap(), bundle.table);
        assert_eq!(fs::read_to_string(&written.narrative).unwrap(), bundle.narrative);
    }
}
