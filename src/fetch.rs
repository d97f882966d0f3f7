//! Fetch adapter.
//!
//! One adapter serves every report the pipeline knows about. A [`ReportRequest`]
//! (scope + granularity) expands into [`FetchUnit`]s; each unit maps to one
//! endpoint. The endpoint either answers inline (legacy usage arrays) or with
//! a set of signed download links that are fetched and newline-joined into
//! one raw payload.

use crate::auth::AccessToken;
use crate::error::{MetricsError, MetricsResult};
use crate::models::{DateWindow, Scope, DATE_FORMAT};
use crate::transport::Transport;
use chrono::NaiveDate;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportScope {
    Organization { org: String },
    Enterprise { enterprise: String },
    /// Per-user reports for every seat in an enterprise.
    EnterpriseUsers { enterprise: String },
    Team { org: String, team: String },
}

impl ReportScope {
    /// Scope assigned to aggregate records (records without a login).
    pub fn record_scope(&self) -> Scope {
        match self {
            ReportScope::Organization { .. } => Scope::Organization,
            ReportScope::Enterprise { .. } | ReportScope::EnterpriseUsers { .. } => {
                Scope::Enterprise
            }
            ReportScope::Team { .. } => Scope::Team,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ReportScope::Organization { org } => format!("organization {}", org),
            ReportScope::Enterprise { enterprise } => format!("enterprise {}", enterprise),
            ReportScope::EnterpriseUsers { enterprise } => {
                format!("enterprise {} (per user)", enterprise)
            }
            ReportScope::Team { org, team } => format!("team {}/{}", org, team),
        }
    }

    /// Short identifier used in output file names.
    pub fn slug(&self) -> String {
        match self {
            ReportScope::Organization { org } => format!("org_{}", org),
            ReportScope::Enterprise { enterprise } => format!("enterprise_{}", enterprise),
            ReportScope::EnterpriseUsers { enterprise } => format!("users_{}", enterprise),
            ReportScope::Team { org, team } => format!("team_{}_{}", org, team),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Day(NaiveDate),
    /// One day-report fetch per date, tolerating per-date failures.
    Range(DateWindow),
    /// Trailing 28-day snapshot fetched as one unit.
    Rolling28,
    /// Legacy usage endpoint queried once with `since`/`until`.
    Legacy(DateWindow),
}

impl Granularity {
    pub fn slug(&self) -> String {
        match self {
            Granularity::Day(day) => day.format(DATE_FORMAT).to_string(),
            Granularity::Range(w) | Granularity::Legacy(w) => format!(
                "{}_{}",
                w.start.format(DATE_FORMAT),
                w.end.format(DATE_FORMAT)
            ),
            Granularity::Rolling28 => "28day".to_string(),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Day(day) => write!(f, "single day {}", day.format(DATE_FORMAT)),
            Granularity::Range(w) => write!(f, "daily reports {}", w),
            Granularity::Rolling28 => f.write_str("28-day rolling report"),
            Granularity::Legacy(w) => write!(f, "usage summary {}", w),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub scope: ReportScope,
    pub granularity: Granularity,
    /// Restrict per-user reports to one login.
    pub subject_filter: Option<String>,
}

impl ReportRequest {
    pub fn validate(&self) -> MetricsResult<()> {
        match (&self.scope, &self.granularity) {
            (ReportScope::Team { .. }, Granularity::Legacy(_)) => {}
            (ReportScope::Team { .. }, _) => {
                return Err(MetricsError::Config(
                    "team reports are only available through the legacy usage endpoint".into(),
                ))
            }
            (ReportScope::EnterpriseUsers { .. }, Granularity::Legacy(_)) => {
                return Err(MetricsError::Config(
                    "per-user reports have no legacy usage endpoint".into(),
                ))
            }
            _ => {}
        }
        if self.subject_filter.is_some()
            && !matches!(self.scope, ReportScope::EnterpriseUsers { .. })
        {
            return Err(MetricsError::Config(
                "a user filter requires the per-user enterprise report".into(),
            ));
        }
        Ok(())
    }

    /// Whether `err` on one unit is recorded as a gap instead of ending the run.
    /// Any per-date failure inside a range qualifies; a single day only when
    /// the report simply had no data.
    pub fn tolerates(&self, err: &MetricsError) -> bool {
        match self.granularity {
            Granularity::Range(_) => err.is_per_date_tolerable(),
            Granularity::Day(_) => matches!(err, MetricsError::EmptyResult { .. }),
            Granularity::Rolling28 | Granularity::Legacy(_) => false,
        }
    }

    /// Fetch units in calendar order.
    pub fn fetch_units(&self) -> Vec<FetchUnit> {
        let kinds = match self.granularity {
            Granularity::Day(day) => vec![UnitKind::Day(day)],
            Granularity::Range(window) => window.dates().into_iter().map(UnitKind::Day).collect(),
            Granularity::Rolling28 => vec![UnitKind::Rolling28],
            Granularity::Legacy(window) => vec![UnitKind::Legacy(window)],
        };
        kinds
            .into_iter()
            .map(|kind| FetchUnit {
                scope: self.scope.clone(),
                kind,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Day(NaiveDate),
    Rolling28,
    Legacy(DateWindow),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchUnit {
    pub scope: ReportScope,
    pub kind: UnitKind,
}

impl FetchUnit {
    pub fn day(&self) -> Option<NaiveDate> {
        match self.kind {
            UnitKind::Day(day) => Some(day),
            _ => None,
        }
    }

    /// Whether an answer without download links is fatal (`NotFoundLinks`)
    /// rather than an empty day (`EmptyResult`).
    pub fn links_mandatory(&self) -> bool {
        matches!(self.kind, UnitKind::Rolling28)
            || matches!(self.scope, ReportScope::EnterpriseUsers { .. })
    }

    pub fn endpoint(&self, api_base_url: &str) -> String {
        let base = api_base_url.trim_end_matches('/');
        match (&self.scope, self.kind) {
            (ReportScope::Organization { org }, UnitKind::Day(day)) => format!(
                "{}/orgs/{}/copilot/metrics/reports/organization-1-day?day={}",
                base,
                org,
                day.format(DATE_FORMAT)
            ),
            (ReportScope::Organization { org }, UnitKind::Rolling28) => format!(
                "{}/orgs/{}/copilot/metrics/reports/organization-28-day/latest",
                base, org
            ),
            (ReportScope::Organization { org }, UnitKind::Legacy(w)) => {
                format!("{}/orgs/{}/copilot/usage?{}", base, org, since_until(w))
            }
            (ReportScope::Enterprise { enterprise }, UnitKind::Day(day)) => format!(
                "{}/enterprises/{}/copilot/metrics/reports/enterprise-1-day?day={}",
                base,
                enterprise,
                day.format(DATE_FORMAT)
            ),
            (ReportScope::Enterprise { enterprise }, UnitKind::Rolling28) => format!(
                "{}/enterprises/{}/copilot/metrics/reports/enterprise-28-day/latest",
                base, enterprise
            ),
            (ReportScope::Enterprise { enterprise }, UnitKind::Legacy(w)) => format!(
                "{}/enterprises/{}/copilot/usage?{}",
                base,
                enterprise,
                since_until(w)
            ),
            (ReportScope::EnterpriseUsers { enterprise }, UnitKind::Day(day)) => format!(
                "{}/enterprises/{}/copilot/metrics/reports/users-1-day?day={}",
                base,
                enterprise,
                day.format(DATE_FORMAT)
            ),
            (ReportScope::EnterpriseUsers { enterprise }, _) => format!(
                "{}/enterprises/{}/copilot/metrics/reports/users-28-day/latest",
                base, enterprise
            ),
            (ReportScope::Team { org, team }, UnitKind::Legacy(w)) => format!(
                "{}/orgs/{}/team/{}/copilot/usage?{}",
                base,
                org,
                team,
                since_until(w)
            ),
            (ReportScope::Team { org, team }, _) => {
                format!("{}/orgs/{}/team/{}/copilot/usage", base, org, team)
            }
        }
    }
}

impl fmt::Display for FetchUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            UnitKind::Day(day) => write!(f, "{} on {}", self.scope.label(), day.format(DATE_FORMAT)),
            UnitKind::Rolling28 => write!(f, "{} (28-day report)", self.scope.label()),
            UnitKind::Legacy(w) => write!(f, "{} usage {}", self.scope.label(), w),
        }
    }
}

fn since_until(window: DateWindow) -> String {
    format!(
        "since={}&until={}",
        window.start.format(DATE_FORMAT),
        window.end.format(DATE_FORMAT)
    )
}

/// What a report endpoint answered once error bodies are ruled out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Inline(String),
    Links(Vec<String>),
}

/// Classify an endpoint response body for `unit`.
pub fn interpret_response(body: &str, unit: &FetchUnit) -> MetricsResult<Resolved> {
    let value: Value = serde_json::from_str(body).map_err(|e| {
        MetricsError::api(format!("unparseable response for {}: {}", unit, e))
    })?;

    match &value {
        Value::Array(_) => Ok(Resolved::Inline(body.to_string())),
        Value::Object(map) => {
            if let Some(message) = map.get("message").and_then(Value::as_str) {
                return Err(MetricsError::api(message));
            }

            let links: Vec<String> = map
                .get("download_links")
                .and_then(Value::as_array)
                .map(|links| {
                    links
                        .iter()
                        .filter_map(Value::as_str)
                        .filter(|link| !link.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            if !links.is_empty() {
                if let (Some(start), Some(end)) = (
                    map.get("report_start_day").and_then(Value::as_str),
                    map.get("report_end_day").and_then(Value::as_str),
                ) {
                    debug!(start, end, "Report window announced by endpoint");
                }
                return Ok(Resolved::Links(links));
            }

            if unit.links_mandatory() {
                Err(MetricsError::NotFoundLinks {
                    what: unit.to_string(),
                })
            } else {
                Err(MetricsError::EmptyResult {
                    what: unit.to_string(),
                })
            }
        }
        _ => Err(MetricsError::api(format!(
            "unexpected response for {}",
            unit
        ))),
    }
}

/// Reject a downloaded file that is not a metrics payload: storage error
/// pages (XML, HTML) or a JSON error object.
pub fn check_download(part: &str, unit: &FetchUnit) -> MetricsResult<()> {
    let trimmed = part.trim_start();
    if !matches!(trimmed.chars().next(), None | Some('{') | Some('[')) {
        return Err(MetricsError::Transport(format!(
            "download for {} returned a non-JSON body",
            unit
        )));
    }
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        if let Some(message) = map.get("message").and_then(Value::as_str) {
            return Err(MetricsError::api(message));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    pub unit: FetchUnit,
    pub body: String,
}

pub struct FetchAdapter<'a> {
    transport: &'a dyn Transport,
    api_base_url: String,
    token: &'a AccessToken,
}

impl<'a> FetchAdapter<'a> {
    pub fn new(transport: &'a dyn Transport, api_base_url: &str, token: &'a AccessToken) -> Self {
        Self {
            transport,
            api_base_url: api_base_url.to_string(),
            token,
        }
    }

    /// Fetch one unit and return its raw payload, following download links.
    pub async fn fetch(&self, unit: &FetchUnit) -> MetricsResult<RawPayload> {
        let url = unit.endpoint(&self.api_base_url);
        debug!(%url, "Requesting report");

        let body = self.transport.get(&url, Some(self.token.secret())).await?;
        let body = match interpret_response(&body, unit)? {
            Resolved::Inline(body) => body,
            Resolved::Links(links) => {
                info!(unit = %unit, links = links.len(), "Downloading report files");
                let mut parts = Vec::with_capacity(links.len());
                for link in &links {
                    let part = self.transport.download(link).await?;
                    check_download(&part, unit)?;
                    parts.push(part.trim_end_matches(['\n', '\r']).to_string());
                }
                parts.join("\n")
            }
        };

        Ok(RawPayload {
            unit: unit.clone(),
            body,
        })
    }
}
