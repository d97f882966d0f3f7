//! Collection Pipeline
//!
//! Orchestrates one run from credentials to written reports:
//!
//! `Unauthenticated -> Authenticated -> Fetching(i) -> Normalizing -> Aggregating -> Emitting -> Done`
//!
//! The pipeline is strictly sequential. Per-date fetches of a range run one at
//! a time, separated by the fixed delay from [`crate::config::FetchConfig`].
//! A failure on an individual date of a range, or a single-day report with
//! no data, is recorded as a [`DateGap`] and the run continues; every other
//! failure ends the run.

use crate::aggregator::{dedupe, AggregateSnapshot, Aggregator, DateGap};
use crate::auth::{AccessToken, InstallationCredential, TokenIssuer};
use crate::config::Config;
use crate::error::MetricsResult;
use crate::fetch::{FetchAdapter, RawPayload, ReportRequest};
use crate::models::UsageRecord;
use crate::normalizer::RecordNormalizer;
use crate::report::{ReportBundle, ReportContext, ReportEmitter, WrittenReports};
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Unauthenticated,
    Authenticated,
    /// Fetching the unit at this index of the request's fetch plan.
    Fetching(usize),
    Normalizing,
    Aggregating,
    Emitting,
    Done,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub records: Vec<UsageRecord>,
    pub snapshot: AggregateSnapshot,
    pub bundle: ReportBundle,
    pub written: WrittenReports,
}

pub struct UsagePipeline<'a> {
    config: &'a Config,
    transport: &'a dyn Transport,
    stage: PipelineStage,
}

impl<'a> UsagePipeline<'a> {
    pub fn new(config: &'a Config, transport: &'a dyn Transport) -> Self {
        Self {
            config,
            transport,
            stage: PipelineStage::Unauthenticated,
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    fn advance(&mut self, stage: PipelineStage) {
        debug!(from = ?self.stage, to = ?stage, "Pipeline stage");
        self.stage = stage;
    }

    /// Execute one run at wall-clock `now`.
    pub async fn run(&mut self, request: &ReportRequest, now: DateTime<Utc>) -> MetricsResult<RunOutcome> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, scope = %request.scope.label());
        self.execute(run_id, request, now).instrument(span).await
    }

    async fn execute(
        &mut self,
        run_id: Uuid,
        request: &ReportRequest,
        now: DateTime<Utc>,
    ) -> MetricsResult<RunOutcome> {
        let config = self.config;
        request.validate()?;
        config.validate()?;

        let github = &config.github;
        let credential = InstallationCredential::new(
            github.app_id.clone(),
            github.installation_id.clone(),
            config.read_private_key()?,
        );

        let token = TokenIssuer::new(self.transport, &github.api_base_url)
            .authenticate(&credential, now)
            .await?;
        self.advance(PipelineStage::Authenticated);

        let (payloads, gaps) = self.fetch_all(request, &token).await?;

        self.advance(PipelineStage::Normalizing);
        let mut records = Vec::new();
        for payload in &payloads {
            let normalized = RecordNormalizer::for_unit(&payload.unit).normalize(&payload.body)?;
            debug!(unit = %payload.unit, records = normalized.len(), "Normalized payload");
            records.extend(normalized);
        }
        if let Some(login) = &request.subject_filter {
            records.retain(|r| r.subject_login.as_deref() == Some(login.as_str()));
        }
        let records = dedupe(records);

        self.advance(PipelineStage::Aggregating);
        let snapshot = Aggregator::new().aggregate(&records, &gaps);
        info!(
            records = snapshot.record_count,
            days = snapshot.daily.len(),
            gaps = snapshot.gaps.len(),
            "Aggregated usage"
        );

        self.advance(PipelineStage::Emitting);
        let context = ReportContext {
            scope: request.scope.label(),
            report: request.granularity.to_string(),
            generated_at: now,
        };
        let bundle = ReportEmitter::new().render(&context, &records, &snapshot)?;
        let written = bundle.write_to(&config.output.directory, &self.file_prefix(request))?;

        self.advance(PipelineStage::Done);
        Ok(RunOutcome {
            run_id,
            records,
            snapshot,
            bundle,
            written,
        })
    }

    async fn fetch_all(
        &mut self,
        request: &ReportRequest,
        token: &AccessToken,
    ) -> MetricsResult<(Vec<RawPayload>, Vec<DateGap>)> {
        let config = self.config;
        let adapter = FetchAdapter::new(self.transport, &config.github.api_base_url, token);
        let delay = config.fetch.request_delay();
        let mut payloads = Vec::new();
        let mut gaps = Vec::new();

        for (index, unit) in request.fetch_units().iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.advance(PipelineStage::Fetching(index));

            match adapter.fetch(unit).await {
                Ok(payload) => payloads.push(payload),
                Err(err) if request.tolerates(&err) => {
                    let Some(date) = unit.day() else {
                        return Err(err);
                    };
                    warn!(%unit, error = %err, "No data for date, continuing");
                    gaps.push(DateGap {
                        date,
                        reason: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        Ok((payloads, gaps))
    }

    fn file_prefix(&self, request: &ReportRequest) -> String {
        let mut prefix = format!(
            "{}_{}_{}",
            self.config.output.file_prefix,
            request.scope.slug(),
            request.granularity.slug()
        );
        if let Some(login) = &request.subject_filter {
            prefix.push('_');
            prefix.push_str(login);
        }
        prefix
    }
}
