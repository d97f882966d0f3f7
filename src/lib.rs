//! Copilot Metrics Library
//!
//! Authenticates as a GitHub App and collects GitHub Copilot usage telemetry
//! for an organization, enterprise, team or single user, over a single day, a
//! date range or the rolling 28-day window. Every payload shape is normalized
//! into one canonical record type, aggregated into a snapshot, and written out
//! as three synchronized reports.
//!
//! ## Architecture Overview
//!
//! - [`auth`] - assertion minting and installation token exchange
//! - [`transport`] - raw HTTP collaborator (reqwest implementation)
//! - [`fetch`] - report descriptors, endpoints and download-link resolution
//! - [`normalizer`] - wire-shape detection and decoding into [`UsageRecord`]
//! - [`aggregator`] - dedupe, totals, rates, averages, growth and rankings
//! - [`report`] - record, tabular and narrative outputs
//! - [`pipeline`] - the sequential run state machine tying it all together
//! - [`config`] - configuration file, environment overrides and validation
//! - [`logging`] - tracing subscriber setup
//!
//! ## Main Entry Point
//!
//! ```rust,no_run
//! use copilot_metrics::config::Config;
//! use copilot_metrics::fetch::{Granularity, ReportRequest, ReportScope};
//! use copilot_metrics::pipeline::UsagePipeline;
//! use copilot_metrics::transport::HttpTransport;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load(None)?;
//! let transport = HttpTransport::new(config.fetch.timeout())?;
//! let request = ReportRequest {
//!     scope: ReportScope::Organization { org: "acme".to_string() },
//!     granularity: Granularity::Rolling28,
//!     subject_filter: None,
//! };
//!
//! let outcome = UsagePipeline::new(&config, &transport)
//!     .run(&request, chrono::Utc::now())
//!     .await?;
//! println!("{}", outcome.written.narrative.display());
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod auth;
pub mod config;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod report;
pub mod transport;

pub use error::{MetricsError, MetricsResult};
pub use models::*;
pub use pipeline::UsagePipeline;
