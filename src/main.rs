use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use copilot_metrics::config::Config;
use copilot_metrics::fetch::{Granularity, ReportRequest, ReportScope};
use copilot_metrics::logging::init_logging;
use copilot_metrics::models::{parse_date, DateWindow};
use copilot_metrics::pipeline::{RunOutcome, UsagePipeline};
use copilot_metrics::transport::HttpTransport;
use copilot_metrics::MetricsError;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "copilot-metrics")]
#[command(about = "Collect GitHub Copilot usage metrics as a GitHub App")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory the reports are written to
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
    /// GitHub API base URL (GitHub Enterprise Server)
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Print the run summary as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct WindowArgs {
    /// Single report day (YYYY-MM-DD)
    #[arg(long, conflicts_with_all = ["since", "until", "rolling"])]
    day: Option<String>,
    /// Range start date (YYYY-MM-DD)
    #[arg(long, requires = "until")]
    since: Option<String>,
    /// Range end date (YYYY-MM-DD)
    #[arg(long, requires = "since")]
    until: Option<String>,
    /// Use the rolling 28-day report (default when no date is given)
    #[arg(long)]
    rolling: bool,
    /// Query the legacy usage summary endpoint for the range
    #[arg(long, requires = "since")]
    legacy: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Organization-wide metrics
    Org {
        /// Organization login (defaults to the configured organization)
        #[arg(long)]
        org: Option<String>,
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Enterprise-wide metrics
    Enterprise {
        /// Enterprise slug (defaults to the configured enterprise)
        #[arg(long)]
        enterprise: Option<String>,
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Per-user metrics across an enterprise
    Users {
        #[arg(long)]
        enterprise: Option<String>,
        /// Only report this user
        #[arg(long)]
        user: Option<String>,
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Team usage summary (legacy endpoint; defaults to the last 28 days)
    Team {
        #[arg(long)]
        org: Option<String>,
        /// Team slug
        #[arg(long)]
        team: String,
        #[arg(long, requires = "until")]
        since: Option<String>,
        #[arg(long, requires = "since")]
        until: Option<String>,
    },
}

fn granularity(window: &WindowArgs) -> Result<Granularity, MetricsError> {
    if let Some(day) = &window.day {
        return Ok(Granularity::Day(parse_date(day)?));
    }
    match (&window.since, &window.until) {
        (Some(since), Some(until)) => {
            let range = DateWindow::new(parse_date(since)?, parse_date(until)?)?;
            if window.legacy {
                Ok(Granularity::Legacy(range))
            } else {
                Ok(Granularity::Range(range))
            }
        }
        _ => Ok(Granularity::Rolling28),
    }
}

/// Trailing 28 complete days.
fn default_legacy_window(today: NaiveDate) -> DateWindow {
    DateWindow {
        start: today - Duration::days(28),
        end: today - Duration::days(1),
    }
}

fn required(value: Option<String>, fallback: &Option<String>, what: &str) -> Result<String, MetricsError> {
    value
        .or_else(|| fallback.clone())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| MetricsError::Config(format!("{} is not set", what)))
}

fn build_request(command: Commands, config: &Config) -> Result<ReportRequest, MetricsError> {
    let github = &config.github;
    match command {
        Commands::Org { org, window } => Ok(ReportRequest {
            scope: ReportScope::Organization {
                org: required(org, &github.organization, "organization")?,
            },
            granularity: granularity(&window)?,
            subject_filter: None,
        }),
        Commands::Enterprise { enterprise, window } => Ok(ReportRequest {
            scope: ReportScope::Enterprise {
                enterprise: required(enterprise, &github.enterprise, "enterprise")?,
            },
            granularity: granularity(&window)?,
            subject_filter: None,
        }),
        Commands::Users {
            enterprise,
            user,
            window,
        } => Ok(ReportRequest {
            scope: ReportScope::EnterpriseUsers {
                enterprise: required(enterprise, &github.enterprise, "enterprise")?,
            },
            granularity: granularity(&window)?,
            subject_filter: user,
        }),
        Commands::Team {
            org,
            team,
            since,
            until,
        } => {
            let range = match (since, until) {
                (Some(since), Some(until)) => DateWindow::new(parse_date(&since)?, parse_date(&until)?)?,
                _ => default_legacy_window(Utc::now().date_naive()),
            };
            Ok(ReportRequest {
                scope: ReportScope::Team {
                    org: required(org, &github.organization, "organization")?,
                    team,
                },
                granularity: Granularity::Legacy(range),
                subject_filter: None,
            })
        }
    }
}

fn print_outcome(outcome: &RunOutcome, json: bool) -> Result<()> {
    let snapshot = &outcome.snapshot;
    if json {
        let summary = serde_json::json!({
            "runId": outcome.run_id.to_string(),
            "records": snapshot.record_count,
            "gaps": snapshot.gaps,
            "totals": snapshot.totals,
            "acceptanceRate": snapshot.acceptance_rate,
            "files": outcome.written,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "{} {} records, acceptance rate {}",
        "✅".green(),
        snapshot.record_count.to_string().bold(),
        format!("{:.2}%", snapshot.acceptance_rate).cyan()
    );
    if !snapshot.gaps.is_empty() {
        println!(
            "{} {} date(s) without data",
            "⚠️".yellow(),
            snapshot.gaps.len()
        );
    }
    println!("   {}", outcome.written.records.display());
    println!("   {}", outcome.written.table.display());
    println!("   {}", outcome.written.narrative.display());
    Ok(())
}

async fn run(cli: Cli) -> Result<RunOutcome> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = cli.output_dir {
        config.output.directory = dir;
    }
    if let Some(url) = cli.api_url {
        config.github.api_base_url = url;
    }

    let _guard = init_logging(&config.logging);

    let request = build_request(cli.command, &config)?;
    let transport = HttpTransport::new(config.fetch.timeout())?;
    let outcome = UsagePipeline::new(&config, &transport)
        .run(&request, Utc::now())
        .await?;
    Ok(outcome)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let json = cli.json;

    match run(cli).await {
        Ok(outcome) => print_outcome(&outcome, json),
        Err(e) => handle_error(e, json),
    }
}

fn handle_error(e: anyhow::Error, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::json!({ "error": format!("{:#}", e) }));
    } else {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
    }
    process::exit(1);
}
