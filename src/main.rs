use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{ArgGroup, Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod bucket;
mod chart;
mod models;
mod rating;
mod report;

use api::{ApiClient, ApiConfig, ViewScope};
use bucket::{CalendarZone, Granularity};
use chart::Series;
use models::{EventKind, LogSet, OwnerKind, OwnerRef};

const BASE_URL_ENV: &str = "TAMU_API_BASE_URL";

#[derive(Parser)]
#[command(name = "tamu-stats")]
#[command(
    about = "Visit, review and click statistics for Tamukinabalu vendors and markets",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print one event kind bucketed at a granularity
    Buckets {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, value_enum)]
        kind: EventKind,
        #[arg(long, value_enum, default_value_t = Granularity::Hour)]
        by: Granularity,
    },
    /// Print the review rating average and distribution
    Ratings {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Write one bucketed series to a CSV file
    Export {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, value_enum)]
        kind: EventKind,
        #[arg(long, value_enum, default_value_t = Granularity::Hour)]
        by: Granularity,
        #[arg(long, default_value = "series.csv")]
        out: PathBuf,
    },
    /// Generate a markdown statistics report
    Report {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("source")
        .args(["owner_id", "csv"])
        .required(true)
        .multiple(false)
))]
struct SourceArgs {
    #[arg(long, value_enum, default_value_t = OwnerKind::Vendor)]
    owner_type: OwnerKind,
    #[arg(long)]
    owner_id: Option<String>,
    /// Backend base URL; falls back to TAMU_API_BASE_URL
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
    /// Read event logs from a CSV export instead of the backend
    #[arg(long)]
    csv: Option<PathBuf>,
    /// Calendar for bucketing: local, utc or an offset like +08:00
    #[arg(long, default_value = "local")]
    tz: CalendarZone,
    #[arg(long)]
    since_days: Option<i64>,
}

struct Loaded {
    subject: String,
    cutoff: Option<DateTime<Utc>>,
    logs: LogSet,
}

fn api_config(source: &SourceArgs) -> anyhow::Result<ApiConfig> {
    let base_url = match &source.base_url {
        Some(url) => url.clone(),
        None => std::env::var(BASE_URL_ENV)
            .with_context(|| format!("{BASE_URL_ENV} must be set when --base-url is not given"))?,
    };
    ApiConfig::new(&base_url, Duration::from_secs(source.timeout_secs))
        .context("invalid backend base URL")
}

fn window_cutoff(since_days: i64) -> Option<DateTime<Utc>> {
    let cutoff = bucket::cutoff_time(since_days);
    if cutoff.is_none() {
        warn!(since_days, "window reaches past the earliest supported date, using all events");
    }
    cutoff
}

/// Series for one kind, or `None` when the window holds no events of it.
fn series_with_events(
    logs: &LogSet,
    kind: EventKind,
    by: Granularity,
    zone: CalendarZone,
) -> anyhow::Result<Option<Series>> {
    if let Some(reason) = logs.unavailable.get(&kind) {
        bail!("{} are unavailable: {reason}", kind.plural());
    }
    let series = report::kind_series(logs, kind, by, zone);
    Ok((series.total() > 0).then_some(series))
}

async fn load_logs(source: &SourceArgs, scope: &ViewScope) -> anyhow::Result<Option<Loaded>> {
    let (subject, mut logs) = match (&source.csv, &source.owner_id) {
        (Some(path), _) => {
            let logs = api::load_csv(path)
                .with_context(|| format!("failed to import {}", path.display()))?;
            (path.display().to_string(), logs)
        }
        (None, Some(id)) => {
            let owner = OwnerRef {
                kind: source.owner_type,
                id: id.clone(),
            };
            let client = ApiClient::new(api_config(source)?)
                .context("failed to build HTTP client")?;
            match api::fetch_log_set(&client, &scope.child(), &owner)
                .await
                .with_context(|| format!("failed to fetch event logs for {owner}"))?
            {
                Some(logs) => (owner.to_string(), logs),
                None => return Ok(None),
            }
        }
        (None, None) => bail!("either --owner-id or --csv is required"),
    };

    let cutoff = source.since_days.and_then(window_cutoff);
    if let Some(cutoff) = cutoff {
        logs.retain_since(cutoff);
    }

    Ok(Some(Loaded {
        subject,
        cutoff,
        logs,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tamu_stats=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let scope = ViewScope::new();
    let canceller = scope.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling pending requests");
            canceller.cancel();
        }
    });

    let source = match &cli.command {
        Commands::Buckets { source, .. }
        | Commands::Ratings { source }
        | Commands::Export { source, .. }
        | Commands::Report { source, .. } => source,
    };
    let Some(loaded) = load_logs(source, &scope).await? else {
        println!("Cancelled.");
        return Ok(());
    };
    let zone = source.tz;

    match &cli.command {
        Commands::Buckets { kind, by, .. } => {
            let Some(series) = series_with_events(&loaded.logs, *kind, *by, zone)? else {
                println!("No {} found for this window.", kind.plural());
                return Ok(());
            };

            println!(
                "{} for {} by {} ({}):",
                kind.plural(),
                loaded.subject,
                by,
                zone
            );
            for (label, count) in series.iter() {
                println!("- {label}: {count}");
            }
            if let Some((label, count)) = series.peak() {
                println!("Peak at {label} with {count}.");
            }
        }
        Commands::Ratings { .. } => {
            if let Some(reason) = loaded.logs.unavailable.get(&EventKind::Review) {
                bail!("reviews are unavailable: {reason}");
            }
            let summary = report::rating_summary(&loaded.logs);
            if summary.count == 0 {
                println!("No reviews found for this window.");
                return Ok(());
            }

            println!(
                "Average rating {:.2} across {} reviews for {}:",
                summary.average, summary.count, loaded.subject
            );
            for (star, count) in summary.distribution.iter().rev() {
                println!("- {star} stars: {count}");
            }
        }
        Commands::Export { kind, by, out, .. } => {
            let Some(series) = series_with_events(&loaded.logs, *kind, *by, zone)? else {
                println!("No {} found for this window; nothing written.", kind.plural());
                return Ok(());
            };
            let mut writer = csv::Writer::from_path(out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            report::write_series_csv(&mut writer, &series)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Wrote {} rows to {}.", series.len(), out.display());
        }
        Commands::Report { out, .. } => {
            let report = report::build_report(&loaded.subject, zone, loaded.cutoff, &loaded.logs);
            std::fs::write(out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::RawEventLog;

    fn visits_only() -> LogSet {
        let mut logs = LogSet::default();
        logs.absorb(
            EventKind::Visit,
            vec![RawEventLog {
                timestamp: Some("2024-01-01T08:00:00Z".to_string()),
                ..Default::default()
            }],
        );
        logs.mark_unavailable(EventKind::Click, "HTTP 500");
        logs
    }

    #[test]
    fn source_needs_exactly_one_of_owner_or_csv() {
        let owner = Cli::try_parse_from(["tamu-stats", "ratings", "--owner-id", "42"]);
        assert!(owner.is_ok());

        let csv = Cli::try_parse_from(["tamu-stats", "ratings", "--csv", "logs.csv"]);
        assert!(csv.is_ok());

        let both = Cli::try_parse_from([
            "tamu-stats",
            "ratings",
            "--owner-id",
            "42",
            "--csv",
            "logs.csv",
        ]);
        assert!(both.is_err());

        let neither = Cli::try_parse_from(["tamu-stats", "ratings"]);
        assert!(neither.is_err());
    }

    #[test]
    fn empty_kinds_have_no_series_at_any_granularity() {
        let logs = visits_only();
        for by in [
            Granularity::Hour,
            Granularity::Weekday,
            Granularity::Month,
            Granularity::Date,
            Granularity::Year,
        ] {
            let mentions =
                series_with_events(&logs, EventKind::Mention, by, CalendarZone::Utc).unwrap();
            assert!(mentions.is_none(), "{by}");

            let visits =
                series_with_events(&logs, EventKind::Visit, by, CalendarZone::Utc).unwrap();
            assert_eq!(visits.map(|series| series.total()), Some(1), "{by}");
        }
    }

    #[test]
    fn unavailable_kinds_are_errors() {
        let logs = visits_only();
        let err = series_with_events(&logs, EventKind::Click, Granularity::Hour, CalendarZone::Utc)
            .unwrap_err();
        assert!(err.to_string().contains("clicks are unavailable: HTTP 500"));
    }

    #[test]
    fn oversized_window_falls_back_to_all_events() {
        assert_eq!(window_cutoff(i64::MAX), None);
        assert!(window_cutoff(30).is_some());
    }
}
