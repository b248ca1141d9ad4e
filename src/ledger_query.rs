use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use request_syncer::config::DEFAULT_DB_PATH;
use request_syncer::ledger::{LedgerStore, SqliteLedgerStore, TrackingStatus};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
#[command(name = "ledger-query", about = "Inspect the request-syncer ledger")]
struct CliArgs {
    /// Path to the SQLite ledger file.
    #[clap(long, value_parser = parse_path, default_value = DEFAULT_DB_PATH)]
    pub db_path: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Request and tracking counts (default).
    Stats,
    /// Most recent requests.
    Requests {
        #[clap(long, default_value_t = 50)]
        limit: usize,
    },
    /// Subscription links, with their last error.
    Links {
        #[clap(long, default_value_t = 50)]
        limit: usize,
        /// Only show links that carry an error.
        #[clap(long)]
        errors: bool,
    },
    /// Tracking records, optionally filtered by status.
    Tracking {
        #[clap(long)]
        status: Option<String>,
        #[clap(long, default_value_t = 100)]
        limit: usize,
    },
    /// Recent lifecycle events.
    Events {
        /// Only events for this source request id.
        #[clap(long)]
        request: Option<String>,
        #[clap(long, default_value_t = 50)]
        limit: usize,
    },
    /// Recent daily reports.
    Reports {
        #[clap(long, default_value_t = 7)]
        limit: usize,
    },
}

const ALL_TRACKING_STATUSES: [TrackingStatus; 7] = [
    TrackingStatus::Pending,
    TrackingStatus::Subscribed,
    TrackingStatus::Downloading,
    TrackingStatus::Downloaded,
    TrackingStatus::Transferred,
    TrackingStatus::Failed,
    TrackingStatus::ManualSearch,
];

fn format_ts(ts: Option<i64>) -> String {
    ts.and_then(|t| chrono::DateTime::from_timestamp(t, 0))
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| "-".to_string())
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    if !args.db_path.exists() {
        bail!("Ledger not found at {:?}", args.db_path);
    }
    let ledger = SqliteLedgerStore::new(&args.db_path)?;

    match args.command.unwrap_or(Command::Stats) {
        Command::Stats => {
            let stats = ledger.get_stats()?;
            let tracking = ledger.get_tracking_stats()?;
            println!("Requests");
            println!("  total:    {}", stats.total);
            println!("  pending:  {}", stats.pending);
            println!("  synced:   {}", stats.synced);
            println!("  failed:   {}", stats.failed);
            println!("Tracking");
            println!("  subscribed:  {}", tracking.subscribed);
            println!("  downloading: {}", tracking.downloading);
            println!("  downloaded:  {}", tracking.downloaded);
            println!("  transferred: {}", tracking.transferred);
            println!("  failed:      {}", tracking.failed);
        }
        Command::Requests { limit } => {
            for r in ledger.list_requests(limit)? {
                let seasons = if r.seasons.is_empty() {
                    String::new()
                } else {
                    format!(
                        " seasons={}",
                        r.seasons
                            .iter()
                            .map(|s| s.to_string())
                            .collect::<Vec<_>>()
                            .join(",")
                    )
                };
                println!(
                    "{:>8}  {:<10} {:<5} tmdb={:<8} {}{}  (updated {})",
                    r.source_request_id,
                    r.status.as_str(),
                    r.media_kind.as_str(),
                    r.tmdb_id,
                    r.title,
                    seasons,
                    format_ts(Some(r.updated_at))
                );
            }
        }
        Command::Links { limit, errors } => {
            for link in ledger.list_links(limit)? {
                if errors && link.last_error.is_none() {
                    continue;
                }
                println!(
                    "{:>8}  {:<10} sub={:<8} retries={}  (updated {})",
                    link.source_request_id,
                    link.state.as_str(),
                    if link.backend_subscription_id.is_empty() {
                        "-"
                    } else {
                        &link.backend_subscription_id
                    },
                    link.retry_count,
                    format_ts(Some(link.updated_at))
                );
                if let Some(error) = &link.last_error {
                    println!("          error: {}", error);
                }
            }
        }
        Command::Tracking { status, limit } => {
            let statuses = match status {
                Some(s) => match TrackingStatus::from_str(&s) {
                    Some(status) => vec![status],
                    None => bail!("Unknown tracking status: {}", s),
                },
                None => ALL_TRACKING_STATUSES.to_vec(),
            };
            for t in ledger.list_tracking_by_status(&statuses, limit)? {
                println!(
                    "{:>8}  {:<12} {:<5} tmdb={:<8} {}",
                    t.source_request_id,
                    t.status.as_str(),
                    t.media_kind.as_str(),
                    t.tmdb_id,
                    t.title
                );
                println!(
                    "          subscribed {} | download {} | transfer {}",
                    format_ts(t.subscribe_time),
                    format_ts(t.download_start_time),
                    format_ts(t.transfer_time)
                );
                if let Some(error) = &t.error_message {
                    println!("          error: {}", error);
                }
            }
        }
        Command::Events { request, limit } => {
            for e in ledger.list_events(request.as_deref(), limit)? {
                println!(
                    "{:>6}  {}  {:>8}  {:<18} {}",
                    e.id,
                    format_ts(Some(e.created_at)),
                    e.source_request_id,
                    e.kind.as_str(),
                    e.data
                );
            }
        }
        Command::Reports { limit } => {
            for report in ledger.list_recent_reports(limit)? {
                println!("===== {} =====", report.report_date);
                println!("{}", report.content);
                println!();
            }
        }
    }
    Ok(())
}
