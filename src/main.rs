// src/main.rs

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};

use iptax_workday::clock::SystemClock;
use iptax_workday::coverage::CoverageReport;
use iptax_workday::history::HistoryManager;
use iptax_workday::logging::init_tracing;
use iptax_workday::prompts::TerminalPrompter;
use iptax_workday::timing::DateRangeOverrides;
use iptax_workday::webdriver::WebDriverLauncher;
use iptax_workday::{AppPaths, DateRangeResolver, WorkdayClient, WorkdayConfig};

const MAX_MISSING_DAYS_SHOWN: usize = 5;

#[derive(Parser)]
#[command(name = "iptax-workday")]
#[command(about = "Report date ranges and Workday hours for the monthly IP-tax report", long_about = None)]
struct Cli {
    /// Debug logging for this crate (RUST_LOG wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Default)]
struct RangeArgs {
    /// YYYY-MM, "current" or "last"; auto-detected when omitted
    #[arg(long)]
    month: Option<String>,
    #[arg(long)]
    workday_start: Option<NaiveDate>,
    #[arg(long)]
    workday_end: Option<NaiveDate>,
    #[arg(long)]
    did_start: Option<NaiveDate>,
    #[arg(long)]
    did_end: Option<NaiveDate>,
}

impl RangeArgs {
    fn overrides(&self) -> DateRangeOverrides {
        DateRangeOverrides {
            workday_start: self.workday_start,
            workday_end: self.workday_end,
            did_start: self.did_start,
            did_end: self.did_end,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved Workday and did-range dates
    Dates {
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Collect the month's hours from Workday, or ask for them
    Hours {
        #[command(flatten)]
        range: RangeArgs,
        /// Fail instead of prompting when automation is unavailable
        #[arg(long)]
        non_interactive: bool,
        /// Show the browser window
        #[arg(long)]
        headed: bool,
    },
    /// List recorded report cutoffs, or record one
    History {
        /// Record this cutoff date for the resolved month
        #[arg(long)]
        record: Option<NaiveDate>,
        #[arg(long)]
        month: Option<String>,
    },
}

fn resolver(paths: &AppPaths) -> DateRangeResolver {
    DateRangeResolver::new(
        Arc::new(SystemClock),
        Arc::new(HistoryManager::new(paths.history_file())),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose).context("Setting tracing subscriber failed")?;

    let paths = AppPaths::from_env();
    info!("Using cache directory {}", paths.cache_dir().display());

    match cli.command {
        Commands::Dates { range } => {
            let ranges = resolver(&paths)
                .resolve_date_ranges(range.month.as_deref(), range.overrides())
                .context("Failed to resolve report date ranges")?;
            println!("Workday start: {}", ranges.workday_start);
            println!("Workday end:   {}", ranges.workday_end);
            println!("Did start:     {}", ranges.did_start);
            println!("Did end:       {}", ranges.did_end);
        }
        Commands::Hours {
            range,
            non_interactive,
            headed,
        } => {
            let ranges = resolver(&paths)
                .resolve_date_ranges(range.month.as_deref(), range.overrides())
                .context("Failed to resolve report date ranges")?;
            let config = WorkdayConfig::from_env().context("Invalid Workday configuration")?;
            let client = WorkdayClient::new(
                config.clone(),
                Arc::new(WebDriverLauncher::from_config(&config)),
                Arc::new(TerminalPrompter),
                paths.clone(),
            );

            let (start, end) = (ranges.workday_start, ranges.workday_end);
            let hours = client
                .get_work_hours(start, end, !non_interactive, !headed)
                .await
                .with_context(|| format!("Failed to get work hours for {} - {}", start, end))?;

            // Manual figures carry no entries to check
            if !hours.calendar_entries.is_empty() {
                let report = CoverageReport::check(&hours.calendar_entries, start, end);
                if !report.validated {
                    let shown: Vec<String> = report
                        .missing
                        .iter()
                        .take(MAX_MISSING_DAYS_SHOWN)
                        .map(|d| d.format("%a %Y-%m-%d").to_string())
                        .collect();
                    let more = report.missing.len().saturating_sub(MAX_MISSING_DAYS_SHOWN);
                    warn!("Workdays without Workday entries: {}", shown.join(", "));
                    println!("Missing entries: {}", shown.join(", "));
                    if more > 0 {
                        println!("... and {} more", more);
                    }
                }
            }

            println!("Period:        {} - {}", start, end);
            println!("Working days:  {}", hours.working_days);
            println!("Absence days:  {}", hours.absence_days);
            println!("Effective days: {}", hours.effective_days());
            println!("Total hours:   {:.1}", hours.total_hours);
        }
        Commands::History { record, month } => {
            let mut history = HistoryManager::new(paths.history_file());
            match record {
                Some(cutoff) => {
                    let month = resolver(&paths)
                        .resolve_month_spec(month.as_deref())
                        .context("Failed to resolve month")?;
                    history
                        .add_entry(&month.to_string(), cutoff)
                        .context("Failed to record history entry")?;
                    history.save().context("Failed to save history")?;
                    println!("Recorded cutoff {} for {}", cutoff, month);
                }
                None => {
                    let entries = history
                        .get_all_entries()
                        .context("Failed to load history")?;
                    if entries.is_empty() {
                        println!("No reports recorded yet.");
                    }
                    for (month, entry) in entries {
                        match entry.regenerated_at {
                            Some(again) => println!(
                                "{}  cutoff {}  generated {}  regenerated {}",
                                month,
                                entry.last_cutoff_date,
                                entry.generated_at.format("%Y-%m-%d %H:%M"),
                                again.format("%Y-%m-%d %H:%M")
                            ),
                            None => println!(
                                "{}  cutoff {}  generated {}",
                                month,
                                entry.last_cutoff_date,
                                entry.generated_at.format("%Y-%m-%d %H:%M")
                            ),
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
