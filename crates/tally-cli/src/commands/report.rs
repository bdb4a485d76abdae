//! Time report over tracked blocks.

use chrono::{DateTime, Duration, Utc};
use clap::Args;
use serde::Serialize;
use tally_core::aggregate::{aggregate_by_project_at, aggregate_by_task_at, total_duration_at};
use tally_core::{BlockFilter, BlockRepo, Settings};

use super::{open_store, parse_time, print_json, time_or_now, CmdResult};

#[derive(Args)]
pub struct ReportArgs {
    /// Only blocks of this project
    #[arg(long)]
    pub project: Option<String>,
    /// Only blocks overlapping the range starting here (RFC 3339)
    #[arg(long)]
    pub since: Option<String>,
    /// End of the range (RFC 3339), defaults to now
    #[arg(long, requires = "since")]
    pub until: Option<String>,
    /// Break totals down by task instead of project
    #[arg(long)]
    pub by_task: bool,
}

#[derive(Serialize)]
struct Report<T> {
    from: Option<DateTime<Utc>>,
    to: DateTime<Utc>,
    block_count: usize,
    total_secs: i64,
    summaries: Vec<T>,
}

impl<T> Report<T> {
    fn new(from: Option<DateTime<Utc>>, to: DateTime<Utc>, block_count: usize, total: Duration, summaries: Vec<T>) -> Self {
        Self {
            from,
            to,
            block_count,
            total_secs: total.num_seconds(),
            summaries,
        }
    }
}

pub fn run(args: ReportArgs, settings: &Settings) -> CmdResult {
    let now = Utc::now();
    let to = time_or_now("until", args.until.as_deref())?;
    let from = args.since.as_deref().map(|s| parse_time("since", s)).transpose()?;

    let store = open_store(settings)?;
    let repo = BlockRepo::new(&store);
    let mut blocks = match from {
        Some(from) => repo.list_by_time_range_at(from, to, now)?,
        None => repo.list_filtered(&BlockFilter::new())?,
    };
    if let Some(project) = &args.project {
        blocks.retain(|b| &b.project_sid == project);
    }

    let total = total_duration_at(&blocks, now);
    if args.by_task {
        print_json(&Report::new(from, to, blocks.len(), total, aggregate_by_task_at(&blocks, now)))
    } else {
        print_json(&Report::new(from, to, blocks.len(), total, aggregate_by_project_at(&blocks, now)))
    }
}
