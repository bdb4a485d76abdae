//! Duration rollups over block listings.
//!
//! All functions are pure apart from reading the clock for open blocks in
//! the variants without an explicit `now`.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::model::{duration_secs, Block};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    pub project_sid: String,
    pub block_count: usize,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub project_sid: String,
    pub task_sid: String,
    pub block_count: usize,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

/// Sum of block lengths, open blocks measured up to the current time.
pub fn total_duration(blocks: &[Block]) -> Duration {
    total_duration_at(blocks, Utc::now())
}

pub fn total_duration_at(blocks: &[Block], now: DateTime<Utc>) -> Duration {
    blocks
        .iter()
        .fold(Duration::zero(), |acc, b| acc + b.duration_at(now))
}

/// Sum of the parts of each block that fall inside `[from, to]`.
pub fn clipped_duration(
    blocks: &[Block],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Duration {
    blocks.iter().fold(Duration::zero(), |acc, b| {
        let start = b.timestamp_start.max(from);
        let end = b.end_or(now).min(to);
        acc + (end - start).max(Duration::zero())
    })
}

pub fn aggregate_by_project(blocks: &[Block]) -> Vec<ProjectSummary> {
    aggregate_by_project_at(blocks, Utc::now())
}

/// Per-project totals, longest first. Equal totals keep the order in which
/// each project first appears in `blocks`.
pub fn aggregate_by_project_at(blocks: &[Block], now: DateTime<Utc>) -> Vec<ProjectSummary> {
    let mut summaries: Vec<ProjectSummary> = Vec::new();
    for block in blocks {
        let duration = block.duration_at(now);
        match summaries.iter_mut().find(|s| s.project_sid == block.project_sid) {
            Some(summary) => {
                summary.block_count += 1;
                summary.duration = summary.duration + duration;
            }
            None => summaries.push(ProjectSummary {
                project_sid: block.project_sid.clone(),
                block_count: 1,
                duration,
            }),
        }
    }
    summaries.sort_by(|a, b| b.duration.cmp(&a.duration));
    summaries
}

pub fn aggregate_by_task(blocks: &[Block]) -> Vec<TaskSummary> {
    aggregate_by_task_at(blocks, Utc::now())
}

/// Per-task totals keyed by `(project, task)`, ordered like
/// [`aggregate_by_project_at`].
pub fn aggregate_by_task_at(blocks: &[Block], now: DateTime<Utc>) -> Vec<TaskSummary> {
    let mut summaries: Vec<TaskSummary> = Vec::new();
    for block in blocks {
        let duration = block.duration_at(now);
        let existing = summaries
            .iter_mut()
            .find(|s| s.project_sid == block.project_sid && s.task_sid == block.task_sid);
        match existing {
            Some(summary) => {
                summary.block_count += 1;
                summary.duration = summary.duration + duration;
            }
            None => summaries.push(TaskSummary {
                project_sid: block.project_sid.clone(),
                task_sid: block.task_sid.clone(),
                block_count: 1,
                duration,
            }),
        }
    }
    summaries.sort_by(|a, b| b.duration.cmp(&a.duration));
    summaries
}
