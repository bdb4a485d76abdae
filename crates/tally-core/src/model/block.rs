use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Entity;
use crate::error::{ErrorCode, UserError};

/// One tracked interval. An open block has no end yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub key: String,
    /// User key of the owning installation (see [`super::Config`]).
    pub owner_key: String,
    pub project_sid: String,
    #[serde(default)]
    pub task_sid: String,
    #[serde(default)]
    pub note: String,
    pub timestamp_start: DateTime<Utc>,
    #[serde(default)]
    pub timestamp_end: Option<DateTime<Utc>>,
}

impl Entity for Block {
    const PREFIX: &'static str = "block";
    const UNIQUE: bool = false;

    fn key(&self) -> &str {
        &self.key
    }
}

impl Block {
    /// Create an open block starting at `start` with a fresh key.
    pub fn new(
        owner_key: impl Into<String>,
        project_sid: impl Into<String>,
        task_sid: impl Into<String>,
        note: impl Into<String>,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            key: Self::generate_key(Utc::now()),
            owner_key: owner_key.into(),
            project_sid: project_sid.into(),
            task_sid: task_sid.into(),
            note: note.into(),
            timestamp_start: start,
            timestamp_end: None,
        }
    }

    /// `block:<millis>-<random>`: sortable by creation time, unique per call.
    pub fn generate_key(now: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("block:{:013}-{}", now.timestamp_millis().max(0), &suffix[..12])
    }

    /// Natural id (the key without the `block:` prefix).
    pub fn id(&self) -> &str {
        self.key.strip_prefix("block:").unwrap_or(&self.key)
    }

    pub fn is_open(&self) -> bool {
        self.timestamp_end.is_none()
    }

    /// End time, or `now` for an open block.
    pub fn end_or(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.timestamp_end.unwrap_or(now)
    }

    /// Length of the block, measuring open blocks up to `now`. Never negative.
    pub fn duration_at(&self, now: DateTime<Utc>) -> Duration {
        (self.end_or(now) - self.timestamp_start).max(Duration::zero())
    }

    /// Whether the block overlaps `[from, to]`, open blocks extending to `now`.
    pub fn intersects(&self, from: DateTime<Utc>, to: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.timestamp_start <= to && self.end_or(now) >= from
    }

    /// Set the end time. The end may not precede the start.
    pub fn close(&mut self, end: DateTime<Utc>) -> Result<(), UserError> {
        check_range(self.timestamp_start, end)?;
        self.timestamp_end = Some(end);
        Ok(())
    }

    /// Move the start time, keeping `end >= start` for closed blocks.
    pub fn set_start(&mut self, start: DateTime<Utc>) -> Result<(), UserError> {
        if let Some(end) = self.timestamp_end {
            check_range(start, end)?;
        }
        self.timestamp_start = start;
        Ok(())
    }
}

fn check_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), UserError> {
    if end < start {
        return Err(UserError::from_code(ErrorCode::InvalidTimeRange)
            .with_detail(format!("{} is before {}", end.to_rfc3339(), start.to_rfc3339()))
            .with_field("end", end.to_rfc3339()));
    }
    Ok(())
}

/// Filter for block listings. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockFilter {
    pub project_sid: Option<String>,
    pub task_sid: Option<String>,
    /// Keep blocks starting at or after this instant.
    pub start_after: Option<DateTime<Utc>>,
    /// Keep at most this many blocks; zero means no limit.
    pub limit: usize,
}

impl BlockFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(mut self, sid: impl Into<String>) -> Self {
        self.project_sid = Some(sid.into());
        self
    }

    pub fn task(mut self, sid: impl Into<String>) -> Self {
        self.task_sid = Some(sid.into());
        self
    }

    pub fn start_after(mut self, at: DateTime<Utc>) -> Self {
        self.start_after = Some(at);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, block: &Block) -> bool {
        let wanted = |want: &Option<String>, have: &str| match want.as_deref() {
            None | Some("") => true,
            Some(w) => w == have,
        };
        wanted(&self.project_sid, &block.project_sid)
            && wanted(&self.task_sid, &block.task_sid)
            && self.start_after.map_or(true, |t| block.timestamp_start >= t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_at(start: DateTime<Utc>) -> Block {
        Block::new("owner", "web", "design", "", start)
    }

    #[test]
    fn generated_keys_are_unique_and_prefixed() {
        let now = Utc::now();
        let a = Block::generate_key(now);
        let b = Block::generate_key(now);
        assert_ne!(a, b);
        assert!(a.starts_with("block:"));
    }

    #[test]
    fn open_block_measures_to_now() {
        let now = Utc::now();
        let block = block_at(now - Duration::minutes(30));
        assert!(block.is_open());
        assert_eq!(block.duration_at(now), Duration::minutes(30));
    }

    #[test]
    fn close_rejects_end_before_start() {
        let now = Utc::now();
        let mut block = block_at(now);
        let err = block.close(now - Duration::seconds(1)).unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::InvalidTimeRange));
        assert!(block.is_open());

        block.close(now).unwrap();
        assert_eq!(block.timestamp_end, Some(now));
    }

    #[test]
    fn set_start_keeps_range_valid() {
        let now = Utc::now();
        let mut block = block_at(now - Duration::hours(1));
        block.close(now).unwrap();
        assert!(block.set_start(now + Duration::minutes(1)).is_err());
        block.set_start(now - Duration::hours(2)).unwrap();
        assert_eq!(block.duration_at(now), Duration::hours(2));
    }

    #[test]
    fn intersection_treats_open_blocks_as_running() {
        let now = Utc::now();
        let open = block_at(now - Duration::hours(3));
        assert!(open.intersects(now - Duration::minutes(5), now, now));

        let mut closed = block_at(now - Duration::hours(3));
        closed.close(now - Duration::hours(2)).unwrap();
        assert!(!closed.intersects(now - Duration::hours(1), now, now));
        assert!(closed.intersects(now - Duration::hours(2), now, now));
    }

    #[test]
    fn filter_start_after_is_inclusive() {
        let now = Utc::now();
        let block = block_at(now);
        assert!(BlockFilter::new().start_after(now).matches(&block));
        assert!(!BlockFilter::new()
            .start_after(now + Duration::seconds(1))
            .matches(&block));
        assert!(BlockFilter::new().project("").matches(&block));
        assert!(!BlockFilter::new().project("web").task("other").matches(&block));
    }
}
