use chrono::{DateTime, Utc};

use super::Repository;
use crate::error::Result;
use crate::model::{Block, BlockFilter};

impl Repository<'_, Block> {
    /// Blocks matching every set field of `filter`, newest start first,
    /// truncated to `filter.limit` when it is non-zero.
    pub fn list_filtered(&self, filter: &BlockFilter) -> Result<Vec<Block>> {
        let mut blocks: Vec<Block> = self
            .list()?
            .into_iter()
            .filter(|b| filter.matches(b))
            .collect();
        sort_newest_first(&mut blocks);
        if filter.limit > 0 {
            blocks.truncate(filter.limit);
        }
        Ok(blocks)
    }

    pub fn list_by_project(&self, project_sid: &str) -> Result<Vec<Block>> {
        self.list_filtered(&BlockFilter::new().project(project_sid))
    }

    pub fn list_by_project_and_task(&self, project_sid: &str, task_sid: &str) -> Result<Vec<Block>> {
        self.list_filtered(&BlockFilter::new().project(project_sid).task(task_sid))
    }

    /// Blocks overlapping `[from, to]`. Open blocks run until the current time.
    pub fn list_by_time_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Block>> {
        self.list_by_time_range_at(from, to, Utc::now())
    }

    /// As [`Repository::list_by_time_range`], with open blocks running until `now`.
    pub fn list_by_time_range_at(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Block>> {
        let mut blocks: Vec<Block> = self
            .list()?
            .into_iter()
            .filter(|b| b.intersects(from, to, now))
            .collect();
        sort_newest_first(&mut blocks);
        Ok(blocks)
    }

    /// Blocks without an end time.
    pub fn list_open(&self) -> Result<Vec<Block>> {
        let mut blocks: Vec<Block> = self.list()?.into_iter().filter(Block::is_open).collect();
        sort_newest_first(&mut blocks);
        Ok(blocks)
    }
}

fn sort_newest_first(blocks: &mut [Block]) {
    // Keys embed creation time, so sorting by key first makes ties deterministic.
    blocks.sort_by(|a, b| a.key.cmp(&b.key));
    blocks.sort_by(|a, b| b.timestamp_start.cmp(&a.timestamp_start));
}
