//! Starting, stopping and resuming tracked blocks.
//!
//! Each command runs as one store transaction, so the block records and
//! the active pointer always change together.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::aggregate::clipped_duration;
use crate::error::{CoreError, ErrorCode, Result, UserError};
use crate::model::{
    duration_secs, entity_prefix, ActiveBlock, Block, Goal, GoalProgress, Project, Task,
};
use crate::repository::{
    active, config, get_or_insert, load, save, ActiveRepository, BlockRepo, GoalRepo,
};
use crate::storage::{KeyValueStore, Store, StoreError, Txn};

/// What `start` and `resume` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Started {
    pub block: Block,
    /// The block that was running before, now closed.
    pub stopped: Option<Block>,
    pub project_created: bool,
    pub task_created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub tracking: bool,
    pub block: Option<Block>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    pub previous: Option<Block>,
}

/// Changes to apply to a stored block. Unset fields stay as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockEdit {
    pub note: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

pub struct Tracker<'s> {
    store: &'s Store,
}

impl<'s> Tracker<'s> {
    pub fn new(store: &'s Store) -> Self {
        Self { store }
    }

    /// Start a block at `at`, creating the project and task on first use.
    /// A running block is closed at `at` first.
    pub fn start(&self, project_sid: &str, task_sid: Option<&str>, note: &str, at: DateTime<Utc>) -> Result<Started> {
        let project = Project::new(project_sid, "")?;
        let task = match task_sid.filter(|t| !t.is_empty()) {
            Some(sid) => Some(Task::new(project_sid, sid, "")?),
            None => None,
        };

        let started = self.store.transaction(|txn| {
            let config = config::load_or_init(txn)?;
            let (_, project_created) = get_or_insert(txn, project)?;
            let (task_sid, task_created) = match task {
                Some(task) => {
                    let (task, created) = get_or_insert(txn, task)?;
                    (task.sid, created)
                }
                None => (String::new(), false),
            };

            let current = active::load_or_init(txn)?;
            let stopped = close_running(txn, &current, at)?;

            let block = Block::new(config.user_key, project_sid, task_sid, note, at);
            save(txn, &block.key, &block)?;
            active::set_active_in(txn, &block.key)?;
            Ok::<_, CoreError>(Started {
                block,
                stopped,
                project_created,
                task_created,
            })
        })?;

        tracing::info!(
            key = %started.block.key,
            project = %started.block.project_sid,
            task = %started.block.task_sid,
            "started"
        );
        Ok(started)
    }

    /// Close the running block at `at` and go idle.
    pub fn stop(&self, at: DateTime<Utc>) -> Result<Block> {
        let stopped = self.store.transaction(|txn| {
            let current = active::load_or_init(txn)?;
            if !current.is_tracking() {
                return Ok(None);
            }
            let block = close_running(txn, &current, at)?;
            active::clear_active_in(txn)?;
            Ok::<_, CoreError>(block)
        })?;

        let block = stopped.ok_or_else(|| UserError::from_code(ErrorCode::NotTracking))?;
        tracing::info!(key = %block.key, "stopped");
        Ok(block)
    }

    /// Start a new block on the project and task of the previous block.
    pub fn resume(&self, at: DateTime<Utc>) -> Result<Started> {
        let blocks = BlockRepo::new(self.store);
        let active = ActiveRepository::new(self.store);
        if let Some(running) = active.get_active_block(&blocks)? {
            return Err(UserError::from_code(ErrorCode::AlreadyTracking)
                .with_detail(&running.project_sid)
                .into());
        }
        let previous = active
            .get_previous_block(&blocks)?
            .ok_or_else(|| UserError::from_code(ErrorCode::NothingToResume))?;
        self.start(&previous.project_sid, Some(previous.task_sid.as_str()), &previous.note, at)
    }

    pub fn status(&self, now: DateTime<Utc>) -> Result<Status> {
        let blocks = BlockRepo::new(self.store);
        let active = ActiveRepository::new(self.store);
        let block = active.get_active_block(&blocks)?;
        Ok(Status {
            tracking: block.is_some(),
            elapsed: block.as_ref().map_or(Duration::zero(), |b| b.duration_at(now)),
            block,
            previous: active.get_previous_block(&blocks)?,
        })
    }

    /// Apply `edit` to the block stored under `key`. Giving the running
    /// block an end time also stops tracking.
    pub fn edit_block(&self, key: &str, edit: BlockEdit) -> Result<Block> {
        ensure_block_key(key)?;
        self.store.transaction(|txn| {
            let mut block: Block = load(txn, key)?;
            if let Some(note) = edit.note {
                block.note = note;
            }
            if let Some(start) = edit.start {
                block.timestamp_start = start;
            }
            if let Some(end) = edit.end.or(block.timestamp_end) {
                block.close(end)?;
            }
            save(txn, &block.key, &block)?;

            if edit.end.is_some() && active::load_or_init(txn)?.active_block_key == block.key {
                active::clear_active_in(txn)?;
            }
            Ok::<_, CoreError>(block)
        })
    }

    /// Delete a block. Deleting the running block stops tracking.
    pub fn delete_block(&self, key: &str) -> Result<()> {
        ensure_block_key(key)?;
        self.store.transaction(|txn| {
            txn.delete(key)?;
            if active::load_or_init(txn)?.active_block_key == key {
                active::clear_active_in(txn)?;
            }
            Ok::<_, CoreError>(())
        })?;
        tracing::info!(key, "block deleted");
        Ok(())
    }

    /// The project's goal and progress, if `block` is what pushed the
    /// project over its target in the current period.
    pub fn goal_crossed(&self, block: &Block, now: DateTime<Utc>) -> Result<Option<(Goal, GoalProgress)>> {
        let Some((goal, progress)) =
            GoalRepo::new(self.store).progress_for_project(&block.project_sid, now)?
        else {
            return Ok(None);
        };
        let contributed = clipped_duration(std::slice::from_ref(block), goal.period_start(now), now, now);
        let before = progress.current - contributed;
        Ok((progress.is_complete && before < goal.target).then_some((goal, progress)))
    }
}

/// Keys outside the block namespace never name a block.
fn ensure_block_key(key: &str) -> Result<(), StoreError> {
    if key.starts_with(&entity_prefix::<Block>()) {
        Ok(())
    } else {
        Err(StoreError::NotFound { key: key.to_string() })
    }
}

/// Close the block `active` points at. A pointer to a deleted block is
/// reported and treated as idle.
fn close_running(txn: &Txn<'_>, active: &ActiveBlock, at: DateTime<Utc>) -> Result<Option<Block>> {
    if !active.is_tracking() {
        return Ok(None);
    }
    match load::<Block, _>(txn, &active.active_block_key) {
        Ok(mut block) => {
            if block.is_open() {
                block.close(at)?;
                save(txn, &block.key, &block)?;
            }
            Ok(Some(block))
        }
        Err(e) if e.is_not_found() => {
            tracing::warn!(key = %active.active_block_key, "active block is missing");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
