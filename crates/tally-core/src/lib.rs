//! # Tally Core Library
//!
//! This library provides the persistence and state core of the Tally time
//! tracker. The `tally` CLI is a thin layer over it; a background scheduler
//! can share the same data directory.
//!
//! ## Architecture
//!
//! - **Storage**: an embedded SQLite key/value table with a free-space guard,
//!   plus TOML-based settings
//! - **Repositories**: typed CRUD and queries for blocks, projects, tasks,
//!   goals and the two singleton records, all on top of the key/value store
//! - **Tracking**: the active/previous block state machine and the
//!   start/stop/resume commands built on it
//! - **Notifications**: signed webhook payloads and a durable retry queue
//!
//! ## Key Components
//!
//! - [`Store`]: Key/value persistence
//! - [`Repository`]: Generic entity CRUD
//! - [`ActiveRepository`]: Single-active-block state machine
//! - [`Tracker`]: Tracking commands
//! - [`RetryQueue`]: Notification redelivery
//! - [`classify`]: Error categories and user-facing messages

pub mod aggregate;
pub mod classify;
pub mod error;
pub mod model;
pub mod notify;
pub mod repository;
pub mod storage;
pub mod tracking;

pub use aggregate::{
    aggregate_by_project, aggregate_by_task, total_duration, ProjectSummary, TaskSummary,
};
pub use classify::{describe, get_category, is_retryable, UserMessage};
pub use error::{CoreError, ErrorCategory, ErrorCode, Result, UserError};
pub use model::{ActiveBlock, Block, BlockFilter, Config, Goal, GoalProgress, GoalType, Project, Task};
pub use notify::{RetryPolicy, RetryQueue, Transport, WebhookPayload, WebhookTransport};
pub use repository::{
    ActiveRepository, BlockRepo, ConfigRepository, GoalRepo, ProjectRepo, Repository, TaskRepo,
};
pub use storage::{KeyValueStore, OpenOptions, Settings, Store, StoreError};
pub use tracking::{BlockEdit, Started, Status, Tracker};
