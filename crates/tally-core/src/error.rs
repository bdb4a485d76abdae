//! Core error types for tally-core.
//!
//! Errors are grouped into a small set of categories (see [`ErrorCategory`])
//! that drive two decisions: whether a failed notification delivery is
//! retried, and how a failure is presented to the user. [`CoreError`] is the
//! tagged variant returned by every fallible core operation; each variant
//! owns the next link of its cause chain.

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::notify::DeliveryError;
use crate::storage::{SettingsError, StoreError};

/// Boxed cause used by the error types that wrap an arbitrary failure.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Nothing more specific could be derived.
    Unknown,
    /// The user asked for something invalid; fixable by changing the input.
    User,
    /// The environment failed (disk, permissions, filesystem).
    System,
    /// A transient failure that may succeed when tried again.
    Recoverable,
    /// A bug or corrupted data inside tally itself.
    Internal,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Unknown => "unknown",
            ErrorCategory::User => "user",
            ErrorCategory::System => "system",
            ErrorCategory::Recoverable => "recoverable",
            ErrorCategory::Internal => "internal",
        }
    }

    /// Process exit code used by the CLI for this category.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorCategory::Unknown => 1,
            ErrorCategory::User => 2,
            ErrorCategory::System => 3,
            ErrorCategory::Recoverable => 4,
            ErrorCategory::Internal => 70,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identifiers for user-facing failures.
///
/// Each code maps to a fixed [`ErrorInfo`] entry; lookups never depend on
/// the identity of an error value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidSid,
    ProjectExists,
    TaskExists,
    GoalExists,
    RecordExists,
    RecordNotFound,
    NotTracking,
    AlreadyTracking,
    NothingToResume,
    InvalidTimeRange,
    InvalidTimestamp,
    InvalidTarget,
    UnknownSetting,
    InvalidSetting,
    InvalidWebhookUrl,
    WebhookRejected,
}

/// Message template for an [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: &'static str,
    pub message: &'static str,
    pub suggestion: &'static str,
    pub examples: &'static [&'static str],
}

impl ErrorCode {
    pub fn info(self) -> &'static ErrorInfo {
        match self {
            ErrorCode::InvalidSid => &ErrorInfo {
                code: "invalid_sid",
                message: "invalid identifier",
                suggestion: "Identifiers must be non-empty and cannot contain ':' or whitespace.",
                examples: &["tally project add website", "tally task add website design"],
            },
            ErrorCode::ProjectExists => &ErrorInfo {
                code: "project_exists",
                message: "a project with this identifier already exists",
                suggestion: "Pick a different identifier or reuse the existing project.",
                examples: &["tally project list"],
            },
            ErrorCode::TaskExists => &ErrorInfo {
                code: "task_exists",
                message: "a task with this identifier already exists in the project",
                suggestion: "Pick a different task identifier within the project.",
                examples: &["tally task list website"],
            },
            ErrorCode::GoalExists => &ErrorInfo {
                code: "goal_exists",
                message: "the project already has a goal",
                suggestion: "Use `goal set` to replace the existing goal.",
                examples: &["tally goal set website --daily --minutes 120"],
            },
            ErrorCode::RecordExists => &ErrorInfo {
                code: "record_exists",
                message: "a record with this key already exists",
                suggestion: "Fetch the existing record instead of creating it again.",
                examples: &[],
            },
            ErrorCode::RecordNotFound => &ErrorInfo {
                code: "record_not_found",
                message: "no such record",
                suggestion: "Check the identifier; list commands show what exists.",
                examples: &["tally project list", "tally block list --limit 10"],
            },
            ErrorCode::NotTracking => &ErrorInfo {
                code: "not_tracking",
                message: "no time is being tracked",
                suggestion: "Start tracking first.",
                examples: &["tally start website design"],
            },
            ErrorCode::AlreadyTracking => &ErrorInfo {
                code: "already_tracking",
                message: "time is already being tracked",
                suggestion: "Stop the running block first, or start a new one directly.",
                examples: &["tally stop", "tally start website review"],
            },
            ErrorCode::NothingToResume => &ErrorInfo {
                code: "nothing_to_resume",
                message: "there is no previous block to resume",
                suggestion: "Start a new block instead.",
                examples: &["tally start website design"],
            },
            ErrorCode::InvalidTimeRange => &ErrorInfo {
                code: "invalid_time_range",
                message: "a block cannot end before it starts",
                suggestion: "Use an end time at or after the block's start time.",
                examples: &["tally stop --at 2024-05-01T17:30:00Z"],
            },
            ErrorCode::InvalidTimestamp => &ErrorInfo {
                code: "invalid_timestamp",
                message: "could not read the timestamp",
                suggestion: "Timestamps use RFC 3339.",
                examples: &["2024-05-01T09:00:00Z", "2024-05-01T09:00:00+02:00"],
            },
            ErrorCode::InvalidTarget => &ErrorInfo {
                code: "invalid_target",
                message: "goal target must be a positive duration",
                suggestion: "Give the target in minutes, greater than zero.",
                examples: &["tally goal set website --weekly --minutes 600"],
            },
            ErrorCode::UnknownSetting => &ErrorInfo {
                code: "unknown_setting",
                message: "unknown configuration key",
                suggestion: "List the available keys with `config list`.",
                examples: &["tally config list", "tally config get notifications.max_attempts"],
            },
            ErrorCode::InvalidSetting => &ErrorInfo {
                code: "invalid_setting",
                message: "invalid configuration value",
                suggestion: "Check the value's type against `config list`.",
                examples: &["tally config set notifications.max_attempts 5"],
            },
            ErrorCode::InvalidWebhookUrl => &ErrorInfo {
                code: "invalid_webhook_url",
                message: "webhook URL must be an absolute http or https URL",
                suggestion: "Set a full URL including the scheme.",
                examples: &["tally config set notifications.webhook_url https://example.com/hook"],
            },
            ErrorCode::WebhookRejected => &ErrorInfo {
                code: "webhook_rejected",
                message: "the webhook endpoint rejected the notification",
                suggestion: "Check the endpoint URL and secret in the configuration.",
                examples: &["tally config get notifications.webhook_url"],
            },
        }
    }
}

/// A failure caused by user input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct UserError {
    pub code: Option<ErrorCode>,
    pub message: String,
    pub suggestion: Option<String>,
    /// The offending input field, if one can be named.
    pub field: Option<String>,
    /// The offending value as the user typed it.
    pub value: Option<String>,
}

impl UserError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            suggestion: None,
            field: None,
            value: None,
        }
    }

    /// Build an error from the code table, with its message and suggestion.
    pub fn from_code(code: ErrorCode) -> Self {
        let info = code.info();
        Self {
            code: Some(code),
            message: info.message.to_string(),
            suggestion: Some(info.suggestion.to_string()),
            field: None,
            value: None,
        }
    }

    /// Append detail to the message (`"<message>: <detail>"`).
    pub fn with_detail(mut self, detail: impl fmt::Display) -> Self {
        self.message = format!("{}: {detail}", self.message);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self.value = Some(value.into());
        self
    }

    /// Example invocations from the code table, empty for uncoded errors.
    pub fn examples(&self) -> &'static [&'static str] {
        self.code.map(|c| c.info().examples).unwrap_or(&[])
    }
}

/// The environment failed while performing `operation`.
#[derive(Debug, Error)]
#[error("{operation} failed: {source}")]
pub struct SystemError {
    pub operation: String,
    #[source]
    pub source: BoxError,
}

impl SystemError {
    pub fn new(operation: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            operation: operation.into(),
            source: source.into(),
        }
    }
}

/// A transient failure that knows how often it has been tried.
#[derive(Debug, Error)]
#[error("{message} (attempt {attempt} of {max_attempts})")]
pub struct RecoverableError {
    pub message: String,
    pub attempt: u32,
    pub max_attempts: u32,
    #[source]
    pub source: Option<BoxError>,
}

impl RecoverableError {
    pub fn new(message: impl Into<String>, attempt: u32, max_attempts: u32) -> Self {
        Self {
            message: message.into(),
            attempt,
            max_attempts,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

/// Opt-in wrapper that pins an explicit category onto any error.
///
/// [`crate::classify::get_category`] prefers this over re-deriving a
/// category from the wrapped cause.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct Categorized {
    pub category: ErrorCategory,
    #[source]
    pub source: BoxError,
}

impl Categorized {
    pub fn new(category: ErrorCategory, source: impl Into<BoxError>) -> Self {
        Self {
            category,
            source: source.into(),
        }
    }
}

/// Core error type for tally-core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    User(#[from] UserError),

    #[error(transparent)]
    System(#[from] SystemError),

    #[error(transparent)]
    Recoverable(#[from] RecoverableError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Categorized(#[from] Categorized),
}

impl CoreError {
    /// The wrapped error. Transparent variants forward `source()` to the
    /// inner error's cause, so chain walkers step through this first.
    pub fn inner(&self) -> &(dyn StdError + 'static) {
        match self {
            CoreError::User(e) => e,
            CoreError::System(e) => e,
            CoreError::Recoverable(e) => e,
            CoreError::Store(e) => e,
            CoreError::Delivery(e) => e,
            CoreError::Settings(e) => e,
            CoreError::Categorized(e) => e,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        crate::classify::get_category(Some(self))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::Store(e) if e.is_not_found())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
