//! Error classification.
//!
//! Every failure is mapped onto an [`ErrorCategory`] by walking its cause
//! chain. Typed errors from this crate decide first; OS-level conditions
//! (I/O error kinds, SQLite result codes, HTTP client failures) come next,
//! and a short table of message patterns catches opaque errors last.
//!
//! The category decides whether the retry queue tries a delivery again
//! ([`is_retryable`]) and how the CLI presents the failure ([`describe`]).

use std::error::Error as StdError;
use std::fmt;
use std::io;

use serde::Serialize;

use crate::error::{
    Categorized, CoreError, ErrorCategory, ErrorCode, RecoverableError, SystemError, UserError,
};
use crate::notify::DeliveryError;
use crate::storage::{SettingsError, StoreError};

type DynError = dyn StdError + 'static;

/// Iterator over an error and its causes, outermost first.
pub struct Chain<'a> {
    next: Option<&'a DynError>,
}

/// Walk `err` and its causes.
///
/// [`CoreError`] variants are transparent, so their `source()` skips the
/// wrapped error; the walk steps into it instead. Custom `io::Error`
/// payloads are stepped into the same way.
pub fn chain(err: &DynError) -> Chain<'_> {
    Chain { next: Some(err) }
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a DynError;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = if let Some(core) = current.downcast_ref::<CoreError>() {
            Some(core.inner())
        } else if let Some(inner) = current.downcast_ref::<io::Error>().and_then(|e| e.get_ref()) {
            Some(inner as &DynError)
        } else {
            current.source()
        };
        Some(current)
    }
}

/// Derive a category from the error itself, ignoring [`Categorized`] wrappers.
pub fn classify(err: Option<&DynError>) -> ErrorCategory {
    let Some(err) = err else {
        return ErrorCategory::Unknown;
    };
    chain(err)
        .find_map(typed_category)
        .or_else(|| chain(err).find_map(os_category))
        .or_else(|| chain(err).find_map(pattern_category))
        .unwrap_or(ErrorCategory::Unknown)
}

/// Category for `err`: an explicit [`Categorized`] wrapper if one exists in
/// the chain, otherwise [`classify`].
pub fn get_category(err: Option<&DynError>) -> ErrorCategory {
    let Some(err) = err else {
        return ErrorCategory::Unknown;
    };
    chain(err)
        .find_map(|e| e.downcast_ref::<Categorized>().map(|c| c.category))
        .unwrap_or_else(|| classify(Some(err)))
}

/// Whether trying the failed operation again may succeed.
///
/// Recoverable errors are retryable unless a [`RecoverableError`] in the
/// chain has used up its attempts. System errors are retryable only for
/// network outages.
pub fn is_retryable(err: &DynError) -> bool {
    match get_category(Some(err)) {
        ErrorCategory::Recoverable => !chain(err).any(|e| {
            e.downcast_ref::<RecoverableError>()
                .is_some_and(|r| !r.can_retry())
        }),
        ErrorCategory::System => chain(err).any(is_network_outage),
        _ => false,
    }
}

fn typed_category(err: &DynError) -> Option<ErrorCategory> {
    if err.is::<UserError>() {
        return Some(ErrorCategory::User);
    }
    if err.is::<SystemError>() {
        return Some(ErrorCategory::System);
    }
    if err.is::<RecoverableError>() {
        return Some(ErrorCategory::Recoverable);
    }
    if let Some(e) = err.downcast_ref::<StoreError>() {
        return match e {
            StoreError::NotFound { .. } | StoreError::KeyExists { .. } => Some(ErrorCategory::User),
            StoreError::InsufficientSpace { .. }
            | StoreError::MissingPath
            | StoreError::Open { .. } => Some(ErrorCategory::System),
            StoreError::Codec { .. } | StoreError::Poisoned => Some(ErrorCategory::Internal),
            StoreError::Engine(_) | StoreError::Io(_) => None,
        };
    }
    if let Some(e) = err.downcast_ref::<DeliveryError>() {
        return match e {
            DeliveryError::Status { status } => Some(status_category(*status)),
            DeliveryError::Timeout(_) => Some(ErrorCategory::Recoverable),
            DeliveryError::Url(_) => Some(ErrorCategory::User),
            DeliveryError::Encode(_) | DeliveryError::Signing => Some(ErrorCategory::Internal),
            DeliveryError::Request(_) | DeliveryError::Io(_) => None,
        };
    }
    if let Some(e) = err.downcast_ref::<SettingsError>() {
        return match e {
            SettingsError::UnknownKey(_)
            | SettingsError::InvalidValue { .. }
            | SettingsError::Parse { .. } => Some(ErrorCategory::User),
            SettingsError::Serialize(_) => Some(ErrorCategory::Internal),
            SettingsError::Read { .. } | SettingsError::Write { .. } => None,
        };
    }
    None
}

/// Server-side trouble and throttling are worth retrying; other statuses
/// mean the request itself is wrong.
fn status_category(status: u16) -> ErrorCategory {
    match status {
        408 | 429 | 500..=599 => ErrorCategory::Recoverable,
        _ => ErrorCategory::User,
    }
}

fn os_category(err: &DynError) -> Option<ErrorCategory> {
    if let Some(e) = err.downcast_ref::<io::Error>() {
        return io_category(e);
    }
    if let Some(e) = err.downcast_ref::<rusqlite::Error>() {
        return sqlite_category(e);
    }
    if let Some(e) = err.downcast_ref::<reqwest::Error>() {
        if e.is_timeout() || e.is_connect() {
            return Some(ErrorCategory::Recoverable);
        }
        return e.status().map(|s| status_category(s.as_u16()));
    }
    if err.is::<tokio::time::error::Elapsed>() {
        return Some(ErrorCategory::Recoverable);
    }
    None
}

fn io_category(e: &io::Error) -> Option<ErrorCategory> {
    use io::ErrorKind as Kind;
    match e.kind() {
        Kind::StorageFull
        | Kind::PermissionDenied
        | Kind::NotFound
        | Kind::ReadOnlyFilesystem
        | Kind::NetworkUnreachable
        | Kind::HostUnreachable
        | Kind::NetworkDown => Some(ErrorCategory::System),
        Kind::WouldBlock
        | Kind::Interrupted
        | Kind::TimedOut
        | Kind::ConnectionRefused
        | Kind::ConnectionReset
        | Kind::ConnectionAborted => Some(ErrorCategory::Recoverable),
        _ if is_eio(e) => Some(ErrorCategory::System),
        _ => None,
    }
}

#[cfg(unix)]
fn is_eio(e: &io::Error) -> bool {
    const EIO: i32 = 5;
    e.raw_os_error() == Some(EIO)
}

#[cfg(not(unix))]
fn is_eio(_e: &io::Error) -> bool {
    false
}

fn sqlite_category(e: &rusqlite::Error) -> Option<ErrorCategory> {
    use rusqlite::ErrorCode as Code;
    match e.sqlite_error_code()? {
        Code::DiskFull
        | Code::ReadOnly
        | Code::PermissionDenied
        | Code::CannotOpen
        | Code::SystemIoFailure => Some(ErrorCategory::System),
        Code::DatabaseBusy | Code::DatabaseLocked => Some(ErrorCategory::Recoverable),
        _ => None,
    }
}

fn is_network_outage(err: &DynError) -> bool {
    err.downcast_ref::<io::Error>().is_some_and(|e| {
        matches!(
            e.kind(),
            io::ErrorKind::NetworkUnreachable
                | io::ErrorKind::HostUnreachable
                | io::ErrorKind::NetworkDown
        )
    })
}

/// Lower-case message fragments for errors that carry no usable type.
const MESSAGE_PATTERNS: &[(&str, ErrorCategory)] = &[
    ("no space left on device", ErrorCategory::System),
    ("disk full", ErrorCategory::System),
    ("permission denied", ErrorCategory::System),
    ("read-only file system", ErrorCategory::System),
    ("input/output error", ErrorCategory::System),
    ("no such file or directory", ErrorCategory::System),
    ("resource temporarily unavailable", ErrorCategory::Recoverable),
    ("interrupted system call", ErrorCategory::Recoverable),
    ("timed out", ErrorCategory::Recoverable),
    ("connection refused", ErrorCategory::Recoverable),
    ("connection reset", ErrorCategory::Recoverable),
    ("database is locked", ErrorCategory::Recoverable),
];

fn pattern_category(err: &DynError) -> Option<ErrorCategory> {
    let message = err.to_string().to_lowercase();
    MESSAGE_PATTERNS
        .iter()
        .find(|(pattern, _)| message.contains(pattern))
        .map(|&(_, category)| category)
}

/// A failure ready to show to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserMessage {
    pub category: ErrorCategory,
    pub message: String,
    pub suggestion: Option<String>,
    pub examples: Vec<String>,
}

const SYSTEM_HINT: &str = "Check free disk space and the permissions of the data directory.";
const INTERNAL_HINT: &str = "This is a bug in tally. Please report it with the command you ran.";

impl fmt::Display for UserMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.category {
            ErrorCategory::User => {
                write!(f, "{}", self.message)?;
                if let Some(suggestion) = &self.suggestion {
                    write!(f, "\nSuggestion: {suggestion}")?;
                }
                if !self.examples.is_empty() {
                    write!(f, "\nExamples:")?;
                    for example in &self.examples {
                        write!(f, "\n  {example}")?;
                    }
                }
                Ok(())
            }
            ErrorCategory::System => write!(f, "System error: {}\n{SYSTEM_HINT}", self.message),
            ErrorCategory::Recoverable => {
                write!(f, "{} (will be retried automatically)", self.message)
            }
            ErrorCategory::Internal => write!(f, "Internal error: {}\n{INTERNAL_HINT}", self.message),
            ErrorCategory::Unknown => write!(f, "{}", self.message),
        }
    }
}

/// Categorize `err` and collect the text shown for it.
pub fn describe(err: &DynError) -> UserMessage {
    let category = get_category(Some(err));
    let user = chain(err).find_map(|e| e.downcast_ref::<UserError>());

    let message = match user {
        Some(user) => user.message.clone(),
        None => err.to_string(),
    };
    let (suggestion, examples) = match (category, user) {
        (ErrorCategory::User, Some(user)) => (user.suggestion.clone(), user.examples()),
        (ErrorCategory::User, None) => match chain(err).find_map(error_code) {
            Some(code) => (Some(code.info().suggestion.to_string()), code.info().examples),
            None => (None, &[][..]),
        },
        _ => (None, &[][..]),
    };

    UserMessage {
        category,
        message,
        suggestion,
        examples: examples.iter().map(|e| e.to_string()).collect(),
    }
}

/// Rendered text for `err`.
pub fn render_user_message(err: &DynError) -> String {
    describe(err).to_string()
}

fn error_code(err: &DynError) -> Option<ErrorCode> {
    if let Some(e) = err.downcast_ref::<SettingsError>() {
        return e.code();
    }
    match err.downcast_ref::<StoreError>()? {
        StoreError::NotFound { .. } => Some(ErrorCode::RecordNotFound),
        StoreError::KeyExists { .. } => Some(ErrorCode::RecordExists),
        _ => None,
    }
}
