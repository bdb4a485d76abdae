//! Subcommand handlers. Each one prints JSON on success.

pub mod block;
pub mod config;
pub mod goal;
pub mod notify;
pub mod project;
pub mod report;
pub mod task;
pub mod track;

use std::error::Error;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_core::{ErrorCode, Settings, Store, UserError};

pub type CmdResult = Result<(), Box<dyn Error>>;

pub fn open_store(settings: &Settings) -> Result<Store, Box<dyn Error>> {
    Ok(Store::open(settings.open_options()?)?)
}

/// Parse an RFC 3339 timestamp given for `field`.
pub fn parse_time(field: &str, value: &str) -> Result<DateTime<Utc>, UserError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            UserError::from_code(ErrorCode::InvalidTimestamp)
                .with_detail(format!("{value} ({e})"))
                .with_field(field, value)
        })
}

pub fn time_or_now(field: &str, value: Option<&str>) -> Result<DateTime<Utc>, UserError> {
    value.map_or_else(|| Ok(Utc::now()), |v| parse_time(field, v))
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn not_found(what: &str, id: &str) -> UserError {
    UserError::from_code(ErrorCode::RecordNotFound)
        .with_detail(format!("{what} '{id}'"))
        .with_field(what, id)
}
