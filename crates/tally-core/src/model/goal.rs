use chrono::{DateTime, Datelike, Days, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::{duration_secs, entity_key, validate_sid, Entity};
use crate::error::{ErrorCode, UserError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Daily,
    Weekly,
}

/// Time target for one project. A project has at most one goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub key: String,
    pub project_sid: String,
    pub goal_type: GoalType,
    #[serde(with = "duration_secs")]
    pub target: Duration,
}

impl Entity for Goal {
    const PREFIX: &'static str = "goal";
    const EXISTS_CODE: ErrorCode = ErrorCode::GoalExists;

    fn key(&self) -> &str {
        &self.key
    }
}

/// Progress toward a goal's target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GoalProgress {
    #[serde(with = "duration_secs")]
    pub current: Duration,
    #[serde(with = "duration_secs")]
    pub remaining: Duration,
    /// Not capped: overshooting the target goes past 100.
    pub percentage: f64,
    pub is_complete: bool,
}

impl Goal {
    pub fn new(project_sid: &str, goal_type: GoalType, target: Duration) -> Result<Self, UserError> {
        validate_sid("project", project_sid)?;
        if target <= Duration::zero() {
            return Err(UserError::from_code(ErrorCode::InvalidTarget)
                .with_field("target", format!("{}s", target.num_seconds())));
        }
        Ok(Self {
            key: entity_key::<Self>(project_sid),
            project_sid: project_sid.to_string(),
            goal_type,
            target,
        })
    }

    pub fn calculate_progress(&self, current: Duration) -> GoalProgress {
        let remaining = (self.target - current).max(Duration::zero());
        let percentage = if self.target > Duration::zero() {
            100.0 * current.num_milliseconds() as f64 / self.target.num_milliseconds() as f64
        } else {
            100.0
        };
        GoalProgress {
            current,
            remaining,
            percentage,
            is_complete: current >= self.target,
        }
    }

    /// Start of the period `now` falls in, in the local time zone.
    pub fn period_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.period_start_in(now, &chrono::Local)
    }

    /// Start of the period `now` falls in: midnight for daily goals,
    /// Monday midnight for weekly goals, both in `tz`.
    pub fn period_start_in<Tz: TimeZone>(&self, now: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
        let today = now.with_timezone(tz).date_naive();
        let first_day = match self.goal_type {
            GoalType::Daily => today,
            GoalType::Weekly => today
                .checked_sub_days(Days::new(today.weekday().num_days_from_monday() as u64))
                .unwrap_or(today),
        };
        local_midnight(first_day, tz)
    }
}

fn local_midnight<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let naive = date.and_time(chrono::NaiveTime::MIN);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => t.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        // Midnight skipped by a DST jump: fall back to the UTC reading.
        LocalResult::None => naive.and_utc(),
    }
}
