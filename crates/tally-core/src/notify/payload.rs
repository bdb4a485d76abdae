use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::DeliveryError;
use crate::model::{Block, Goal, GoalProgress};

pub const PAYLOAD_VERSION: &str = "1.0";

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TrackingStarted,
    TrackingStopped,
    GoalReached,
    /// Sent on request to check an endpoint.
    Test,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::TrackingStarted => "tracking_started",
            EventType::TrackingStopped => "tracking_stopped",
            EventType::GoalReached => "goal_reached",
            EventType::Test => "test",
        }
    }
}

/// Versioned webhook body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub version: String,
    pub event_type: EventType,
    /// Unique per event; receivers can use it to drop duplicates.
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub block_key: Option<String>,
    #[serde(default)]
    pub project_sid: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl WebhookPayload {
    pub fn new(event_type: EventType, data: serde_json::Value) -> Self {
        Self {
            version: PAYLOAD_VERSION.to_string(),
            event_type,
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            block_key: None,
            project_sid: None,
            data,
        }
    }

    pub fn tracking_started(block: &Block) -> Self {
        let mut payload = Self::new(
            EventType::TrackingStarted,
            serde_json::json!({
                "task_sid": block.task_sid,
                "note": block.note,
                "started_at": block.timestamp_start,
            }),
        );
        payload.block_key = Some(block.key.clone());
        payload.project_sid = Some(block.project_sid.clone());
        payload
    }

    pub fn tracking_stopped(block: &Block) -> Self {
        let end = block.end_or(Utc::now());
        let mut payload = Self::new(
            EventType::TrackingStopped,
            serde_json::json!({
                "task_sid": block.task_sid,
                "started_at": block.timestamp_start,
                "ended_at": end,
                "duration_secs": block.duration_at(end).num_seconds(),
            }),
        );
        payload.block_key = Some(block.key.clone());
        payload.project_sid = Some(block.project_sid.clone());
        payload
    }

    pub fn goal_reached(goal: &Goal, progress: &GoalProgress) -> Self {
        let mut payload = Self::new(
            EventType::GoalReached,
            serde_json::json!({
                "goal_type": goal.goal_type,
                "target_secs": goal.target.num_seconds(),
                "current_secs": progress.current.num_seconds(),
                "percentage": progress.percentage,
            }),
        );
        payload.project_sid = Some(goal.project_sid.clone());
        payload
    }

    pub fn test() -> Self {
        Self::new(EventType::Test, serde_json::json!({ "message": "tally webhook test" }))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DeliveryError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, DeliveryError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).map_err(|_| DeliveryError::Signing)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
