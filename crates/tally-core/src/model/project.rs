use serde::{Deserialize, Serialize};

use super::{default_color, entity_key, validate_sid, Entity};
use crate::error::{ErrorCode, UserError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub key: String,
    pub sid: String,
    pub display_name: String,
    pub color: String,
}

impl Entity for Project {
    const PREFIX: &'static str = "project";
    const EXISTS_CODE: ErrorCode = ErrorCode::ProjectExists;

    fn key(&self) -> &str {
        &self.key
    }
}

impl Project {
    /// New project with default styling. An empty display name falls back to the SID.
    pub fn new(sid: &str, display_name: &str) -> Result<Self, UserError> {
        validate_sid("project", sid)?;
        Ok(Self {
            key: entity_key::<Self>(sid),
            sid: sid.to_string(),
            display_name: name_or_sid(display_name, sid),
            color: default_color(sid),
        })
    }
}

/// A task inside a project. Task SIDs are unique per project only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub key: String,
    pub project_sid: String,
    pub sid: String,
    pub display_name: String,
    pub color: String,
}

impl Entity for Task {
    const PREFIX: &'static str = "task";
    const EXISTS_CODE: ErrorCode = ErrorCode::TaskExists;

    fn key(&self) -> &str {
        &self.key
    }
}

impl Task {
    pub fn new(project_sid: &str, sid: &str, display_name: &str) -> Result<Self, UserError> {
        validate_sid("project", project_sid)?;
        validate_sid("task", sid)?;
        Ok(Self {
            key: entity_key::<Self>(&Self::natural_id(project_sid, sid)),
            project_sid: project_sid.to_string(),
            sid: sid.to_string(),
            display_name: name_or_sid(display_name, sid),
            color: default_color(sid),
        })
    }

    /// Composite natural id, `<project>:<task>`.
    pub fn natural_id(project_sid: &str, sid: &str) -> String {
        format!("{project_sid}:{sid}")
    }
}

fn name_or_sid(display_name: &str, sid: &str) -> String {
    if display_name.trim().is_empty() {
        sid.to_string()
    } else {
        display_name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_key_derives_from_sid() {
        let project = Project::new("website", "Website relaunch").unwrap();
        assert_eq!(project.key, "project:website");
        assert_eq!(project.display_name, "Website relaunch");
        assert_eq!(Project::new("website", "").unwrap().display_name, "website");
    }

    #[test]
    fn task_key_is_composite() {
        let task = Task::new("website", "design", "Design").unwrap();
        assert_eq!(task.key, "task:website:design");
        assert_eq!(Task::natural_id("website", "design"), "website:design");
    }

    #[test]
    fn task_rejects_bad_sids() {
        assert!(Task::new("web site", "design", "").is_err());
        let err = Task::new("website", "de:sign", "").unwrap_err();
        assert_eq!(err.field.as_deref(), Some("task"));
    }
}
