use super::{get_or_insert, Repository};
use crate::error::Result;
use crate::model::{Project, Task};

impl Repository<'_, Project> {
    /// Fetch the project, creating it with default styling if absent.
    /// An existing project keeps its display name.
    pub fn get_or_create(&self, sid: &str, display_name: &str) -> Result<(Project, bool)> {
        let fresh = Project::new(sid, display_name)?;
        let (project, created) = self.store.transaction(|txn| get_or_insert(txn, fresh))?;
        if created {
            tracing::info!(sid, "project created");
        }
        Ok((project, created))
    }
}

impl Repository<'_, Task> {
    pub fn get_or_create(&self, project_sid: &str, sid: &str, display_name: &str) -> Result<(Task, bool)> {
        let fresh = Task::new(project_sid, sid, display_name)?;
        let (task, created) = self.store.transaction(|txn| get_or_insert(txn, fresh))?;
        if created {
            tracing::info!(project = project_sid, sid, "task created");
        }
        Ok((task, created))
    }

    pub fn list_by_project(&self, project_sid: &str) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .list()?
            .into_iter()
            .filter(|t| t.project_sid == project_sid)
            .collect();
        tasks.sort_by(|a, b| a.sid.cmp(&b.sid));
        Ok(tasks)
    }
}
