//! Project management commands for CLI.

use clap::Subcommand;
use tally_core::{GoalRepo, Project, ProjectRepo, Settings, TaskRepo};

use super::{not_found, open_store, print_json, CmdResult};

#[derive(Subcommand)]
pub enum ProjectAction {
    /// Create a project
    Add {
        /// Project identifier (no ':' or whitespace)
        sid: String,
        /// Display name, defaults to the identifier
        #[arg(long, default_value = "")]
        name: String,
        /// Display color, e.g. "#3b82f6"
        #[arg(long)]
        color: Option<String>,
    },
    /// List all projects
    List,
    /// Delete a project with its tasks and goal. Tracked blocks are kept.
    Rm {
        /// Project identifier
        sid: String,
    },
}

pub fn run(action: ProjectAction, settings: &Settings) -> CmdResult {
    let store = open_store(settings)?;
    let projects = ProjectRepo::new(&store);

    match action {
        ProjectAction::Add { sid, name, color } => {
            let mut project = Project::new(&sid, &name)?;
            if let Some(color) = color {
                project.color = color;
            }
            projects.create(&project)?;
            print_json(&project)
        }
        ProjectAction::List => {
            let mut list = projects.list()?;
            list.sort_by(|a, b| a.sid.cmp(&b.sid));
            print_json(&list)
        }
        ProjectAction::Rm { sid } => {
            if !projects.exists(&sid)? {
                return Err(not_found("project", &sid).into());
            }
            let tasks = TaskRepo::new(&store);
            for task in tasks.list_by_project(&sid)? {
                tasks.delete_by_key(&task.key)?;
            }
            GoalRepo::new(&store).delete(&sid)?;
            projects.delete(&sid)?;
            tracing::info!(project = %sid, "project deleted");
            print_json(&serde_json::json!({ "deleted": sid }))
        }
    }
}
