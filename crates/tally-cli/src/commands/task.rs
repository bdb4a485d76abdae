//! Task management commands for CLI.

use clap::Subcommand;
use tally_core::{ProjectRepo, Settings, Task, TaskRepo};

use super::{not_found, open_store, print_json, CmdResult};

#[derive(Subcommand)]
pub enum TaskAction {
    /// Create a task in an existing project
    Add {
        /// Project identifier
        project: String,
        /// Task identifier, unique within the project
        sid: String,
        /// Display name, defaults to the identifier
        #[arg(long, default_value = "")]
        name: String,
    },
    /// List tasks, optionally for one project
    List {
        /// Project identifier
        project: Option<String>,
    },
    /// Delete a task. Tracked blocks are kept.
    Rm {
        /// Project identifier
        project: String,
        /// Task identifier
        sid: String,
    },
}

pub fn run(action: TaskAction, settings: &Settings) -> CmdResult {
    let store = open_store(settings)?;
    let tasks = TaskRepo::new(&store);

    match action {
        TaskAction::Add { project, sid, name } => {
            let task = Task::new(&project, &sid, &name)?;
            if !ProjectRepo::new(&store).exists(&project)? {
                return Err(not_found("project", &project).into());
            }
            tasks.create(&task)?;
            print_json(&task)
        }
        TaskAction::List { project } => {
            let list = match project {
                Some(project) => tasks.list_by_project(&project)?,
                None => {
                    let mut all = tasks.list()?;
                    all.sort_by(|a, b| a.key.cmp(&b.key));
                    all
                }
            };
            print_json(&list)
        }
        TaskAction::Rm { project, sid } => {
            let id = Task::natural_id(&project, &sid);
            if !tasks.exists(&id)? {
                return Err(not_found("task", &id).into());
            }
            tasks.delete(&id)?;
            tracing::info!(task = %id, "task deleted");
            print_json(&serde_json::json!({ "deleted": id }))
        }
    }
}
