use chrono::{Duration, Utc};
use clap::Subcommand;
use tally_core::{ErrorCode, Goal, GoalRepo, GoalType, ProjectRepo, Settings, UserError};

use super::{not_found, open_store, print_json, CmdResult};

#[derive(Subcommand)]
pub enum GoalAction {
    /// Set or replace a project's goal
    Set {
        /// Project identifier
        project: String,
        /// Count time per calendar day (the default)
        #[arg(long, conflicts_with = "weekly")]
        daily: bool,
        /// Count time per week, starting Monday
        #[arg(long)]
        weekly: bool,
        /// Target in minutes
        #[arg(long, allow_negative_numbers = true)]
        minutes: i64,
    },
    /// Show a project's goal and progress in the current period
    Show {
        /// Project identifier
        project: String,
    },
}

pub fn run(action: GoalAction, settings: &Settings) -> CmdResult {
    let store = open_store(settings)?;
    let goals = GoalRepo::new(&store);

    match action {
        GoalAction::Set { project, daily: _, weekly, minutes } => {
            let goal_type = if weekly { GoalType::Weekly } else { GoalType::Daily };
            let target = Duration::try_minutes(minutes).ok_or_else(|| {
                UserError::from_code(ErrorCode::InvalidTarget)
                    .with_field("minutes", minutes.to_string())
            })?;
            let goal = Goal::new(&project, goal_type, target)?;
            if !ProjectRepo::new(&store).exists(&project)? {
                return Err(not_found("project", &project).into());
            }
            goals.upsert(&goal)?;
            print_json(&goal)
        }
        GoalAction::Show { project } => {
            let (goal, progress) = goals
                .progress_for_project(&project, Utc::now())?
                .ok_or_else(|| not_found("goal", &project))?;
            print_json(&serde_json::json!({ "goal": goal, "progress": progress }))
        }
    }
}
