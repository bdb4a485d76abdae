use chrono::{DateTime, Utc};

use super::{BlockRepo, Repository};
use crate::aggregate::clipped_duration;
use crate::error::Result;
use crate::model::{Goal, GoalProgress};

impl Repository<'_, Goal> {
    /// Store `goal`, replacing any goal the project already has.
    pub fn upsert(&self, goal: &Goal) -> Result<()> {
        self.update(goal)?;
        tracing::info!(project = %goal.project_sid, goal_type = ?goal.goal_type, "goal set");
        Ok(())
    }

    pub fn get_for_project(&self, project_sid: &str) -> Result<Option<Goal>> {
        self.find(project_sid)
    }

    /// Progress toward the project's goal in the period containing `now`.
    ///
    /// Blocks straddling the period start only count their part inside it.
    /// Returns `None` when the project has no goal.
    pub fn progress_for_project(
        &self,
        project_sid: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<(Goal, GoalProgress)>> {
        let Some(goal) = self.get_for_project(project_sid)? else {
            return Ok(None);
        };
        let from = goal.period_start(now);
        let blocks: Vec<_> = BlockRepo::new(self.store)
            .list_by_time_range_at(from, now, now)?
            .into_iter()
            .filter(|b| b.project_sid == project_sid)
            .collect();
        let progress = goal.calculate_progress(clipped_duration(&blocks, from, now, now));
        Ok(Some((goal, progress)))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::model::{Block, GoalType};
    use crate::repository::GoalRepo;
    use crate::storage::Store;

    #[test]
    fn upsert_replaces_existing_goal() {
        let store = Store::open_memory().unwrap();
        let repo = GoalRepo::new(&store);
        repo.upsert(&Goal::new("web", GoalType::Daily, Duration::hours(1)).unwrap())
            .unwrap();
        repo.upsert(&Goal::new("web", GoalType::Weekly, Duration::hours(10)).unwrap())
            .unwrap();

        let goal = repo.get_for_project("web").unwrap().unwrap();
        assert_eq!(goal.goal_type, GoalType::Weekly);
        assert_eq!(repo.list().unwrap().len(), 1);
        assert!(repo.get_for_project("app").unwrap().is_none());
    }

    #[test]
    fn progress_counts_only_the_current_period() {
        let store = Store::open_memory().unwrap();
        let goals = GoalRepo::new(&store);
        let blocks = BlockRepo::new(&store);
        let goal = Goal::new("web", GoalType::Daily, Duration::hours(2)).unwrap();
        goals.upsert(&goal).unwrap();

        let now = goal.period_start(Utc::now()) + Duration::hours(3);
        let start = goal.period_start(now);

        // Straddles the period start: only the last 30 minutes count.
        let mut early = Block::new("owner", "web", "", "", start - Duration::minutes(30));
        early.close(start + Duration::minutes(30)).unwrap();
        let mut inside = Block::new("owner", "web", "", "", start + Duration::hours(1));
        inside.close(start + Duration::hours(2)).unwrap();
        let mut other = Block::new("owner", "app", "", "", start + Duration::hours(1));
        other.close(start + Duration::hours(2)).unwrap();
        for block in [&early, &inside, &other] {
            blocks.create(block).unwrap();
        }

        let (_, progress) = goals.progress_for_project("web", now).unwrap().unwrap();
        assert_eq!(progress.current, Duration::minutes(90));
        assert_eq!(progress.remaining, Duration::minutes(30));
        assert!(!progress.is_complete);
    }
}
