//! List-view filtering and ordering.

use crate::directory::UserDirectory;
use crate::model::{Task, TaskStatus};
use crate::stats::compare_recent;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Case-insensitive text matched against title, description, status and
    /// assignee.
    pub search: Option<String>,
    pub status: Option<TaskStatus>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task, directory: Option<&UserDirectory>) -> bool {
        if let Some(status) = &self.status {
            if task.status != *status {
                return false;
            }
        }
        let Some(needle) = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|needle| !needle.is_empty())
        else {
            return true;
        };
        let needle = needle.to_lowercase();

        let assignee = task.assignee();
        let assignee_label = directory.map(|dir| dir.label_for(assignee)).unwrap_or(assignee);
        [
            task.title.as_str(),
            task.description.as_str(),
            task.status.as_str(),
            assignee,
            assignee_label,
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
    }

    /// Matching tasks, newest first.
    pub fn apply(&self, tasks: Vec<Task>, directory: Option<&UserDirectory>) -> Vec<Task> {
        let mut selected: Vec<Task> = tasks
            .into_iter()
            .filter(|task| self.matches(task, directory))
            .collect();
        selected.sort_by(compare_recent);
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Role, User};
    use chrono::{Duration, TimeZone, Utc};

    fn task(id: &str, title: &str, status: TaskStatus, assigned_to: &str, age_days: i64) -> Task {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        Task {
            id: id.to_string(),
            title: title.to_string(),
            description: "details".to_string(),
            status,
            created_by: "u1".to_string(),
            assigned_to: Some(assigned_to.to_string()),
            due_date: None,
            created_at: Some(base - Duration::days(age_days)),
            updated_at: None,
        }
    }

    fn tasks() -> Vec<Task> {
        vec![
            task("a", "Fix login", TaskStatus::Todo, "u1", 3),
            task("b", "Write docs", TaskStatus::Done, "u2", 1),
            task("c", "Fix signup", TaskStatus::InProgress, "u2", 2),
        ]
    }

    #[test]
    fn no_filter_orders_newest_first() {
        let ids: Vec<String> = TaskFilter::default()
            .apply(tasks(), None)
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn search_and_status_combine() {
        let filter = TaskFilter {
            search: Some("FIX".to_string()),
            status: Some(TaskStatus::InProgress),
            limit: None,
        };
        let result = filter.apply(tasks(), None);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "c");
    }

    #[test]
    fn search_matches_assignee_label() {
        let directory = UserDirectory::from_users(vec![User {
            uid: "u2".to_string(),
            email: "grace@example.com".to_string(),
            display_name: "Grace".to_string(),
            role: Role::User,
            created_at: None,
        }]);
        let filter = TaskFilter {
            search: Some("grace".to_string()),
            limit: Some(1),
            ..TaskFilter::default()
        };
        let result = filter.apply(tasks(), Some(&directory));
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "b");
    }
}
