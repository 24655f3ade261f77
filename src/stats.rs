//! Task aggregator
//!
//! Pure functions over a snapshot of tasks (and users). Output depends only on
//! the set of inputs and `now`, never on arrival order.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::StatsConfig;
use crate::model::{Role, Task, TaskStatus, User};

/// Default number of entries in [`Stats::recent_tasks`].
pub const DEFAULT_RECENT_LIMIT: usize = 5;

/// Task counts per known status. Unknown statuses fall in no bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusBreakdown {
    pub todo: usize,
    #[serde(rename = "in-progress")]
    pub in_progress: usize,
    pub done: usize,
}

impl StatusBreakdown {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut breakdown = Self::default();
        for task in tasks {
            match task.status {
                TaskStatus::Todo => breakdown.todo += 1,
                TaskStatus::InProgress => breakdown.in_progress += 1,
                TaskStatus::Done => breakdown.done += 1,
                TaskStatus::Other(_) => {}
            }
        }
        breakdown
    }

    pub fn total(&self) -> usize {
        self.todo + self.in_progress + self.done
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoleBreakdown {
    pub admin: usize,
    pub user: usize,
}

impl RoleBreakdown {
    pub fn from_users<'a>(users: impl IntoIterator<Item = &'a User>) -> Self {
        let mut breakdown = Self::default();
        for user in users {
            match user.role {
                Role::Admin => breakdown.admin += 1,
                Role::User => breakdown.user += 1,
                Role::Unrecognized => {}
            }
        }
        breakdown
    }
}

/// Workspace-wide analytics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub total_tasks: usize,
    pub total_users: usize,
    pub tasks_by_status: StatusBreakdown,
    pub users_by_role: RoleBreakdown,
    pub overdue_tasks: usize,
    /// Whole percent of tasks that are done.
    pub completion_rate: u32,
    /// One decimal place.
    pub avg_tasks_per_user: f64,
    pub recent_tasks: Vec<Task>,
}

/// Per-identity breakdown for the personal dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityStats {
    pub uid: String,
    pub created_count: usize,
    pub assigned_count: usize,
    pub created_by_status: StatusBreakdown,
    pub assigned_by_status: StatusBreakdown,
    pub overdue_tasks: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    recent_limit: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_LIMIT)
    }
}

impl Aggregator {
    pub fn new(recent_limit: usize) -> Self {
        Self { recent_limit }
    }

    pub fn from_config(config: &StatsConfig) -> Self {
        Self::new(config.recent_limit)
    }

    pub fn aggregate(&self, tasks: &[Task], users: &[User], now: DateTime<Utc>) -> Stats {
        let total_tasks = tasks.len();
        let total_users = users.len();
        let tasks_by_status = StatusBreakdown::from_tasks(tasks);

        Stats {
            total_tasks,
            total_users,
            tasks_by_status,
            users_by_role: RoleBreakdown::from_users(users),
            overdue_tasks: count_overdue(tasks, now),
            completion_rate: percent(tasks_by_status.done, total_tasks),
            avg_tasks_per_user: ratio_one_decimal(total_tasks, total_users),
            recent_tasks: recent_tasks(tasks, self.recent_limit),
        }
    }
}

/// [`Aggregator::aggregate`] with the default recent-task limit.
pub fn aggregate(tasks: &[Task], users: &[User], now: DateTime<Utc>) -> Stats {
    Aggregator::default().aggregate(tasks, users, now)
}

pub fn identity_stats(tasks: &[Task], uid: &str, now: DateTime<Utc>) -> IdentityStats {
    let created: Vec<&Task> = tasks.iter().filter(|task| task.created_by == uid).collect();
    let assigned: Vec<&Task> = tasks
        .iter()
        .filter(|task| task.assigned_to.as_deref() == Some(uid))
        .collect();
    let overdue_tasks = tasks
        .iter()
        .filter(|task| task.created_by == uid || task.assigned_to.as_deref() == Some(uid))
        .filter(|task| task.is_overdue(now))
        .count();

    IdentityStats {
        uid: uid.to_string(),
        created_count: created.len(),
        assigned_count: assigned.len(),
        created_by_status: StatusBreakdown::from_tasks(created.iter().copied()),
        assigned_by_status: StatusBreakdown::from_tasks(assigned.iter().copied()),
        overdue_tasks,
    }
}

fn count_overdue(tasks: &[Task], now: DateTime<Utc>) -> usize {
    tasks.iter().filter(|task| task.is_overdue(now)).count()
}

fn percent(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((part as f64 / whole as f64) * 100.0).round() as u32
}

fn ratio_one_decimal(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    ((numerator as f64 / denominator as f64) * 10.0).round() / 10.0
}

/// Newest first by `created_at`; undated tasks last; ties by id.
pub fn recent_tasks(tasks: &[Task], limit: usize) -> Vec<Task> {
    let mut sorted: Vec<&Task> = tasks.iter().collect();
    sorted.sort_by(|a, b| compare_recent(a, b));
    sorted.into_iter().take(limit).cloned().collect()
}

pub(crate) fn compare_recent(a: &Task, b: &Task) -> Ordering {
    match (a.created_at, b.created_at) {
        (Some(left), Some(right)) => right.cmp(&left),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id))
}
