//! Access filter: which tasks an identity sees, and what it may change.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{fields, Identity, Task, TaskPatch, TASKS};
use crate::store::Query;

/// Task list view requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewMode {
    /// Tasks the caller created.
    #[default]
    MyTasks,
    /// Tasks assigned to the caller.
    AssignedToMe,
    /// Every task; only admins actually get it.
    All,
}

impl ViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::MyTasks => "mine",
            ViewMode::AssignedToMe => "assigned",
            ViewMode::All => "all",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mine" | "my-tasks" => Ok(ViewMode::MyTasks),
            "assigned" | "assigned-to-me" => Ok(ViewMode::AssignedToMe),
            "all" => Ok(ViewMode::All),
            other => Err(Error::InvalidArgument(format!(
                "unknown view '{other}' (expected mine|assigned|all)"
            ))),
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved query scope. "Created by" and "assigned to" are never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "uid", rename_all = "kebab-case")]
pub enum QueryScope {
    /// No identity: the caller must not query.
    Unauthenticated,
    AllTasks,
    CreatedBy(String),
    AssignedTo(String),
}

impl QueryScope {
    pub fn to_query(&self) -> Option<Query> {
        let base = Query::collection(TASKS);
        match self {
            QueryScope::Unauthenticated => None,
            QueryScope::AllTasks => Some(base),
            QueryScope::CreatedBy(uid) => Some(base.where_eq(fields::CREATED_BY, uid.as_str())),
            QueryScope::AssignedTo(uid) => Some(base.where_eq(fields::ASSIGNED_TO, uid.as_str())),
        }
    }

    /// Whether a task falls inside this scope.
    pub fn permits(&self, task: &Task) -> bool {
        match self {
            QueryScope::Unauthenticated => false,
            QueryScope::AllTasks => true,
            QueryScope::CreatedBy(uid) => task.created_by == *uid,
            QueryScope::AssignedTo(uid) => task.assigned_to.as_deref() == Some(uid.as_str()),
        }
    }
}

/// Query scope for an identity and view.
///
/// Admins get every task except in the "assigned to me" view. A regular user
/// asking for [`ViewMode::All`] gets their own tasks.
pub fn scope_for(identity: Option<&Identity>, view: ViewMode) -> QueryScope {
    let Some(identity) = identity else {
        return QueryScope::Unauthenticated;
    };
    match (identity.is_admin(), view) {
        (_, ViewMode::AssignedToMe) => QueryScope::AssignedTo(identity.uid.clone()),
        (true, _) => QueryScope::AllTasks,
        (false, ViewMode::MyTasks | ViewMode::All) => QueryScope::CreatedBy(identity.uid.clone()),
    }
}

fn is_creator(identity: &Identity, task: &Task) -> bool {
    task.created_by == identity.uid
}

fn is_assignee(identity: &Identity, task: &Task) -> bool {
    task.assigned_to.as_deref() == Some(identity.uid.as_str())
}

pub fn can_view(identity: &Identity, task: &Task) -> bool {
    identity.is_admin() || is_creator(identity, task) || is_assignee(identity, task)
}

/// Admins and creators may change anything; an assignee may only move status.
pub fn authorize_update(identity: &Identity, task: &Task, patch: &TaskPatch) -> Result<()> {
    if identity.is_admin() || is_creator(identity, task) {
        return Ok(());
    }
    if is_assignee(identity, task) {
        if patch.touches_only_status() {
            return Ok(());
        }
        return Err(Error::PermissionDenied(format!(
            "assignees may only change the status of task {}",
            task.id
        )));
    }
    Err(Error::PermissionDenied(format!(
        "task {} belongs to another user",
        task.id
    )))
}

pub fn authorize_delete(identity: &Identity, task: &Task) -> Result<()> {
    if identity.is_admin() || is_creator(identity, task) {
        return Ok(());
    }
    Err(Error::PermissionDenied(format!(
        "only the creator or an admin can delete task {}",
        task.id
    )))
}
