//! Live dashboards: recompute stats whenever any input feed delivers.
//!
//! The feeds are independent and arrive in no particular order. Each
//! dashboard keeps the latest snapshot per feed and recomputes from scratch
//! once every feed has delivered at least once.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::access::QueryScope;
use crate::error::{Result, SubscriptionError};
use crate::feed::{FeedEvent, LiveFeed, TaskStoreAdapter};
use crate::model::{Identity, Task, User};
use crate::stats::{identity_stats, Aggregator, IdentityStats, Stats};

enum Incoming<A, B> {
    First(Option<FeedEvent<A>>),
    Second(Option<FeedEvent<B>>),
}

/// Workspace-wide stats over all tasks and all users.
pub struct AdminDashboard {
    tasks: LiveFeed<Task>,
    users: LiveFeed<User>,
    latest_tasks: Option<Vec<Task>>,
    latest_users: Option<Vec<User>>,
    aggregator: Aggregator,
}

impl AdminDashboard {
    pub fn open(adapter: &TaskStoreAdapter, aggregator: Aggregator) -> Result<Self> {
        Ok(Self {
            tasks: adapter.subscribe(&QueryScope::AllTasks)?,
            users: adapter.subscribe_users()?,
            latest_tasks: None,
            latest_users: None,
            aggregator,
        })
    }

    /// Wait for the next recomputation.
    ///
    /// Returns `Some(Err(_))` when either feed fails and `None` once a feed
    /// has ended.
    pub async fn next(&mut self) -> Option<std::result::Result<Stats, SubscriptionError>> {
        loop {
            let incoming = tokio::select! {
                event = self.tasks.recv() => Incoming::First(event),
                event = self.users.recv() => Incoming::Second(event),
            };
            match incoming {
                Incoming::First(Some(FeedEvent::Snapshot(snapshot))) => {
                    self.latest_tasks = Some(snapshot.items);
                }
                Incoming::Second(Some(FeedEvent::Snapshot(snapshot))) => {
                    self.latest_users = Some(snapshot.items);
                }
                Incoming::First(Some(FeedEvent::Error(err)))
                | Incoming::Second(Some(FeedEvent::Error(err))) => return Some(Err(err)),
                Incoming::First(None) | Incoming::Second(None) => return None,
            }
            if let Some(stats) = self.current() {
                return Some(Ok(stats));
            }
        }
    }

    /// Stats for the latest snapshots, if both feeds have delivered.
    pub fn current(&self) -> Option<Stats> {
        match (&self.latest_tasks, &self.latest_users) {
            (Some(tasks), Some(users)) => {
                Some(self.aggregator.aggregate(tasks, users, Utc::now()))
            }
            _ => None,
        }
    }

    /// Release both feeds.
    pub fn close(&self) {
        self.tasks.unsubscribe();
        self.users.unsubscribe();
    }
}

/// Created/assigned breakdown for one identity.
pub struct PersonalDashboard {
    uid: String,
    created: LiveFeed<Task>,
    assigned: LiveFeed<Task>,
    latest_created: Option<Vec<Task>>,
    latest_assigned: Option<Vec<Task>>,
}

impl PersonalDashboard {
    pub fn open(adapter: &TaskStoreAdapter, identity: &Identity) -> Result<Self> {
        Ok(Self {
            uid: identity.uid.clone(),
            created: adapter.subscribe(&QueryScope::CreatedBy(identity.uid.clone()))?,
            assigned: adapter.subscribe(&QueryScope::AssignedTo(identity.uid.clone()))?,
            latest_created: None,
            latest_assigned: None,
        })
    }

    pub async fn next(&mut self) -> Option<std::result::Result<IdentityStats, SubscriptionError>> {
        loop {
            let incoming = tokio::select! {
                event = self.created.recv() => Incoming::First(event),
                event = self.assigned.recv() => Incoming::Second(event),
            };
            match incoming {
                Incoming::First(Some(FeedEvent::Snapshot(snapshot))) => {
                    self.latest_created = Some(snapshot.items);
                }
                Incoming::Second(Some(FeedEvent::Snapshot(snapshot))) => {
                    self.latest_assigned = Some(snapshot.items);
                }
                Incoming::First(Some(FeedEvent::Error(err)))
                | Incoming::Second(Some(FeedEvent::Error(err))) => return Some(Err(err)),
                Incoming::First(None) | Incoming::Second(None) => return None,
            }
            if let Some(stats) = self.current() {
                return Some(Ok(stats));
            }
        }
    }

    pub fn current(&self) -> Option<IdentityStats> {
        let (Some(created), Some(assigned)) = (&self.latest_created, &self.latest_assigned) else {
            return None;
        };
        // A self-assigned task shows up in both feeds.
        let merged: BTreeMap<&str, &Task> = created
            .iter()
            .chain(assigned.iter())
            .map(|task| (task.id.as_str(), task))
            .collect();
        let tasks: Vec<Task> = merged.into_values().cloned().collect();
        Some(identity_stats(&tasks, &self.uid, Utc::now()))
    }

    pub fn close(&self) {
        self.created.unsubscribe();
        self.assigned.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TASKS, USERS};
    use crate::store::{DocumentStore, Fields, LocalStore};
    use serde_json::json;
    use std::sync::Arc;

    fn object(value: serde_json::Value) -> Fields {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn add_task(store: &LocalStore, created_by: &str, assigned_to: &str, status: &str) {
        store
            .add_document(
                TASKS,
                object(json!({
                    "title": "t",
                    "description": "d",
                    "createdBy": created_by,
                    "assignedTo": assigned_to,
                    "status": status,
                })),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn admin_dashboard_recomputes_on_each_feed() {
        let store = LocalStore::in_memory();
        store
            .set_document(USERS, "u1", object(json!({"email": "a@x", "role": "admin"})))
            .unwrap();
        add_task(&store, "u1", "u1", "done");

        let adapter = TaskStoreAdapter::new(Arc::new(store.clone()));
        let mut dashboard = AdminDashboard::open(&adapter, Aggregator::default()).unwrap();

        let first = dashboard.next().await.expect("stats").expect("no error");
        assert_eq!(first.total_tasks, 1);
        assert_eq!(first.total_users, 1);
        assert_eq!(first.completion_rate, 100);

        add_task(&store, "u1", "u1", "todo");
        let second = dashboard.next().await.expect("stats").expect("no error");
        assert_eq!(second.total_tasks, 2);
        assert_eq!(second.completion_rate, 50);

        store
            .set_document(USERS, "u2", object(json!({"email": "b@x"})))
            .unwrap();
        let third = dashboard.next().await.expect("stats").expect("no error");
        assert_eq!(third.total_users, 2);
        assert_eq!(third.avg_tasks_per_user, 1.0);

        dashboard.close();
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn personal_dashboard_counts_self_assigned_once() {
        let store = LocalStore::in_memory();
        add_task(&store, "u1", "u1", "todo");
        add_task(&store, "u2", "u1", "in-progress");
        add_task(&store, "u1", "u2", "done");

        let adapter = TaskStoreAdapter::new(Arc::new(store.clone()));
        let mut dashboard = PersonalDashboard::open(&adapter, &Identity::user("u1")).unwrap();

        let stats = dashboard.next().await.expect("stats").expect("no error");
        assert_eq!(stats.created_count, 2);
        assert_eq!(stats.assigned_count, 2);
        assert_eq!(stats.created_by_status.todo, 1);
        assert_eq!(stats.created_by_status.done, 1);
        assert_eq!(stats.assigned_by_status.in_progress, 1);
    }

    #[tokio::test]
    async fn dashboard_surfaces_feed_errors() {
        let store = LocalStore::in_memory();
        let adapter = TaskStoreAdapter::new(Arc::new(store.clone()));
        let mut dashboard = AdminDashboard::open(&adapter, Aggregator::default()).unwrap();
        let _ = dashboard.next().await;

        store.close();
        assert_eq!(
            dashboard.next().await,
            Some(Err(SubscriptionError::Closed))
        );
    }
}
