use std::sync::Arc;
use std::time::Duration;

use taskdesk::access::{scope_for, ViewMode};
use taskdesk::config::Config;
use taskdesk::error::SubscriptionError;
use taskdesk::feed::{FeedEvent, LiveFeed, TaskStoreAdapter};
use taskdesk::gateway::TaskGateway;
use taskdesk::model::{Identity, NewTask, Task, TaskPatch, TaskStatus};
use taskdesk::storage::Storage;
use taskdesk::store::{DocumentStore, LocalStore};

fn new_task(title: &str, assignee: &str) -> NewTask {
    NewTask {
        title: title.to_string(),
        description: "details".to_string(),
        assigned_to: Some(assignee.to_string()),
        due_date: None,
    }
}

async fn next_ids(feed: &mut LiveFeed<Task>) -> Vec<String> {
    let event = tokio::time::timeout(Duration::from_secs(10), feed.recv())
        .await
        .expect("snapshot in time")
        .expect("feed open");
    match event {
        FeedEvent::Snapshot(snapshot) => {
            let mut ids: Vec<String> = snapshot.items.into_iter().map(|t| t.id).collect();
            ids.sort();
            ids
        }
        FeedEvent::Error(err) => panic!("unexpected feed error: {err}"),
    }
}

fn open_store(root: &std::path::Path) -> LocalStore {
    let config = Config::default();
    let storage = Storage::for_root(root.to_path_buf(), &config);
    LocalStore::open(storage, &config.store).expect("open store")
}

#[tokio::test]
async fn feeds_follow_gateway_mutations_per_scope() {
    let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::in_memory());
    let adapter = TaskStoreAdapter::new(store.clone());
    let gateway = TaskGateway::new(store);

    let alice = Identity::user("alice");
    let bob = Identity::user("bob");
    let admin = Identity::admin("root");

    let mut alice_mine = adapter
        .subscribe(&scope_for(Some(&alice), ViewMode::MyTasks))
        .expect("alice feed");
    let mut bob_assigned = adapter
        .subscribe(&scope_for(Some(&bob), ViewMode::AssignedToMe))
        .expect("bob feed");
    let mut admin_all = adapter
        .subscribe(&scope_for(Some(&admin), ViewMode::MyTasks))
        .expect("admin feed");

    assert!(next_ids(&mut alice_mine).await.is_empty());
    assert!(next_ids(&mut bob_assigned).await.is_empty());
    assert!(next_ids(&mut admin_all).await.is_empty());

    let task = gateway
        .create(&alice, new_task("Write report", "bob"))
        .expect("create");
    assert_eq!(next_ids(&mut alice_mine).await, vec![task.id.clone()]);
    assert_eq!(next_ids(&mut bob_assigned).await, vec![task.id.clone()]);
    assert_eq!(next_ids(&mut admin_all).await, vec![task.id.clone()]);

    gateway
        .update(&bob, &task.id, TaskPatch::status(TaskStatus::Done))
        .expect("assignee status change");
    let event = bob_assigned.recv().await.expect("feed open");
    match event {
        FeedEvent::Snapshot(snapshot) => {
            assert_eq!(snapshot.items[0].status, TaskStatus::Done);
        }
        FeedEvent::Error(err) => panic!("unexpected feed error: {err}"),
    }

    gateway.delete(&admin, &task.id).expect("admin delete");
    let _ = next_ids(&mut alice_mine).await;
    assert!(next_ids(&mut alice_mine).await.is_empty());
}

#[tokio::test]
async fn unsubscribed_feed_receives_nothing_more() {
    let store = LocalStore::in_memory();
    let shared: Arc<dyn DocumentStore> = Arc::new(store.clone());
    let adapter = TaskStoreAdapter::new(shared.clone());
    let gateway = TaskGateway::new(shared);
    let alice = Identity::user("alice");

    let mut feed = adapter
        .subscribe(&scope_for(Some(&alice), ViewMode::MyTasks))
        .expect("feed");
    let _ = next_ids(&mut feed).await;

    let handle = feed.handle();
    handle.unsubscribe();
    handle.unsubscribe();
    assert!(!handle.is_active());
    assert_eq!(store.listener_count(), 0);

    gateway
        .create(&alice, new_task("Quiet", "alice"))
        .expect("create");
    assert!(feed.try_recv().is_none());
}

#[tokio::test]
async fn closing_the_store_ends_feeds_with_error() {
    let store = LocalStore::in_memory();
    let adapter = TaskStoreAdapter::new(Arc::new(store.clone()));
    let mut feed = adapter.subscribe_users().expect("users feed");
    let _ = feed.recv().await;

    store.close();
    match feed.recv().await {
        Some(FeedEvent::Error(err)) => assert_eq!(err, SubscriptionError::Closed),
        _ => panic!("expected closed error"),
    }
}

#[tokio::test]
async fn second_process_commits_reach_watchers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let watcher_store = open_store(dir.path());
    let writer_store = open_store(dir.path());

    let _watch = watcher_store
        .watch_files(Duration::from_millis(20))
        .expect("watch store files");
    let adapter = TaskStoreAdapter::new(Arc::new(watcher_store.clone()));
    let alice = Identity::user("alice");
    let mut feed = adapter
        .subscribe(&scope_for(Some(&alice), ViewMode::MyTasks))
        .expect("feed");
    assert!(next_ids(&mut feed).await.is_empty());

    let gateway = TaskGateway::new(Arc::new(writer_store));
    let task = gateway
        .create(&alice, new_task("From elsewhere", "alice"))
        .expect("create");

    assert_eq!(next_ids(&mut feed).await, vec![task.id]);
}
