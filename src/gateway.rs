//! Task mutation gateway
//!
//! Create, update and delete tasks on behalf of an explicit [`Identity`].
//! Input is validated before the store is touched. Authorization is checked
//! inside the store commit, against the committed copy of the task, so the
//! check and the write see the same state. Every write stamps `updatedAt`
//! with the server time.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::access;
use crate::error::{Error, Result};
use crate::feed::{FromDocument, TaskStoreAdapter};
use crate::model::{fields, Identity, NewTask, Task, TaskPatch, TaskStatus, TASKS};
use crate::store::{server_timestamp, Document, DocumentStore, Fields};

#[derive(Clone)]
pub struct TaskGateway {
    store: Arc<dyn DocumentStore>,
    adapter: TaskStoreAdapter,
}

impl TaskGateway {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            adapter: TaskStoreAdapter::new(Arc::clone(&store)),
            store,
        }
    }

    /// Create a task owned by `identity`.
    ///
    /// The assignee defaults to the caller. Status starts at `todo`.
    pub fn create(&self, identity: &Identity, input: NewTask) -> Result<Task> {
        let (title, description) = validate_new(&input)?;
        let assigned_to = match input.assigned_to.as_deref().map(str::trim) {
            Some(uid) if !uid.is_empty() => uid.to_string(),
            _ => identity.uid.clone(),
        };

        let mut doc = Fields::new();
        doc.insert(fields::TITLE.to_string(), Value::String(title));
        doc.insert(fields::DESCRIPTION.to_string(), Value::String(description));
        doc.insert(
            fields::STATUS.to_string(),
            Value::String(TaskStatus::Todo.as_str().to_string()),
        );
        doc.insert(
            fields::CREATED_BY.to_string(),
            Value::String(identity.uid.clone()),
        );
        doc.insert(fields::ASSIGNED_TO.to_string(), Value::String(assigned_to));
        doc.insert(fields::DUE_DATE.to_string(), date_value(input.due_date));
        doc.insert(fields::CREATED_AT.to_string(), server_timestamp());
        doc.insert(fields::UPDATED_AT.to_string(), server_timestamp());

        let id = self.store.add_document(TASKS, doc)?;
        tracing::debug!(task = %id, actor = %identity.uid, "task created");
        self.adapter.get_task(&id)
    }

    /// Shallow-merge `patch` into a task and return the stored result.
    pub fn update(&self, identity: &Identity, id: &str, patch: TaskPatch) -> Result<Task> {
        let id = required("task id", id)?;
        let partial = patch_fields(&patch)?;

        let merged = self
            .store
            .update_document_if(TASKS, &id, partial, &mut |doc| {
                access::authorize_update(identity, &stored_task(doc)?, &patch)
            })
            .map_err(|err| not_found_as_task(err, &id))?;
        tracing::debug!(task = %id, actor = %identity.uid, "task updated");
        stored_task(&merged)
    }

    pub fn delete(&self, identity: &Identity, id: &str) -> Result<()> {
        let id = required("task id", id)?;

        self.store
            .delete_document_if(TASKS, &id, &mut |doc| {
                access::authorize_delete(identity, &stored_task(doc)?)
            })
            .map_err(|err| not_found_as_task(err, &id))?;
        tracing::debug!(task = %id, actor = %identity.uid, "task deleted");
        Ok(())
    }
}

/// Title and description checks for a new task, trimmed.
pub fn validate_new(input: &NewTask) -> Result<(String, String)> {
    Ok((
        required(fields::TITLE, &input.title)?,
        required(fields::DESCRIPTION, &input.description)?,
    ))
}

/// Reject a patch that would be refused before reaching the store.
pub fn validate_patch(patch: &TaskPatch) -> Result<()> {
    patch_fields(patch).map(|_| ())
}

fn stored_task(doc: &Document) -> Result<Task> {
    Task::from_document(doc)
        .map_err(|reason| Error::Store(format!("task {} is malformed: {reason}", doc.id)))
}

fn not_found_as_task(err: Error, id: &str) -> Error {
    match err {
        Error::DocumentNotFound(_) => Error::TaskNotFound(id.to_string()),
        other => other,
    }
}

fn required(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

fn date_value(date: Option<DateTime<Utc>>) -> Value {
    match date {
        Some(date) => Value::String(date.to_rfc3339_opts(SecondsFormat::Secs, true)),
        None => Value::Null,
    }
}

fn patch_fields(patch: &TaskPatch) -> Result<Fields> {
    if patch.is_empty() {
        return Err(Error::Validation("nothing to update".to_string()));
    }

    let mut partial = Fields::new();
    if let Some(title) = &patch.title {
        partial.insert(
            fields::TITLE.to_string(),
            Value::String(required(fields::TITLE, title)?),
        );
    }
    if let Some(description) = &patch.description {
        partial.insert(
            fields::DESCRIPTION.to_string(),
            Value::String(required(fields::DESCRIPTION, description)?),
        );
    }
    if let Some(status) = &patch.status {
        if !status.is_known() {
            return Err(Error::Validation(format!(
                "unknown task status '{status}' (expected todo|in-progress|done)"
            )));
        }
        partial.insert(
            fields::STATUS.to_string(),
            Value::String(status.as_str().to_string()),
        );
    }
    if let Some(assigned_to) = &patch.assigned_to {
        partial.insert(
            fields::ASSIGNED_TO.to_string(),
            Value::String(required(fields::ASSIGNED_TO, assigned_to)?),
        );
    }
    if let Some(due_date) = patch.due_date {
        partial.insert(fields::DUE_DATE.to_string(), date_value(due_date));
    }
    partial.insert(fields::UPDATED_AT.to_string(), server_timestamp());
    Ok(partial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LocalStore, Query, Subscription};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts every call that reaches the store.
    struct CountingStore {
        inner: LocalStore,
        calls: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: LocalStore::in_memory(),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn tick(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl DocumentStore for CountingStore {
        fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
            self.tick();
            self.inner.get_document(collection, id)
        }

        fn query(&self, query: &Query) -> Result<Vec<Document>> {
            self.tick();
            self.inner.query(query)
        }

        fn add_document(&self, collection: &str, fields: Fields) -> Result<String> {
            self.tick();
            self.inner.add_document(collection, fields)
        }

        fn set_document(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
            self.tick();
            self.inner.set_document(collection, id, fields)
        }

        fn create_document(&self, collection: &str, id: &str, fields: Fields) -> Result<bool> {
            self.tick();
            self.inner.create_document(collection, id, fields)
        }

        fn update_document_if(
            &self,
            collection: &str,
            id: &str,
            partial: Fields,
            check: &mut dyn FnMut(&Document) -> Result<()>,
        ) -> Result<Document> {
            self.tick();
            self.inner.update_document_if(collection, id, partial, check)
        }

        fn delete_document_if(
            &self,
            collection: &str,
            id: &str,
            check: &mut dyn FnMut(&Document) -> Result<()>,
        ) -> Result<Document> {
            self.tick();
            self.inner.delete_document_if(collection, id, check)
        }

        fn subscribe(&self, query: Query) -> Result<Subscription> {
            self.tick();
            self.inner.subscribe(query)
        }
    }

    fn gateway() -> (Arc<CountingStore>, TaskGateway) {
        let store = Arc::new(CountingStore::new());
        let gateway = TaskGateway::new(store.clone());
        (store, gateway)
    }

    fn new_task(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            description: "x".to_string(),
            assigned_to: Some("u1".to_string()),
            due_date: None,
        }
    }

    #[test]
    fn create_rejects_empty_title_without_store_call() {
        let (store, gateway) = gateway();
        let err = gateway
            .create(&Identity::user("u1"), new_task(""))
            .expect_err("empty title");
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.calls(), 0);

        let err = gateway
            .create(
                &Identity::user("u1"),
                NewTask {
                    description: "   ".to_string(),
                    ..new_task("ok")
                },
            )
            .expect_err("blank description");
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.calls(), 0);
    }

    #[test]
    fn create_sets_defaults() {
        let (_store, gateway) = gateway();
        let caller = Identity::user("u1");
        let task = gateway
            .create(
                &caller,
                NewTask {
                    assigned_to: None,
                    due_date: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
                    ..new_task("  Write report ")
                },
            )
            .unwrap();

        assert_eq!(task.title, "Write report");
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.created_by, "u1");
        assert_eq!(task.assigned_to.as_deref(), Some("u1"));
        assert!(task.created_at.is_some());
        assert_eq!(task.created_at, task.updated_at);
        assert_eq!(
            task.due_date,
            Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn update_merges_and_keeps_creator() {
        let (_store, gateway) = gateway();
        let owner = Identity::user("u1");
        let task = gateway.create(&owner, new_task("Draft")).unwrap();

        let updated = gateway
            .update(
                &owner,
                &task.id,
                TaskPatch {
                    title: Some("Final".to_string()),
                    assigned_to: Some("u2".to_string()),
                    due_date: Some(None),
                    ..TaskPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.title, "Final");
        assert_eq!(updated.description, "x");
        assert_eq!(updated.created_by, "u1");
        assert_eq!(updated.assigned_to.as_deref(), Some("u2"));
        assert!(updated.updated_at >= task.updated_at);
    }

    #[test]
    fn update_validation_precedes_store() {
        let (store, gateway) = gateway();
        let caller = Identity::user("u1");

        let err = gateway
            .update(&caller, "t1", TaskPatch::default())
            .expect_err("empty patch");
        assert!(matches!(err, Error::Validation(_)));

        let err = gateway
            .update(
                &caller,
                "t1",
                TaskPatch::status(TaskStatus::Other("pending".to_string())),
            )
            .expect_err("unknown status");
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.calls(), 0);
    }

    #[test]
    fn update_and_delete_require_existing_task() {
        let (_store, gateway) = gateway();
        let caller = Identity::admin("a1");
        assert!(matches!(
            gateway.update(&caller, "missing", TaskPatch::status(TaskStatus::Done)),
            Err(Error::TaskNotFound(_))
        ));
        assert!(matches!(
            gateway.delete(&caller, "missing"),
            Err(Error::TaskNotFound(_))
        ));
    }

    #[test]
    fn assignee_can_move_status_but_not_delete() {
        let (_store, gateway) = gateway();
        let owner = Identity::user("u1");
        let assignee = Identity::user("u2");
        let task = gateway
            .create(
                &owner,
                NewTask {
                    assigned_to: Some("u2".to_string()),
                    ..new_task("Review")
                },
            )
            .unwrap();

        let moved = gateway
            .update(&assignee, &task.id, TaskPatch::status(TaskStatus::InProgress))
            .unwrap();
        assert_eq!(moved.status, TaskStatus::InProgress);

        assert!(matches!(
            gateway.update(
                &assignee,
                &task.id,
                TaskPatch {
                    title: Some("Hijacked".to_string()),
                    ..TaskPatch::default()
                }
            ),
            Err(Error::PermissionDenied(_))
        ));
        assert!(matches!(
            gateway.delete(&assignee, &task.id),
            Err(Error::PermissionDenied(_))
        ));

        gateway.delete(&owner, &task.id).unwrap();
        assert!(matches!(
            gateway.delete(&owner, &task.id),
            Err(Error::TaskNotFound(_))
        ));
    }

    fn persisted_pair() -> (tempfile::TempDir, TaskGateway, TaskGateway) {
        use crate::config::Config;
        use crate::storage::Storage;

        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let open = || {
            let storage = Storage::for_root(dir.path().to_path_buf(), &config);
            TaskGateway::new(Arc::new(LocalStore::open(storage, &config.store).unwrap()))
        };
        let (first, second) = (open(), open());
        (dir, first, second)
    }

    #[test]
    fn stale_handle_authorizes_against_committed_task() {
        let (_dir, stale, fresh) = persisted_pair();
        let owner = Identity::user("u1");
        let old_assignee = Identity::user("u2");

        // Created after `stale` loaded its state.
        let task = fresh
            .create(
                &owner,
                NewTask {
                    assigned_to: Some("u2".to_string()),
                    ..new_task("Handoff")
                },
            )
            .unwrap();
        let moved = stale
            .update(&old_assignee, &task.id, TaskPatch::status(TaskStatus::InProgress))
            .unwrap();
        assert_eq!(moved.status, TaskStatus::InProgress);

        fresh
            .update(
                &owner,
                &task.id,
                TaskPatch {
                    assigned_to: Some("u3".to_string()),
                    ..TaskPatch::default()
                },
            )
            .unwrap();
        assert!(matches!(
            stale.update(&old_assignee, &task.id, TaskPatch::status(TaskStatus::Done)),
            Err(Error::PermissionDenied(_))
        ));
    }

    #[test]
    fn task_deleted_elsewhere_is_not_found() {
        let (_dir, stale, fresh) = persisted_pair();
        let owner = Identity::user("u1");
        let task = stale.create(&owner, new_task("Gone soon")).unwrap();
        fresh.delete(&owner, &task.id).unwrap();

        let err = stale
            .update(&owner, &task.id, TaskPatch::status(TaskStatus::Done))
            .expect_err("deleted");
        assert!(matches!(err, Error::TaskNotFound(ref id) if *id == task.id));
        assert_eq!(err.exit_code(), crate::error::exit_codes::USER_ERROR);
        assert!(matches!(
            stale.delete(&owner, &task.id),
            Err(Error::TaskNotFound(_))
        ));
    }

    #[test]
    fn validation_helpers_match_gateway() {
        assert!(validate_new(&new_task("  ")).is_err());
        let (title, _) = validate_new(&new_task(" Plan ")).unwrap();
        assert_eq!(title, "Plan");
        assert!(validate_patch(&TaskPatch::default()).is_err());
        assert!(validate_patch(&TaskPatch::status(TaskStatus::Done)).is_ok());
    }
}
