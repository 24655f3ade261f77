//! Task Store Adapter
//!
//! Turns raw store documents into strict [`Task`] / [`User`] records and
//! exposes live queries as typed feeds. Every delivery is a complete
//! [`Snapshot`] of the current result set; documents that fail validation are
//! left out and counted in [`Snapshot::rejected`].

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::access::QueryScope;
use crate::error::{Error, Result, SubscriptionError};
use crate::model::{self, fields, Role, Task, TaskStatus, User};
use crate::store::{Document, DocumentStore, Query, StoreEvent, Subscription, SubscriptionHandle};

/// A record that can be read from a store document.
pub trait FromDocument: Sized {
    /// Collection the record lives in.
    const COLLECTION: &'static str;

    /// Build the record, or explain why the document is unusable.
    fn from_document(doc: &Document) -> std::result::Result<Self, String>;
}

/// Coerce a date-like field value.
///
/// Accepts RFC 3339 strings, `YYYY-MM-DD`, epoch milliseconds and
/// `{seconds, nanoseconds}` timestamp objects. `null` is `None`.
pub fn coerce_date(value: &Value) -> std::result::Result<Option<DateTime<Utc>>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(raw) if raw.trim().is_empty() => Ok(None),
        Value::String(raw) => model::parse_date(raw)
            .map(Some)
            .map_err(|_| format!("unrecognized date '{raw}'")),
        Value::Number(number) => number
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(Some)
            .ok_or_else(|| format!("epoch millis out of range: {number}")),
        Value::Object(object) => {
            let seconds = object
                .get("seconds")
                .or_else(|| object.get("_seconds"))
                .and_then(Value::as_i64)
                .ok_or_else(|| "timestamp object without seconds".to_string())?;
            let nanos = object
                .get("nanoseconds")
                .or_else(|| object.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let nanos = u32::try_from(nanos).map_err(|_| "nanoseconds out of range".to_string())?;
            DateTime::from_timestamp(seconds, nanos)
                .map(Some)
                .ok_or_else(|| format!("timestamp out of range: {seconds}s"))
        }
        other => Err(format!("unsupported date value {other}")),
    }
}

fn date_field(doc: &Document, field: &str) -> std::result::Result<Option<DateTime<Utc>>, String> {
    match doc.get(field) {
        None => Ok(None),
        Some(value) => coerce_date(value).map_err(|reason| format!("{field}: {reason}")),
    }
}

fn required_text(doc: &Document, field: &str) -> std::result::Result<String, String> {
    match doc.get(field) {
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(text.clone()),
        Some(Value::String(_)) => Err(format!("{field} is empty")),
        Some(other) if !other.is_null() => Err(format!("{field} is not text")),
        _ => Err(format!("{field} is missing")),
    }
}

fn optional_text(doc: &Document, field: &str) -> Option<String> {
    doc.get_str(field)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

impl FromDocument for Task {
    const COLLECTION: &'static str = model::TASKS;

    fn from_document(doc: &Document) -> std::result::Result<Self, String> {
        let title = required_text(doc, fields::TITLE)?;
        let description = required_text(doc, fields::DESCRIPTION)?;
        let created_by = required_text(doc, fields::CREATED_BY)
            .or_else(|_| required_text(doc, fields::OWNER_ID))
            .map_err(|_| format!("{} is missing", fields::CREATED_BY))?;
        let status = match doc.get(fields::STATUS) {
            None | Some(Value::Null) => TaskStatus::Todo,
            Some(Value::String(raw)) if raw.trim().is_empty() => TaskStatus::Todo,
            Some(Value::String(raw)) => TaskStatus::from_stored(raw.trim()),
            Some(_) => return Err(format!("{} is not text", fields::STATUS)),
        };

        Ok(Task {
            id: doc.id.clone(),
            title,
            description,
            status,
            created_by,
            assigned_to: optional_text(doc, fields::ASSIGNED_TO),
            due_date: date_field(doc, fields::DUE_DATE)?,
            created_at: date_field(doc, fields::CREATED_AT)?,
            updated_at: date_field(doc, fields::UPDATED_AT)?,
        })
    }
}

impl FromDocument for User {
    const COLLECTION: &'static str = model::USERS;

    fn from_document(doc: &Document) -> std::result::Result<Self, String> {
        let role = match doc.get_str(fields::ROLE).map(str::trim) {
            None | Some("") => Role::User,
            Some(raw) => Role::parse(raw).unwrap_or_else(|_| {
                tracing::warn!(user = %doc.id, role = raw, "unrecognized role");
                Role::Unrecognized
            }),
        };

        Ok(User {
            uid: optional_text(doc, fields::UID).unwrap_or_else(|| doc.id.clone()),
            email: optional_text(doc, fields::EMAIL).unwrap_or_default(),
            display_name: optional_text(doc, fields::DISPLAY_NAME).unwrap_or_default(),
            role,
            created_at: date_field(doc, fields::CREATED_AT)?,
        })
    }
}

/// Complete, normalized result set of a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot<T> {
    pub items: Vec<T>,
    /// Documents left out because they failed validation.
    pub rejected: usize,
    pub received_at: DateTime<Utc>,
}

impl<T: FromDocument> Snapshot<T> {
    pub fn from_documents(docs: Vec<Document>) -> Self {
        let mut items = Vec::with_capacity(docs.len());
        let mut rejected = 0;
        for doc in &docs {
            match T::from_document(doc) {
                Ok(item) => items.push(item),
                Err(reason) => {
                    rejected += 1;
                    tracing::warn!(
                        collection = T::COLLECTION,
                        id = %doc.id,
                        reason = %reason,
                        "skipping malformed document"
                    );
                }
            }
        }
        Self {
            items,
            rejected,
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent<T> {
    Snapshot(Snapshot<T>),
    Error(SubscriptionError),
}

/// Typed live query.
///
/// Yields a snapshot right away and again after every change to the match
/// set. An error ends the feed. Dropping the feed releases the query.
#[derive(Debug)]
pub struct LiveFeed<T> {
    subscription: Subscription,
    _record: PhantomData<fn() -> T>,
}

impl<T: FromDocument> LiveFeed<T> {
    fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            _record: PhantomData,
        }
    }

    /// Next snapshot or error; `None` once the feed has ended.
    pub async fn recv(&mut self) -> Option<FeedEvent<T>> {
        self.subscription.recv().await.map(Self::convert)
    }

    pub fn try_recv(&mut self) -> Option<FeedEvent<T>> {
        self.subscription.try_recv().map(Self::convert)
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.subscription.handle()
    }

    pub fn unsubscribe(&self) {
        self.subscription.unsubscribe();
    }

    fn convert(event: StoreEvent) -> FeedEvent<T> {
        match event {
            StoreEvent::Snapshot(docs) => FeedEvent::Snapshot(Snapshot::from_documents(docs)),
            StoreEvent::Error(err) => FeedEvent::Error(err),
        }
    }
}

/// Opens scoped task queries and user queries against a [`DocumentStore`].
#[derive(Clone)]
pub struct TaskStoreAdapter {
    store: Arc<dyn DocumentStore>,
}

impl TaskStoreAdapter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Live task list for a scope. An unauthenticated scope is refused.
    pub fn subscribe(&self, scope: &QueryScope) -> Result<LiveFeed<Task>> {
        let query = scoped_query(scope)?;
        Ok(LiveFeed::new(self.store.subscribe(query)?))
    }

    pub fn subscribe_users(&self) -> Result<LiveFeed<User>> {
        let query = Query::collection(model::USERS);
        Ok(LiveFeed::new(self.store.subscribe(query)?))
    }

    /// One-shot read of a scope.
    pub fn fetch(&self, scope: &QueryScope) -> Result<Snapshot<Task>> {
        let query = scoped_query(scope)?;
        Ok(Snapshot::from_documents(self.store.query(&query)?))
    }

    pub fn fetch_users(&self) -> Result<Snapshot<User>> {
        let query = Query::collection(model::USERS);
        Ok(Snapshot::from_documents(self.store.query(&query)?))
    }

    pub fn get_task(&self, id: &str) -> Result<Task> {
        let doc = self
            .store
            .get_document(model::TASKS, id)?
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        Task::from_document(&doc)
            .map_err(|reason| Error::Store(format!("task {id} is malformed: {reason}")))
    }
}

fn scoped_query(scope: &QueryScope) -> Result<Query> {
    scope.to_query().ok_or(Error::NotSignedIn)
}
