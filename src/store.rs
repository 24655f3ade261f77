//! Document store with live queries.
//!
//! [`DocumentStore`] is the capability the rest of the crate is written
//! against: collections of JSON documents, equality queries, writes with
//! server-assigned timestamps, and live subscriptions that deliver the full
//! current result set (never a diff) whenever it changes.
//!
//! [`LocalStore`] implements it in-process. When opened over a [`Storage`]
//! every commit is persisted to `store/<collection>.json` under an advisory
//! lock, and [`LocalStore::watch_files`] picks up commits made by other
//! processes.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use ulid::Ulid;

use crate::config::StoreConfig;
use crate::error::{Error, Result, SubscriptionError};
use crate::lock::FileLock;
use crate::storage::Storage;

/// Top-level fields of a document.
pub type Fields = Map<String, Value>;

type Collection = BTreeMap<String, Fields>;

const SERVER_TIMESTAMP_KEY: &str = ".sv";
const SERVER_TIMESTAMP_VALUE: &str = "timestamp";

/// Sentinel replaced by the commit time when the write is applied.
pub fn server_timestamp() -> Value {
    let mut sentinel = Map::new();
    sentinel.insert(
        SERVER_TIMESTAMP_KEY.to_string(),
        Value::String(SERVER_TIMESTAMP_VALUE.to_string()),
    );
    Value::Object(sentinel)
}

fn is_server_timestamp(value: &Value) -> bool {
    value.as_object().is_some_and(|object| {
        object.len() == 1
            && object.get(SERVER_TIMESTAMP_KEY).and_then(Value::as_str)
                == Some(SERVER_TIMESTAMP_VALUE)
    })
}

fn resolve_server_timestamps(fields: &mut Fields) {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    for value in fields.values_mut() {
        if is_server_timestamp(value) {
            *value = Value::String(now.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

/// Equality match on a top-level string field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        self.filters.iter().all(|filter| {
            fields.get(&filter.field).and_then(Value::as_str) == Some(filter.value.as_str())
        })
    }

    fn run(&self, collections: &BTreeMap<String, Collection>) -> Vec<Document> {
        collections
            .get(&self.collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, fields)| self.matches(fields))
                    .map(|(id, fields)| Document {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// External document-store capability.
pub trait DocumentStore: Send + Sync {
    fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    fn query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Insert a document under a store-assigned id.
    fn add_document(&self, collection: &str, fields: Fields) -> Result<String>;

    /// Create or replace a document under a caller-chosen id.
    fn set_document(&self, collection: &str, id: &str, fields: Fields) -> Result<()>;

    /// Insert under `id` only if no document holds it yet. Returns `false`
    /// when the id is taken. Decided against committed state, so concurrent
    /// writers cannot both succeed.
    fn create_document(&self, collection: &str, id: &str, fields: Fields) -> Result<bool>;

    /// Shallow-merge `partial` into the committed copy of a document once
    /// `check` accepts that copy, and return the merged document.
    ///
    /// Fails with [`Error::DocumentNotFound`] when the document is absent and
    /// with `check`'s error when it refuses; nothing is written in either case.
    fn update_document_if(
        &self,
        collection: &str,
        id: &str,
        partial: Fields,
        check: &mut dyn FnMut(&Document) -> Result<()>,
    ) -> Result<Document>;

    /// Delete a document once `check` accepts its committed copy, and return
    /// what was removed.
    fn delete_document_if(
        &self,
        collection: &str,
        id: &str,
        check: &mut dyn FnMut(&Document) -> Result<()>,
    ) -> Result<Document>;

    /// Shallow-merge `partial` into an existing document.
    fn update_document(&self, collection: &str, id: &str, partial: Fields) -> Result<()> {
        self.update_document_if(collection, id, partial, &mut |_| Ok(()))
            .map(|_| ())
    }

    fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        self.delete_document_if(collection, id, &mut |_| Ok(())).map(|_| ())
    }

    /// Open a live query. The current result set is delivered immediately.
    fn subscribe(&self, query: Query) -> Result<Subscription>;
}

/// Item received from a [`Subscription`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Snapshot(Vec<Document>),
    Error(SubscriptionError),
}

/// A live query: a snapshot channel, a separate error channel, and a
/// disposal handle. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    snapshots: mpsc::UnboundedReceiver<Vec<Document>>,
    errors: mpsc::UnboundedReceiver<SubscriptionError>,
    handle: SubscriptionHandle,
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Release the live query. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }

    /// Wait for the next snapshot or error.
    ///
    /// Queued snapshots are drained before a pending error. Returns `None`
    /// once the subscription has ended and both channels are empty.
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        tokio::select! {
            biased;
            Some(snapshot) = self.snapshots.recv() => Some(StoreEvent::Snapshot(snapshot)),
            Some(err) = self.errors.recv() => Some(StoreEvent::Error(err)),
            else => None,
        }
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Option<StoreEvent> {
        if let Ok(snapshot) = self.snapshots.try_recv() {
            return Some(StoreEvent::Snapshot(snapshot));
        }
        self.errors.try_recv().ok().map(StoreEvent::Error)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}

/// Idempotent disposal handle for a live query.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    id: u64,
    active: AtomicBool,
    store: Weak<Inner>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn unsubscribe(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(store) = self.inner.store.upgrade() {
            store
                .state
                .lock()
                .listeners
                .retain(|listener| listener.id != self.inner.id);
        }
        tracing::debug!(subscription = self.inner.id, "unsubscribed");
    }
}

#[derive(Debug)]
struct Listener {
    id: u64,
    query: Query,
    last: Vec<Document>,
    handle: Weak<HandleInner>,
    snapshots: mpsc::UnboundedSender<Vec<Document>>,
    errors: mpsc::UnboundedSender<SubscriptionError>,
}

impl Listener {
    fn fail(self, err: SubscriptionError) {
        if let Some(handle) = self.handle.upgrade() {
            handle.active.store(false, Ordering::SeqCst);
        }
        let _ = self.errors.send(err);
    }
}

#[derive(Debug, Default)]
struct State {
    collections: BTreeMap<String, Collection>,
    listeners: Vec<Listener>,
    closed: bool,
}

impl State {
    /// Deliver the current result set to every listener whose result changed.
    fn notify(&mut self) {
        let collections = &self.collections;
        self.listeners.retain_mut(|listener| {
            let current = listener.query.run(collections);
            if current == listener.last {
                return true;
            }
            listener.last = current.clone();
            listener.snapshots.send(current).is_ok()
        });
    }

    fn fail_all(&mut self, err: SubscriptionError) {
        for listener in self.listeners.drain(..) {
            listener.fail(err.clone());
        }
    }
}

#[derive(Debug)]
struct Persistence {
    storage: Storage,
    lock_timeout_ms: u64,
}

impl Persistence {
    fn load_collection(&self, name: &str) -> Result<Collection> {
        let path = self.storage.collection_file(name);
        Ok(self.storage.read_json_opt(&path)?.unwrap_or_default())
    }

    fn save_collection(&self, name: &str, docs: &Collection) -> Result<()> {
        self.storage
            .write_json(&self.storage.collection_file(name), docs)
    }

    fn load_all(&self) -> Result<BTreeMap<String, Collection>> {
        let mut collections = BTreeMap::new();
        let dir = self.storage.store_dir();
        if !dir.exists() {
            return Ok(collections);
        }
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if !is_collection_file(&path) {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                collections.insert(name.to_string(), self.load_collection(name)?);
            }
        }
        Ok(collections)
    }
}

fn is_collection_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("json")
        && !path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with('.'))
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    persistence: Option<Persistence>,
    next_listener_id: AtomicU64,
}

/// In-process document store, optionally persisted to disk.
#[derive(Debug, Clone)]
pub struct LocalStore {
    inner: Arc<Inner>,
}

impl LocalStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::with_state(State::default(), None)
    }

    /// Open (or create) a store persisted under `storage`.
    pub fn open(storage: Storage, config: &StoreConfig) -> Result<Self> {
        storage.init()?;
        let persistence = Persistence {
            storage,
            lock_timeout_ms: config.lock_timeout_ms,
        };
        let state = State {
            collections: persistence.load_all()?,
            ..State::default()
        };
        Ok(Self::with_state(state, Some(persistence)))
    }

    fn with_state(state: State, persistence: Option<Persistence>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                persistence,
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    /// Number of open live queries.
    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }

    /// Re-read every collection from disk and deliver changed result sets.
    ///
    /// A read failure ends every open subscription with
    /// [`SubscriptionError::Transport`].
    pub fn reload(&self) -> Result<()> {
        let Some(persistence) = self.inner.persistence.as_ref() else {
            return Ok(());
        };
        let mut state = self.inner.state.lock();
        match persistence.load_all() {
            Ok(collections) => {
                state.collections = collections;
                state.notify();
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "store reload failed");
                state.fail_all(SubscriptionError::Transport(err.to_string()));
                Err(err)
            }
        }
    }

    /// End every subscription with [`SubscriptionError::Closed`] and reject
    /// further writes and subscriptions.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        state.fail_all(SubscriptionError::Closed);
    }

    /// Watch the store directory and [`reload`](Self::reload) after changes
    /// made by other processes. Watching stops when the returned guard drops.
    pub fn watch_files(&self, debounce: Duration) -> Result<FileWatch> {
        let persistence = self.inner.persistence.as_ref().ok_or_else(|| {
            Error::InvalidArgument("in-memory store has no files to watch".to_string())
        })?;
        let store_dir = persistence.storage.store_dir();
        std::fs::create_dir_all(&store_dir)?;

        let (event_tx, event_rx) = std_mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = event_tx.send(res);
        })?;
        watcher.watch(&store_dir, RecursiveMode::NonRecursive)?;

        let store = Arc::downgrade(&self.inner);
        thread::spawn(move || watch_loop(store, event_rx, debounce));

        Ok(FileWatch { _watcher: watcher })
    }

    fn commit<T>(
        &self,
        collection: &str,
        apply: impl FnOnce(&mut Collection) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(Error::Store("store is closed".to_string()));
        }

        let _lock = match self.inner.persistence.as_ref() {
            Some(persistence) => Some(FileLock::acquire(
                persistence.storage.lock_file(),
                persistence.lock_timeout_ms,
            )?),
            None => None,
        };

        // Last writer wins: start from what is on disk now.
        let mut docs = match self.inner.persistence.as_ref() {
            Some(persistence) => persistence.load_collection(collection)?,
            None => state.collections.get(collection).cloned().unwrap_or_default(),
        };
        let out = apply(&mut docs)?;
        if let Some(persistence) = self.inner.persistence.as_ref() {
            persistence.save_collection(collection, &docs)?;
        }
        state.collections.insert(collection.to_string(), docs);
        state.notify();
        Ok(out)
    }
}

fn watch_loop(
    store: Weak<Inner>,
    events: std_mpsc::Receiver<notify::Result<notify::Event>>,
    debounce: Duration,
) {
    let mut pending: Option<Instant> = None;

    loop {
        let timeout = pending
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(3600));
        match events.recv_timeout(timeout) {
            Ok(Ok(event)) => {
                if event.paths.iter().any(|path| is_collection_file(path)) {
                    pending = Some(Instant::now() + debounce);
                }
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "store watcher error");
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                if pending.take().is_some() {
                    let Some(inner) = store.upgrade() else { break };
                    let _ = (LocalStore { inner }).reload();
                }
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Keeps a [`LocalStore::watch_files`] watcher alive.
pub struct FileWatch {
    _watcher: RecommendedWatcher,
}

impl DocumentStore for LocalStore {
    fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let state = self.inner.state.lock();
        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document {
                id: id.to_string(),
                fields: fields.clone(),
            }))
    }

    fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let state = self.inner.state.lock();
        Ok(query.run(&state.collections))
    }

    fn add_document(&self, collection: &str, mut fields: Fields) -> Result<String> {
        resolve_server_timestamps(&mut fields);
        let id = Ulid::new().to_string().to_ascii_lowercase();
        self.commit(collection, |docs| {
            docs.insert(id.clone(), fields);
            Ok(())
        })?;
        tracing::debug!(collection, id = %id, "document added");
        Ok(id)
    }

    fn set_document(&self, collection: &str, id: &str, mut fields: Fields) -> Result<()> {
        resolve_server_timestamps(&mut fields);
        self.commit(collection, |docs| {
            docs.insert(id.to_string(), fields);
            Ok(())
        })?;
        tracing::debug!(collection, id, "document set");
        Ok(())
    }

    fn create_document(&self, collection: &str, id: &str, mut fields: Fields) -> Result<bool> {
        resolve_server_timestamps(&mut fields);
        let created = self.commit(collection, |docs| {
            if docs.contains_key(id) {
                return Ok(false);
            }
            docs.insert(id.to_string(), fields);
            Ok(true)
        })?;
        tracing::debug!(collection, id, created, "document created if absent");
        Ok(created)
    }

    fn update_document_if(
        &self,
        collection: &str,
        id: &str,
        mut partial: Fields,
        check: &mut dyn FnMut(&Document) -> Result<()>,
    ) -> Result<Document> {
        resolve_server_timestamps(&mut partial);
        let merged = self.commit(collection, |docs| {
            let existing = docs
                .get_mut(id)
                .ok_or_else(|| Error::DocumentNotFound(format!("{collection}/{id}")))?;
            check(&Document {
                id: id.to_string(),
                fields: existing.clone(),
            })?;
            for (key, value) in partial {
                existing.insert(key, value);
            }
            Ok(Document {
                id: id.to_string(),
                fields: existing.clone(),
            })
        })?;
        tracing::debug!(collection, id, "document updated");
        Ok(merged)
    }

    fn delete_document_if(
        &self,
        collection: &str,
        id: &str,
        check: &mut dyn FnMut(&Document) -> Result<()>,
    ) -> Result<Document> {
        let removed = self.commit(collection, |docs| {
            let existing = docs
                .get(id)
                .ok_or_else(|| Error::DocumentNotFound(format!("{collection}/{id}")))?;
            let doc = Document {
                id: id.to_string(),
                fields: existing.clone(),
            };
            check(&doc)?;
            docs.remove(id);
            Ok(doc)
        })?;
        tracing::debug!(collection, id, "document deleted");
        Ok(removed)
    }

    fn subscribe(&self, query: Query) -> Result<Subscription> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(SubscriptionError::Closed.into());
        }

        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let handle = Arc::new(HandleInner {
            id,
            active: AtomicBool::new(true),
            store: Arc::downgrade(&self.inner),
        });

        let initial = query.run(&state.collections);
        let _ = snapshot_tx.send(initial.clone());
        tracing::debug!(
            subscription = id,
            collection = %query.collection,
            filters = query.filters.len(),
            "subscribed"
        );
        state.listeners.push(Listener {
            id,
            query,
            last: initial,
            handle: Arc::downgrade(&handle),
            snapshots: snapshot_tx,
            errors: error_tx,
        });

        Ok(Subscription {
            snapshots: snapshot_rx,
            errors: error_rx,
            handle: SubscriptionHandle { inner: handle },
        })
    }
}
