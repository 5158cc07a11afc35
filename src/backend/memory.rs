//! In-memory backend
//!
//! Mimics a hierarchical key/value store such as etcd: every resource is a
//! JSON document stored under its path (`/namespaces/hr/services/payroll`),
//! listing is a sorted range scan, and the hierarchy is only a naming
//! convention unless [`Hierarchy::Enforced`] is requested.
//!
//! It can also behave like a store with asynchronous mutations: with
//! [`MemoryBackend::with_async_operations`] every mutation returns an
//! operation id and is applied only once that operation has been polled to
//! completion.

use super::{Backend, Collection, Hierarchy, Key, Located, Mutation, Page, PageRequest, Record};
use crate::error::{Error, Result};
use crate::model::{Endpoint, Metadata, Namespace, Object, OriginalObject, ResourcePath, Service};
use crate::poller::{OperationId, OperationState, OperationStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Raw record attached to converted objects as their original object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRecord {
    pub key: String,
    pub id: String,
    pub body: String,
}

/// Stored document of a namespace or a service
#[derive(Debug, Default, Serialize, Deserialize)]
struct MetadataDocument {
    #[serde(default)]
    metadata: Metadata,
}

/// Stored document of an endpoint
#[derive(Debug, Default, Serialize, Deserialize)]
struct EndpointDocument {
    #[serde(default)]
    address: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Clone)]
struct Stored {
    id: String,
    body: String,
}

enum Change {
    Put { key: String, stored: Stored },
    Delete { key: String },
}

struct PendingOperation {
    polls: u32,
    remaining: u32,
    change: Change,
    failure: Option<String>,
}

#[derive(Default)]
struct State {
    records: BTreeMap<String, Stored>,
    operations: HashMap<String, PendingOperation>,
    next_id: u64,
    fail_next_operation: Option<String>,
    fail_next_list: Option<String>,
}

impl State {
    fn allocate(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:08}", prefix, self.next_id)
    }

    fn apply(&mut self, change: Change) {
        match change {
            Change::Put { key, stored } => {
                self.records.insert(key, stored);
            }
            Change::Delete { key } => {
                let below = format!("{}/", key);
                self.records
                    .retain(|k, _| k != &key && !k.starts_with(&below));
            }
        }
    }
}

/// Call counters, for observing how often the store is hit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub gets: usize,
    pub list_pages: usize,
    pub mutations: usize,
    pub status_queries: usize,
}

#[derive(Default)]
struct Counters {
    gets: AtomicUsize,
    list_pages: AtomicUsize,
    mutations: AtomicUsize,
    status_queries: AtomicUsize,
}

/// etcd-style in-process store
pub struct MemoryBackend {
    state: Mutex<State>,
    hierarchy: Hierarchy,
    /// Polls an operation stays in flight; `None` for synchronous mutations
    pending_polls: Option<u32>,
    counters: Counters,
}

impl MemoryBackend {
    /// Loose hierarchy, synchronous mutations
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            hierarchy: Hierarchy::Loose,
            pending_polls: None,
            counters: Counters::default(),
        }
    }

    pub fn with_hierarchy(mut self, hierarchy: Hierarchy) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    /// Complete mutations asynchronously, after `pending_polls` in-flight answers
    pub fn with_async_operations(mut self, pending_polls: u32) -> Self {
        self.pending_polls = Some(pending_polls);
        self
    }

    /// Make the next mutation fail with `message`
    pub fn fail_next_operation(&self, message: impl Into<String>) {
        self.lock().fail_next_operation = Some(message.into());
    }

    /// Make the next page fetch fail with a transport error
    pub fn fail_next_list(&self, message: impl Into<String>) {
        self.lock().fail_next_list = Some(message.into());
    }

    /// Store an arbitrary document under `key`, bypassing every check
    pub fn insert_raw(&self, key: impl Into<String>, body: impl Into<String>) {
        let mut state = self.lock();
        let id = state.allocate("raw");
        state.records.insert(
            key.into(),
            Stored {
                id,
                body: body.into(),
            },
        );
    }

    pub fn contains(&self, path: &ResourcePath) -> bool {
        self.lock().records.contains_key(&path.to_string())
    }

    pub fn stats(&self) -> BackendStats {
        BackendStats {
            gets: self.counters.gets.load(Ordering::SeqCst),
            list_pages: self.counters.list_pages.load(Ordering::SeqCst),
            mutations: self.counters.mutations.load(Ordering::SeqCst),
            status_queries: self.counters.status_queries.load(Ordering::SeqCst),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a change now, or park it behind an operation id
    fn submit<T>(&self, state: &mut State, change: Change, done: T) -> Result<Mutation<T>> {
        let failure = state.fail_next_operation.take();

        let Some(pending_polls) = self.pending_polls else {
            if let Some(message) = failure {
                return Err(Error::OperationFailed(message));
            }
            state.apply(change);
            return Ok(Mutation::Done(done));
        };

        let id = state.allocate("op");
        state.operations.insert(
            id.clone(),
            PendingOperation {
                polls: 0,
                remaining: pending_polls,
                change,
                failure,
            },
        );
        tracing::debug!("memory backend: submitted operation {}", id);
        Ok(Mutation::Submitted(OperationId::new(id)))
    }

    fn parent_exists(&self, state: &State, path: &ResourcePath) -> bool {
        match path.parent() {
            Some(parent) => state.records.contains_key(&parent.to_string()),
            None => true,
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn collection_prefix(collection: &Collection) -> String {
    match collection.parent() {
        None => "/namespaces/".to_string(),
        Some(parent @ ResourcePath::Namespace { .. }) => format!("{}/services/", parent),
        Some(parent) => format!("{}/endpoints/", parent),
    }
}

fn encode(object: &Object) -> Result<String> {
    let body = match object {
        Object::Namespace(ns) => serde_json::to_string(&MetadataDocument {
            metadata: ns.metadata.clone(),
        }),
        Object::Service(svc) => serde_json::to_string(&MetadataDocument {
            metadata: svc.metadata.clone(),
        }),
        Object::Endpoint(ep) => serde_json::to_string(&EndpointDocument {
            address: ep.address.clone(),
            port: ep.port,
            metadata: ep.metadata.clone(),
        }),
    };
    body.map_err(|e| Error::Transport(anyhow::Error::new(e).context("Failed to encode record")))
}

/// Decode a stored document; names always come from the key
fn decode(path: &ResourcePath, stored: &Stored) -> std::result::Result<Object, String> {
    let key = path.to_string();
    let original = OriginalObject::new(MemoryRecord {
        key,
        id: stored.id.clone(),
        body: stored.body.clone(),
    });

    let object = match path {
        ResourcePath::Namespace { namespace } => {
            let doc: MetadataDocument =
                serde_json::from_str(&stored.body).map_err(|e| e.to_string())?;
            Object::Namespace(Namespace {
                name: namespace.clone(),
                metadata: doc.metadata,
                original_object: original,
            })
        }
        ResourcePath::Service { namespace, service } => {
            let doc: MetadataDocument =
                serde_json::from_str(&stored.body).map_err(|e| e.to_string())?;
            Object::Service(Service {
                name: service.clone(),
                namespace: namespace.clone(),
                metadata: doc.metadata,
                original_object: original,
            })
        }
        ResourcePath::Endpoint {
            namespace,
            service,
            endpoint,
        } => {
            let doc: EndpointDocument =
                serde_json::from_str(&stored.body).map_err(|e| e.to_string())?;
            Object::Endpoint(Endpoint {
                name: endpoint.clone(),
                service: service.clone(),
                namespace: namespace.clone(),
                address: doc.address,
                port: doc.port,
                metadata: doc.metadata,
                original_object: original,
            })
        }
    };
    Ok(object)
}

fn id_prefix(path: &ResourcePath) -> &'static str {
    match path {
        ResourcePath::Namespace { .. } => "ns",
        ResourcePath::Service { .. } => "svc",
        ResourcePath::Endpoint { .. } => "ep",
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn hierarchy(&self) -> Hierarchy {
        self.hierarchy
    }

    async fn get(&self, key: &Key) -> Result<Located<Object>> {
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();

        let key_str = key.path.to_string();
        let Some(stored) = state.records.get(&key_str) else {
            return Err(Error::NotFound);
        };

        let object = decode(&key.path, stored).map_err(|reason| Error::InvalidRecord {
            key: key_str.clone(),
            reason,
        })?;
        Ok(Located::new(object).with_id(stored.id.clone()))
    }

    async fn create(&self, object: &Object) -> Result<Mutation<Located<Object>>> {
        self.counters.mutations.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();

        let path = object.path();
        let key = path.to_string();
        if state.records.contains_key(&key) {
            return Err(Error::AlreadyExists);
        }
        if self.hierarchy == Hierarchy::Enforced && !self.parent_exists(&state, &path) {
            return Err(Error::NotFound);
        }

        let stored = Stored {
            id: state.allocate(id_prefix(&path)),
            body: encode(object)?,
        };
        let created = decode(&path, &stored)
            .map(|object| Located::new(object).with_id(stored.id.clone()))
            .map_err(|reason| Error::InvalidRecord {
                key: key.clone(),
                reason,
            })?;

        tracing::debug!("memory backend: create {}", key);
        self.submit(&mut state, Change::Put { key, stored }, created)
    }

    async fn update(&self, key: &Key, object: &Object) -> Result<Mutation<Located<Object>>> {
        self.counters.mutations.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();

        let key_str = key.path.to_string();
        let Some(existing) = state.records.get(&key_str) else {
            return Err(Error::NotFound);
        };

        let stored = Stored {
            id: existing.id.clone(),
            body: encode(object)?,
        };
        let updated = decode(&key.path, &stored)
            .map(|object| Located::new(object).with_id(stored.id.clone()))
            .map_err(|reason| Error::InvalidRecord {
                key: key_str.clone(),
                reason,
            })?;

        tracing::debug!("memory backend: update {}", key_str);
        self.submit(
            &mut state,
            Change::Put {
                key: key_str,
                stored,
            },
            updated,
        )
    }

    async fn delete(&self, key: &Key) -> Result<Mutation<()>> {
        self.counters.mutations.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();

        let key_str = key.path.to_string();
        if !state.records.contains_key(&key_str) {
            return Err(Error::NotFound);
        }

        tracing::debug!("memory backend: delete {}", key_str);
        self.submit(&mut state, Change::Delete { key: key_str }, ())
    }

    async fn list(&self, request: &PageRequest<'_>) -> Result<Page<Object>> {
        self.counters.list_pages.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();

        if let Some(message) = state.fail_next_list.take() {
            return Err(Error::Transport(anyhow::anyhow!(message)));
        }

        let prefix = collection_prefix(request.collection);
        let start = match request.cursor {
            Some(cursor) => Bound::Excluded(cursor.to_string()),
            None => Bound::Included(prefix.clone()),
        };
        let page_size = request.page_size.max(1) as usize;

        let mut records = Vec::new();
        let mut last_key: Option<String> = None;
        let mut has_more = false;

        for (key, stored) in state.records.range::<String, _>((start, Bound::Unbounded)) {
            if !key.starts_with(&prefix) {
                break;
            }
            let name = &key[prefix.len()..];
            if name.is_empty() || name.contains('/') {
                continue;
            }
            if records.len() == page_size {
                has_more = true;
                break;
            }

            let path = request.collection.child(name);
            records.push(match decode(&path, stored) {
                Ok(object) => Record::Valid(Located::new(object).with_id(stored.id.clone())),
                Err(reason) => Record::Invalid {
                    key: key.clone(),
                    reason,
                },
            });
            last_key = Some(key.clone());
        }

        Ok(Page {
            records,
            next_cursor: if has_more { last_key } else { None },
        })
    }

    async fn operation_status(&self, operation: &OperationId) -> Result<OperationStatus> {
        self.counters.status_queries.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();

        let Some(pending) = state.operations.get_mut(operation.as_str()) else {
            return Err(Error::Transport(anyhow::anyhow!(
                "unknown operation {}",
                operation
            )));
        };

        pending.polls += 1;
        if pending.remaining > 0 {
            pending.remaining -= 1;
            let state = if pending.polls == 1 {
                OperationState::Submitted
            } else {
                OperationState::Pending
            };
            return Ok(OperationStatus::new(operation.clone(), state));
        }

        let Some(finished) = state.operations.remove(operation.as_str()) else {
            return Err(Error::Transport(anyhow::anyhow!(
                "unknown operation {}",
                operation
            )));
        };

        if let Some(message) = finished.failure {
            return Ok(
                OperationStatus::new(operation.clone(), OperationState::Fail).with_message(message),
            );
        }

        state.apply(finished.change);
        Ok(OperationStatus::new(operation.clone(), OperationState::Success))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;

    fn namespace(name: &str) -> Object {
        Object::Namespace(Namespace {
            name: name.to_string(),
            ..Default::default()
        })
    }

    async fn list_all(
        backend: &MemoryBackend,
        collection: &Collection,
        page_size: u32,
    ) -> Vec<Page<Object>> {
        let filter = Filter::none();
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = backend
                .list(&PageRequest {
                    collection,
                    cursor: cursor.as_deref(),
                    page_size,
                    filter: &filter,
                })
                .await
                .unwrap();
            cursor = page.next_cursor.clone();
            pages.push(page);
            if cursor.is_none() {
                return pages;
            }
        }
    }

    #[tokio::test]
    async fn test_create_get_roundtrip() {
        let backend = MemoryBackend::new();
        let created = backend.create(&namespace("hr")).await.unwrap();
        assert!(matches!(created, Mutation::Done(_)));

        let found = backend
            .get(&Key::new(ResourcePath::namespace("hr")))
            .await
            .unwrap();
        assert_eq!(found.object, namespace("hr"));
        assert!(found.id.unwrap().starts_with("ns-"));
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let backend = MemoryBackend::new();
        backend.create(&namespace("hr")).await.unwrap();
        assert!(matches!(
            backend.create(&namespace("hr")).await,
            Err(Error::AlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_enforced_hierarchy_rejects_orphans() {
        let backend = MemoryBackend::new().with_hierarchy(Hierarchy::Enforced);
        let service = Object::Service(Service {
            name: "payroll".into(),
            namespace: "hr".into(),
            ..Default::default()
        });
        assert!(matches!(backend.create(&service).await, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn test_list_pages_skip_deeper_keys() {
        let backend = MemoryBackend::new();
        for name in ["a", "b", "c"] {
            backend.create(&namespace(name)).await.unwrap();
        }
        backend.insert_raw("/namespaces/a/services/x", "{}");

        let pages = list_all(&backend, &Collection::Namespaces, 2).await;
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].records.len(), 2);
        assert_eq!(pages[1].records.len(), 1);
    }

    #[tokio::test]
    async fn test_list_marks_undecodable_records() {
        let backend = MemoryBackend::new();
        backend.insert_raw("/namespaces/broken", "not json");
        let pages = list_all(&backend, &Collection::Namespaces, 10).await;
        assert!(matches!(pages[0].records[0], Record::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_delete_removes_subtree() {
        let backend = MemoryBackend::new();
        backend.create(&namespace("hr")).await.unwrap();
        backend.insert_raw("/namespaces/hr/services/payroll", "{}");
        backend.insert_raw("/namespaces/hr2", "{}");

        backend
            .delete(&Key::new(ResourcePath::namespace("hr")))
            .await
            .unwrap();

        assert!(!backend.contains(&ResourcePath::namespace("hr")));
        assert!(!backend.contains(&ResourcePath::service("hr", "payroll")));
        assert!(backend.contains(&ResourcePath::namespace("hr2")));
    }

    #[tokio::test]
    async fn test_async_operation_applies_on_completion() {
        let backend = MemoryBackend::new().with_async_operations(2);
        let Mutation::Submitted(op) = backend.create(&namespace("hr")).await.unwrap() else {
            panic!("expected an operation id");
        };

        let path = ResourcePath::namespace("hr");
        assert!(!backend.contains(&path));

        let first = backend.operation_status(&op).await.unwrap();
        assert_eq!(first.state, OperationState::Submitted);
        let second = backend.operation_status(&op).await.unwrap();
        assert_eq!(second.state, OperationState::Pending);
        let third = backend.operation_status(&op).await.unwrap();
        assert_eq!(third.state, OperationState::Success);

        assert!(backend.contains(&path));
        assert!(backend.operation_status(&op).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_operation_is_not_applied() {
        let backend = MemoryBackend::new().with_async_operations(0);
        backend.fail_next_operation("quota exceeded");
        let Mutation::Submitted(op) = backend.create(&namespace("hr")).await.unwrap() else {
            panic!("expected an operation id");
        };

        let status = backend.operation_status(&op).await.unwrap();
        assert_eq!(status.state, OperationState::Fail);
        assert_eq!(status.message.as_deref(), Some("quota exceeded"));
        assert!(!backend.contains(&ResourcePath::namespace("hr")));
    }
}
