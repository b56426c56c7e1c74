//! Remote document store capability and the sled-backed local adapter.
//!
//! The rest of the crate only talks to [`DocumentStore`] and [`IdentityProvider`].
//! `SledStore` keeps one sled tree per collection and wakes every watcher of a
//! collection after each committed write, the watcher then re-reads the whole
//! ordered collection.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use rand::Rng;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::lock;

/// Field map of a single document.
pub type Fields = Map<String, Value>;

/// Full ordered snapshots of a watched collection, one per committed change.
pub type SnapshotStream = BoxStream<'static, Result<Vec<Document>, StoreError>>;

const GENERATED_ID_LEN: usize = 20;
const WATCH_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocRef {
    pub collection: String,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for DocRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A whole-collection query ordered on a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionQuery {
    pub collection: String,
    pub order_by: String,
    pub direction: Direction,
}

impl CollectionQuery {
    pub fn new(collection: impl Into<String>, order_by: impl Into<String>, direction: Direction) -> Self {
        Self {
            collection: collection.into(),
            order_by: order_by.into(),
            direction,
        }
    }
}

/// Opaque result of anonymous sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not signed in")]
    Unauthenticated,

    #[error("permission denied on {0}")]
    PermissionDenied(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed document: {0}")]
    Malformed(String),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Malformed(e.to_string())
    }
}

// ============================================================================
// Capabilities
// ============================================================================

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document. `Ok(None)` when it does not exist.
    async fn get(&self, doc: &DocRef) -> Result<Option<Fields>, StoreError>;

    /// Write one document, either replacing it or merging into existing fields.
    async fn set(&self, doc: &DocRef, fields: Fields, merge: bool) -> Result<(), StoreError>;

    /// Insert a document under a store-assigned id and return that id.
    async fn add(&self, collection: &str, fields: Fields) -> Result<String, StoreError>;

    async fn delete(&self, doc: &DocRef) -> Result<(), StoreError>;

    /// Watch a collection. The stream yields the current snapshot first, then
    /// a fresh full snapshot after every committed change. Documents lacking
    /// the order field are not part of the result.
    async fn watch(&self, query: &CollectionQuery) -> Result<SnapshotStream, StoreError>;
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in_anonymously(&self) -> Result<Identity, StoreError>;
}

// ============================================================================
// Sled Adapter
// ============================================================================

struct Backend {
    db: sled::Db,
    denied_reads: Mutex<HashSet<String>>,
    watchers: Mutex<HashMap<String, broadcast::Sender<()>>>,
}

/// One client's handle onto a sled-backed document space.
///
/// Handles created with [`SledStore::client`] share the documents and change
/// notifications but sign in independently, like two tabs on one backend.
#[derive(Clone)]
pub struct SledStore {
    backend: Arc<Backend>,
    identity: Arc<Mutex<Option<Identity>>>,
}

impl SledStore {
    pub fn new(db: sled::Db) -> Self {
        Self {
            backend: Arc::new(Backend {
                db,
                denied_reads: Mutex::new(HashSet::new()),
                watchers: Mutex::new(HashMap::new()),
            }),
            identity: Arc::new(Mutex::new(None)),
        }
    }

    /// A store over a throwaway database, removed when the last handle drops.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::new(db))
    }

    /// A second, not yet signed-in client onto the same documents.
    pub fn client(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            identity: Arc::new(Mutex::new(None)),
        }
    }

    /// Refuse reads and watches on `collection` for every client.
    pub fn deny_reads(&self, collection: &str) {
        lock(&self.backend.denied_reads).insert(collection.to_string());
    }

    pub fn identity(&self) -> Option<Identity> {
        lock(&self.identity).clone()
    }

    fn require_identity(&self) -> Result<(), StoreError> {
        match *lock(&self.identity) {
            Some(_) => Ok(()),
            None => Err(StoreError::Unauthenticated),
        }
    }

    fn require_read(&self, collection: &str) -> Result<(), StoreError> {
        self.require_identity()?;
        if lock(&self.backend.denied_reads).contains(collection) {
            return Err(StoreError::PermissionDenied(collection.to_string()));
        }
        Ok(())
    }

    fn tree(&self, collection: &str) -> Result<sled::Tree, StoreError> {
        Ok(self.backend.db.open_tree(format!("docs:{}", collection))?)
    }

    fn notify(&self, collection: &str) {
        if let Some(tx) = lock(&self.backend.watchers).get(collection) {
            // No receivers is fine.
            tx.send(()).ok();
        }
    }

    fn watcher(&self, collection: &str) -> broadcast::Receiver<()> {
        lock(&self.backend.watchers)
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(WATCH_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn load(&self, tree: &sled::Tree, id: &str) -> Result<Option<Fields>, StoreError> {
        match tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write(&self, doc: &DocRef, fields: &Fields) -> Result<(), StoreError> {
        let tree = self.tree(&doc.collection)?;
        tree.insert(doc.id.as_bytes(), serde_json::to_vec(fields)?)?;
        tree.flush()?;
        Ok(())
    }

    fn snapshot(&self, query: &CollectionQuery) -> Result<Vec<Document>, StoreError> {
        self.require_read(&query.collection)?;
        let tree = self.tree(&query.collection)?;

        let mut docs = Vec::new();
        for entry in tree.iter() {
            let (key, value) = entry?;
            let fields: Fields = serde_json::from_slice(&value)?;
            if !fields.contains_key(&query.order_by) {
                continue;
            }
            docs.push(Document {
                id: String::from_utf8_lossy(&key).into_owned(),
                fields,
            });
        }

        sort_documents(&mut docs, &query.order_by, query.direction);
        Ok(docs)
    }
}

#[async_trait]
impl DocumentStore for SledStore {
    async fn get(&self, doc: &DocRef) -> Result<Option<Fields>, StoreError> {
        self.require_read(&doc.collection)?;
        let tree = self.tree(&doc.collection)?;
        self.load(&tree, &doc.id)
    }

    async fn set(&self, doc: &DocRef, fields: Fields, merge: bool) -> Result<(), StoreError> {
        self.require_identity()?;
        let fields = if merge {
            let tree = self.tree(&doc.collection)?;
            let mut existing = self.load(&tree, &doc.id)?.unwrap_or_default();
            existing.extend(fields);
            existing
        } else {
            fields
        };
        self.write(doc, &fields)?;
        self.notify(&doc.collection);
        Ok(())
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        self.require_identity()?;
        let id = generate_id();
        self.write(&DocRef::new(collection, id.as_str()), &fields)?;
        debug!(collection, id = %id, "document added");
        self.notify(collection);
        Ok(id)
    }

    async fn delete(&self, doc: &DocRef) -> Result<(), StoreError> {
        self.require_identity()?;
        let tree = self.tree(&doc.collection)?;
        if tree.remove(doc.id.as_bytes())?.is_some() {
            tree.flush()?;
            debug!(doc = %doc, "document deleted");
            self.notify(&doc.collection);
        }
        Ok(())
    }

    async fn watch(&self, query: &CollectionQuery) -> Result<SnapshotStream, StoreError> {
        // Subscribe before the first read so no commit falls between them.
        let rx = self.watcher(&query.collection);
        let initial = self.snapshot(query)?;

        let updates = stream::unfold(
            (self.clone(), query.clone(), rx),
            |(store, query, mut rx)| async move {
                match rx.recv().await {
                    Ok(()) | Err(RecvError::Lagged(_)) => {
                        let snapshot = store.snapshot(&query);
                        Some((snapshot, (store, query, rx)))
                    }
                    Err(RecvError::Closed) => None,
                }
            },
        );

        Ok(stream::once(async move { Ok(initial) }).chain(updates).boxed())
    }
}

#[async_trait]
impl IdentityProvider for SledStore {
    async fn sign_in_anonymously(&self) -> Result<Identity, StoreError> {
        let mut current = lock(&self.identity);
        if let Some(identity) = current.as_ref() {
            return Ok(identity.clone());
        }
        let identity = Identity {
            uid: format!("anon-{}", generate_id()),
        };
        debug!(uid = %identity.uid, "signed in anonymously");
        *current = Some(identity.clone());
        Ok(identity)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(GENERATED_ID_LEN)
        .map(char::from)
        .collect()
}

/// Order by `field`, ties broken by id so equal keys keep a stable order.
fn sort_documents(docs: &mut [Document], field: &str, direction: Direction) {
    docs.sort_by(|a, b| {
        let ord = match (a.fields.get(field), b.fields.get(field)) {
            (Some(x), Some(y)) => compare_values(x, y),
            _ => Ordering::Equal,
        };
        let ord = match direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        };
        ord.then_with(|| a.id.cmp(&b.id))
    });
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

// ============================================================================
// Tests
// ============================================================================
