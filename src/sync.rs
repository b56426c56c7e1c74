//! Live topic list.
//!
//! One forwarding task per subscription drains the store's snapshot stream.
//! Each snapshot replaces the whole view and is published as a new [`Frame`].
//! Mutations go to the store only; the view changes when the store echoes the
//! change back through the subscription.
//!
//! Deleting first copies the record into a single undo document, so the most
//! recent delete from any client can be restored.
//!
//! Every subscription carries an epoch. The forwarding task checks its epoch
//! and publishes under the same mutex that `unsubscribe` takes to bump it, so
//! nothing from a cancelled watch is published after `unsubscribe` returns.

use futures_util::StreamExt;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::auth::AdminSession;
use crate::{lock, UNDO_COLLECTION};
use crate::models::{new_topic_fields, Frame, LiveView};
use crate::status::StatusReporter;
use crate::store::{CollectionQuery, DocRef, DocumentStore, Fields, SnapshotStream, StoreError};

// ============================================================================
// States and Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Unsubscribed,
    Subscribing,
    Live,
    Errored(SyncError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("subscription failed: {0}")]
    Subscription(StoreError),
}

impl SyncError {
    pub fn status_message(&self) -> String {
        match self {
            SyncError::Subscription(StoreError::PermissionDenied(what)) => {
                format!("❌ Live list refused: permission denied on {}", what)
            }
            SyncError::Subscription(e) => format!("❌ Live list failed: {}", e),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    #[error("admin required")]
    NotAuthorized,

    #[error("title and text are required")]
    InvalidInput,

    #[error("connection failed: {0}")]
    Connection(#[from] StoreError),
}

impl MutationError {
    pub fn status_message(&self) -> String {
        match self {
            MutationError::NotAuthorized => "❌ Admin required".to_string(),
            MutationError::InvalidInput => "Please enter title and text.".to_string(),
            MutationError::Connection(_) => "❌ Connection failed (see log)".to_string(),
        }
    }
}

// ============================================================================
// Shared State
// ============================================================================

struct ListShared {
    view: LiveView,
    state: SyncState,
    epoch: u64,
    revision: u64,
    frames: watch::Sender<Frame>,
}

impl ListShared {
    fn publish(&mut self, admin: bool) {
        self.revision += 1;
        self.frames.send_replace(Frame {
            revision: self.revision,
            view: self.view.clone(),
            admin,
        });
    }

    /// Invalidate the current subscription, if any.
    fn cancel(&mut self) {
        self.epoch += 1;
        self.state = SyncState::Unsubscribed;
    }
}

/// Cancels one subscription. Cancelling a subscription that has already been
/// replaced or cancelled does nothing.
pub struct SubscriptionHandle {
    shared: Arc<Mutex<ListShared>>,
    epoch: u64,
    task: Option<AbortHandle>,
}

impl SubscriptionHandle {
    pub fn is_active(&self) -> bool {
        lock(&self.shared).epoch == self.epoch
    }

    pub fn cancel(&self) {
        {
            let mut shared = lock(&self.shared);
            if shared.epoch != self.epoch {
                return;
            }
            shared.cancel();
        }
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

// ============================================================================
// Live List
// ============================================================================

pub struct LiveList {
    store: Arc<dyn DocumentStore>,
    admin: Arc<AdminSession>,
    status: StatusReporter,
    query: CollectionQuery,
    undo: DocRef,
    shared: Arc<Mutex<ListShared>>,
    task: Mutex<Option<AbortHandle>>,
    clock: Clock,
}

impl LiveList {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        admin: Arc<AdminSession>,
        status: StatusReporter,
        query: CollectionQuery,
    ) -> Self {
        let (frames, _) = watch::channel(Frame::default());
        let undo = DocRef::new(UNDO_COLLECTION, format!("{}_undo", query.collection));
        Self {
            store,
            admin,
            status,
            query,
            undo,
            shared: Arc::new(Mutex::new(ListShared {
                view: LiveView::default(),
                state: SyncState::Unsubscribed,
                epoch: 0,
                revision: 0,
                frames,
            })),
            task: Mutex::new(None),
            clock: Arc::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Replace the clock used to stamp `createdAt` (milliseconds).
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn state(&self) -> SyncState {
        lock(&self.shared).state.clone()
    }

    pub fn view(&self) -> LiveView {
        lock(&self.shared).view.clone()
    }

    /// Receiver of every published frame.
    pub fn frames(&self) -> watch::Receiver<Frame> {
        lock(&self.shared).frames.subscribe()
    }

    /// Start watching the collection, replacing any previous subscription.
    pub async fn subscribe(&self) -> Result<SubscriptionHandle, SyncError> {
        let epoch = {
            let mut shared = lock(&self.shared);
            shared.cancel();
            shared.state = SyncState::Subscribing;
            shared.epoch
        };
        self.abort_task();
        debug!(collection = %self.query.collection, epoch, "subscribing");

        let stream = match self.store.watch(&self.query).await {
            Ok(stream) => stream,
            Err(e) => {
                let err = SyncError::Subscription(e);
                fail(&self.shared, &self.status, epoch, &err);
                return Err(err);
            }
        };

        // Cancelled while the watch was being set up.
        if lock(&self.shared).epoch != epoch {
            return Ok(SubscriptionHandle {
                shared: self.shared.clone(),
                epoch,
                task: None,
            });
        }

        let join = tokio::spawn(forward(
            stream,
            self.shared.clone(),
            self.admin.clone(),
            self.status.clone(),
            epoch,
        ));
        *lock(&self.task) = Some(join.abort_handle());

        Ok(SubscriptionHandle {
            shared: self.shared.clone(),
            epoch,
            task: Some(join.abort_handle()),
        })
    }

    /// Stop watching. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        lock(&self.shared).cancel();
        self.abort_task();
    }

    /// Republish the current view, e.g. after the admin gate changed.
    pub fn refresh(&self) {
        let admin = self.admin.is_unlocked();
        lock(&self.shared).publish(admin);
    }

    pub async fn add(&self, title: &str, text: &str) -> Result<(), MutationError> {
        if !self.admin.is_unlocked() {
            return Err(self.reject(MutationError::NotAuthorized));
        }

        let title = title.trim();
        let text = text.trim();
        if title.is_empty() || text.is_empty() {
            return Err(self.reject(MutationError::InvalidInput));
        }

        let fields = new_topic_fields(title, text, (self.clock)());
        match self.store.add(&self.query.collection, fields).await {
            Ok(id) => {
                info!(id = %id, "topic added");
                self.status.flash("✅ Topic added");
                Ok(())
            }
            Err(e) => Err(self.reject(MutationError::Connection(e))),
        }
    }

    pub async fn remove(&self, id: &str) -> Result<(), MutationError> {
        if !self.admin.is_unlocked() {
            return Err(self.reject(MutationError::NotAuthorized));
        }

        let target = DocRef::new(self.query.collection.as_str(), id);
        if let Err(e) = self.save_undo(&target).await {
            return Err(self.reject(MutationError::Connection(e)));
        }

        match self.store.delete(&target).await {
            Ok(()) => {
                info!(id, "topic deleted");
                self.status.flash("Topic deleted");
                Ok(())
            }
            Err(e) => Err(self.reject(MutationError::Connection(e))),
        }
    }

    /// Put the last deleted topic back under its old id.
    ///
    /// Returns the restored id, or `None` when there is nothing to undo.
    pub async fn restore_last(&self) -> Result<Option<String>, MutationError> {
        if !self.admin.is_unlocked() {
            return Err(self.reject(MutationError::NotAuthorized));
        }

        let record = match self.store.get(&self.undo).await {
            Ok(record) => record,
            Err(e) => return Err(self.reject(MutationError::Connection(e))),
        };
        let (id, fields) = match record.as_ref().and_then(parse_undo) {
            Some(parsed) => parsed,
            None => {
                if record.is_some() {
                    warn!(doc = %self.undo, "ignoring malformed undo record");
                }
                self.status.flash("Nothing to undo");
                return Ok(None);
            }
        };

        let target = DocRef::new(self.query.collection.as_str(), id.as_str());
        let restored = async {
            self.store.set(&target, fields, false).await?;
            self.store.delete(&self.undo).await
        };
        match restored.await {
            Ok(()) => {
                info!(id = %id, "topic restored");
                self.status.flash("✅ Topic restored");
                Ok(Some(id))
            }
            Err(e) => Err(self.reject(MutationError::Connection(e))),
        }
    }

    async fn save_undo(&self, target: &DocRef) -> Result<(), StoreError> {
        let fields = match self.store.get(target).await? {
            Some(fields) => fields,
            None => {
                debug!(doc = %target, "nothing to snapshot");
                return Ok(());
            }
        };
        let mut record = Fields::new();
        record.insert(
            "meta".to_string(),
            json!({ "label": "delete", "at": chrono::Utc::now().to_rfc3339() }),
        );
        record.insert("id".to_string(), Value::from(target.id.as_str()));
        record.insert("fields".to_string(), Value::Object(fields));
        self.store.set(&self.undo, record, false).await
    }

    fn reject(&self, err: MutationError) -> MutationError {
        warn!(error = %err, "topic change rejected");
        self.status.report(err.status_message());
        err
    }

    fn abort_task(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

impl Drop for LiveList {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn parse_undo(record: &Fields) -> Option<(String, Fields)> {
    let id = record.get("id")?.as_str()?.to_string();
    let fields = record.get("fields")?.as_object()?.clone();
    Some((id, fields))
}

fn fail(shared: &Mutex<ListShared>, status: &StatusReporter, epoch: u64, err: &SyncError) {
    {
        let mut shared = lock(shared);
        if shared.epoch != epoch {
            return;
        }
        shared.state = SyncState::Errored(err.clone());
    }
    warn!(error = %err, "live list errored");
    status.report(err.status_message());
}

async fn forward(
    mut stream: SnapshotStream,
    shared: Arc<Mutex<ListShared>>,
    admin: Arc<AdminSession>,
    status: StatusReporter,
    epoch: u64,
) {
    while let Some(item) = stream.next().await {
        let docs = match item {
            Ok(docs) => docs,
            Err(e) => {
                fail(&shared, &status, epoch, &SyncError::Subscription(e));
                return;
            }
        };

        let admin = admin.is_unlocked();
        let mut guard = lock(&shared);
        if guard.epoch != epoch {
            return;
        }
        guard.view = LiveView::from_documents(docs);
        guard.state = SyncState::Live;
        guard.publish(admin);
        debug!(revision = guard.revision, topics = guard.view.len(), "view replaced");
    }
}

// ============================================================================
// Tests
// ============================================================================
