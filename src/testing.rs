//! Test doubles shared by the module tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

use crate::auth::provision;
use crate::models::Frame;
use crate::prompt::HumanInput;
use crate::store::{
    CollectionQuery, DocRef, DocumentStore, Fields, IdentityProvider, SledStore, SnapshotStream,
    StoreError,
};
use crate::{lock, Config};

pub(crate) fn test_config() -> Config {
    Config::default()
}

// ============================================================================
// Counting Store
// ============================================================================

/// Wraps a signed-in `SledStore`, counting calls and optionally failing them.
pub(crate) struct CountingStore {
    inner: SledStore,
    gets: AtomicUsize,
    writes: AtomicUsize,
    watches: AtomicUsize,
    failure: Mutex<Option<StoreError>>,
}

impl CountingStore {
    pub(crate) fn new(inner: SledStore) -> Self {
        Self {
            inner,
            gets: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            watches: AtomicUsize::new(0),
            failure: Mutex::new(None),
        }
    }

    /// Fresh backend whose credential record holds fingerprints for the given
    /// passwords. Seeding is not counted.
    pub(crate) async fn seeded(viewer: Option<&str>, admin: Option<&str>) -> Self {
        let config = test_config();
        let store = SledStore::temporary().unwrap();
        store.sign_in_anonymously().await.unwrap();
        if let Some(pw) = viewer {
            provision(&store, &config.credential, &config.viewer.hash_field, pw)
                .await
                .unwrap();
        }
        if let Some(pw) = admin {
            provision(&store, &config.credential, &config.admin.hash_field, pw)
                .await
                .unwrap();
        }
        Self::new(store)
    }

    pub(crate) fn into_inner(self) -> SledStore {
        self.inner
    }

    pub(crate) fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> usize {
        self.gets() + self.writes.load(Ordering::SeqCst) + self.watches.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_with(&self, err: StoreError) {
        *lock(&self.failure) = Some(err);
    }

    pub(crate) fn recover(&self) {
        *lock(&self.failure) = None;
    }

    fn check(&self) -> Result<(), StoreError> {
        match lock(&self.failure).clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for CountingStore {
    async fn get(&self, doc: &DocRef) -> Result<Option<Fields>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.get(doc).await
    }

    async fn set(&self, doc: &DocRef, fields: Fields, merge: bool) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.set(doc, fields, merge).await
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.add(collection, fields).await
    }

    async fn delete(&self, doc: &DocRef) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.delete(doc).await
    }

    async fn watch(&self, query: &CollectionQuery) -> Result<SnapshotStream, StoreError> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.watch(query).await
    }
}

#[async_trait]
impl IdentityProvider for CountingStore {
    async fn sign_in_anonymously(&self) -> Result<crate::store::Identity, StoreError> {
        self.check()?;
        self.inner.sign_in_anonymously().await
    }
}

// ============================================================================
// Scripted Input
// ============================================================================

/// Answers prompts from a fixed script; an exhausted script cancels.
pub(crate) struct ScriptedInput {
    answers: Mutex<VecDeque<Option<String>>>,
    prompts: AtomicUsize,
}

impl ScriptedInput {
    pub(crate) fn new(answers: Vec<Option<&str>>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().map(|a| a.map(str::to_string)).collect()),
            prompts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HumanInput for ScriptedInput {
    async fn prompt(&self, _message: &str) -> Option<String> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        lock(&self.answers).pop_front().flatten()
    }
}

// ============================================================================
// Frames
// ============================================================================

/// Wait until a published frame satisfies `pred`.
pub(crate) async fn wait_for_frame(
    frames: &mut watch::Receiver<Frame>,
    pred: impl Fn(&Frame) -> bool,
) -> Frame {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let frame = frames.borrow_and_update();
                if pred(&frame) {
                    return (*frame).clone();
                }
            }
            frames.changed().await.expect("frame sender dropped");
        }
    })
    .await
    .expect("timed out waiting for frame")
}
