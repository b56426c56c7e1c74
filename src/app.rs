//! Page controller.
//!
//! Start-up order: restore the viewer gate from the session, otherwise sign
//! in and wait for a password. Once unlocked, the live list subscribes. Admin
//! toggles re-render the list in place.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::auth::{AdminSession, AdminState, GateError, SecurityGate, Unlocked};
use crate::prompt::HumanInput;
use crate::session::SessionStore;
use crate::status::{StatusReporter, CONNECTING, ENTER_PASSWORD};
use crate::store::{DocumentStore, IdentityProvider};
use crate::sync::{LiveList, MutationError};
use crate::{lock, Config};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    /// Password overlay shown, protected content hidden.
    Locked,
    Protected,
}

pub struct App {
    config: Config,
    identity: Arc<dyn IdentityProvider>,
    input: Arc<dyn HumanInput>,
    status: StatusReporter,
    gate: SecurityGate,
    admin: Arc<AdminSession>,
    list: LiveList,
    page: Mutex<Page>,
    signed_in: AtomicBool,
}

impl App {
    pub fn new(
        config: Config,
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        session: Arc<dyn SessionStore>,
        input: Arc<dyn HumanInput>,
    ) -> Self {
        let status = StatusReporter::new(config.status_duration);
        let gate = SecurityGate::new(
            store.clone(),
            session.clone(),
            status.clone(),
            config.credential.clone(),
            config.viewer.clone(),
        );
        let admin = Arc::new(AdminSession::new(
            store.clone(),
            session,
            status.clone(),
            input.clone(),
            config.credential.clone(),
            config.admin.clone(),
        ));
        let list = LiveList::new(store, admin.clone(), status.clone(), config.topics.clone());

        Self {
            config,
            identity,
            input,
            status,
            gate,
            admin,
            list,
            page: Mutex::new(Page::Locked),
            signed_in: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self) -> &StatusReporter {
        &self.status
    }

    pub fn list(&self) -> &LiveList {
        &self.list
    }

    pub fn admin(&self) -> &AdminSession {
        &self.admin
    }

    pub fn page(&self) -> Page {
        *lock(&self.page)
    }

    pub async fn start(&self) -> Page {
        if self.gate.restore() {
            debug!("viewer gate restored from session");
            self.show_protected().await;
            return Page::Protected;
        }

        self.status.report(CONNECTING);
        match self.connect().await {
            Ok(()) => self.status.report(ENTER_PASSWORD),
            Err(e) => self.status.report(e.status_message()),
        }
        Page::Locked
    }

    /// Submit the viewer password.
    pub async fn unlock(&self, password: &str) -> Result<Unlocked, GateError> {
        if let Err(e) = self.connect().await {
            self.status.report(e.status_message());
            return Err(e);
        }
        let unlocked = self.gate.attempt_unlock(password).await?;
        self.show_protected().await;
        Ok(unlocked)
    }

    /// Sign out of the viewer gate and stop the live list.
    pub fn lock(&self) {
        self.gate.lock();
        self.list.unsubscribe();
        *lock(&self.page) = Page::Locked;
        self.status.report(ENTER_PASSWORD);
    }

    /// Locking never touches the network; only unlocking signs in first.
    pub async fn toggle_admin(&self) -> Result<AdminState, GateError> {
        if !self.admin.is_unlocked() {
            if let Err(e) = self.connect().await {
                self.status.report(e.status_message());
                return Err(e);
            }
        }
        let result = self.admin.toggle().await;
        self.list.refresh();
        result
    }

    pub async fn add_topic(&self, title: &str, text: &str) -> Result<(), MutationError> {
        self.list.add(title, text).await
    }

    /// Delete after confirmation. `Ok(false)` when the user backed out.
    pub async fn remove_topic(&self, id: &str) -> Result<bool, MutationError> {
        if self.admin.is_unlocked() && !self.input.confirm("Delete this topic?").await {
            return Ok(false);
        }
        self.list.remove(id).await.map(|()| true)
    }

    /// Restore the most recently deleted topic.
    pub async fn undo_remove(&self) -> Result<Option<String>, MutationError> {
        self.list.restore_last().await
    }

    async fn show_protected(&self) {
        *lock(&self.page) = Page::Protected;
        if let Err(e) = self.connect().await {
            self.status.report(e.status_message());
            return;
        }
        // Failures are reported to the status line by the list.
        self.list.subscribe().await.ok();
    }

    async fn connect(&self) -> Result<(), GateError> {
        if self.signed_in.load(Ordering::SeqCst) {
            return Ok(());
        }
        match self.identity.sign_in_anonymously().await {
            Ok(identity) => {
                debug!(uid = %identity.uid, "signed in");
                self.signed_in.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "anonymous sign-in failed");
                Err(GateError::Connection(e))
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
