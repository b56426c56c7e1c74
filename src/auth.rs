//! Password gates.
//!
//! Both gates compare the SHA-256 fingerprint of a submitted password with a
//! fingerprint read from the credential record on every attempt. A gate whose
//! hash field is missing from the record can never be unlocked.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::prompt::HumanInput;
use crate::session::{SessionStore, FLAG_SET};
use crate::status::{StatusReporter, CHECKING};
use crate::store::{DocRef, DocumentStore, Fields, StoreError};
use crate::GateConfig;

// ============================================================================
// Fingerprints
// ============================================================================

/// Lowercase hex SHA-256 of `input`.
pub fn fingerprint(input: &str) -> String {
    hex_encode(&Sha256::digest(input.as_bytes()))
}

/// Encode bytes as hexadecimal
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Store the fingerprint of `password` under `field` in the credential record,
/// keeping the record's other fields.
pub async fn provision(
    store: &dyn DocumentStore,
    credential: &DocRef,
    field: &str,
    password: &str,
) -> Result<(), StoreError> {
    let mut fields = Fields::new();
    fields.insert(field.to_string(), Value::from(fingerprint(password)));
    store.set(credential, fields, true).await
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("missing {field} in {record}")]
    ConfigMissing { field: String, record: String },

    #[error("wrong password")]
    WrongPassword,

    #[error("connection failed: {0}")]
    Connection(#[from] StoreError),
}

impl GateError {
    pub fn status_message(&self) -> String {
        match self {
            GateError::ConfigMissing { field, record } => {
                format!("❌ Missing {} in {} (backend configuration)", field, record)
            }
            GateError::WrongPassword => "❌ Wrong password".to_string(),
            GateError::Connection(_) => "❌ Connection failed (see log)".to_string(),
        }
    }
}

/// Proof that a gate was just unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unlocked;

async fn check_password(
    store: &dyn DocumentStore,
    credential: &DocRef,
    field: &str,
    password: &str,
) -> Result<(), GateError> {
    let record = store.get(credential).await?.unwrap_or_default();

    let expected = match record.get(field).and_then(Value::as_str) {
        Some(hash) if !hash.is_empty() => hash,
        _ => {
            return Err(GateError::ConfigMissing {
                field: field.to_string(),
                record: credential.to_string(),
            })
        }
    };

    if fingerprint(password) != expected {
        return Err(GateError::WrongPassword);
    }
    Ok(())
}

// ============================================================================
// Viewer Gate
// ============================================================================

/// Gate in front of the protected content.
pub struct SecurityGate {
    store: Arc<dyn DocumentStore>,
    session: Arc<dyn SessionStore>,
    status: StatusReporter,
    credential: DocRef,
    config: GateConfig,
}

impl SecurityGate {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        session: Arc<dyn SessionStore>,
        status: StatusReporter,
        credential: DocRef,
        config: GateConfig,
    ) -> Self {
        Self {
            store,
            session,
            status,
            credential,
            config,
        }
    }

    /// Whether this session already unlocked the gate. Never touches the store.
    pub fn restore(&self) -> bool {
        self.session.is_set(&self.config.session_key)
    }

    pub async fn attempt_unlock(&self, password: &str) -> Result<Unlocked, GateError> {
        self.status.report(CHECKING);

        match check_password(
            self.store.as_ref(),
            &self.credential,
            &self.config.hash_field,
            password,
        )
        .await
        {
            Ok(()) => {
                self.session.set(&self.config.session_key, FLAG_SET);
                info!(key = %self.config.session_key, "gate unlocked");
                self.status.flash("✅ OK");
                Ok(Unlocked)
            }
            Err(e) => {
                warn!(key = %self.config.session_key, error = %e, "unlock failed");
                self.status.report(e.status_message());
                Err(e)
            }
        }
    }

    /// Forget the unlock for this session.
    pub fn lock(&self) {
        self.session.remove(&self.config.session_key);
        debug!(key = %self.config.session_key, "gate locked");
    }
}

// ============================================================================
// Admin Gate
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminState {
    Locked,
    Unlocked,
}

/// Second gate, independent of [`SecurityGate`], guarding list mutations.
pub struct AdminSession {
    store: Arc<dyn DocumentStore>,
    session: Arc<dyn SessionStore>,
    status: StatusReporter,
    input: Arc<dyn HumanInput>,
    credential: DocRef,
    config: GateConfig,
}

impl AdminSession {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        session: Arc<dyn SessionStore>,
        status: StatusReporter,
        input: Arc<dyn HumanInput>,
        credential: DocRef,
        config: GateConfig,
    ) -> Self {
        Self {
            store,
            session,
            status,
            input,
            credential,
            config,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.session.is_set(&self.config.session_key)
    }

    pub fn state(&self) -> AdminState {
        if self.is_unlocked() {
            AdminState::Unlocked
        } else {
            AdminState::Locked
        }
    }

    /// Lock when unlocked (no I/O). Otherwise ask for the admin password and
    /// check it; a cancelled or empty prompt leaves the session locked.
    ///
    /// Callers re-render dependent views after this returns.
    pub async fn toggle(&self) -> Result<AdminState, GateError> {
        if self.is_unlocked() {
            self.session.remove(&self.config.session_key);
            info!("admin locked");
            self.status.flash("Admin locked");
            return Ok(AdminState::Locked);
        }

        let password = match self.input.prompt("Admin password:").await {
            Some(p) if !p.is_empty() => p,
            _ => {
                debug!("admin prompt cancelled");
                return Ok(AdminState::Locked);
            }
        };

        self.status.report(CHECKING);
        match check_password(
            self.store.as_ref(),
            &self.credential,
            &self.config.hash_field,
            &password,
        )
        .await
        {
            Ok(()) => {
                self.session.set(&self.config.session_key, FLAG_SET);
                info!("admin unlocked");
                self.status.flash("✅ Admin unlocked");
                Ok(AdminState::Unlocked)
            }
            Err(e) => {
                warn!(error = %e, "admin unlock failed");
                self.status.report(e.status_message());
                Err(e)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
