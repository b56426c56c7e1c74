//! topicgate library - password-gated access to a live, admin-curated topic list.
//!
//! - `auth`: fingerprints, the viewer gate and the admin gate
//! - `session`: session-scoped unlock flags
//! - `store`: document store capability and the sled adapter
//! - `sync`: the live topic list
//! - `status`: the status line
//! - `templates`: list rendering
//! - `app`: wires the pieces into one page controller

use std::env;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub mod app;
pub mod auth;
pub mod models;
pub mod prompt;
pub mod session;
pub mod status;
pub mod store;
pub mod sync;
pub mod templates;

#[cfg(test)]
pub(crate) mod testing;

use store::{CollectionQuery, DocRef, Direction};

// ============================================================================
// Configuration
// ============================================================================

pub const DB_PATH: &str = ".topicgate_db";
pub const CREDENTIAL_COLLECTION: &str = "config";
pub const CREDENTIAL_ID: &str = "security";
pub const TOPICS_COLLECTION: &str = "catTopics";
/// Holds `<collection>_undo`, the last deleted topic of each list.
pub const UNDO_COLLECTION: &str = "state";
pub const ORDER_FIELD: &str = models::CREATED_AT_FIELD;
pub const VIEWER_SESSION_KEY: &str = "kcUnlocked";
pub const VIEWER_HASH_FIELD: &str = "passwordHash";
pub const ADMIN_SESSION_KEY: &str = "catAdminUnlocked";
pub const ADMIN_HASH_FIELD: &str = "adminHash";
pub const STATUS_CLEAR_MS: u64 = 3000;

/// Which session flag a gate sets and which credential field it checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    pub session_key: String,
    pub hash_field: String,
}

impl GateConfig {
    pub fn new(session_key: impl Into<String>, hash_field: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            hash_field: hash_field.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub credential: DocRef,
    pub topics: CollectionQuery,
    pub viewer: GateConfig,
    pub admin: GateConfig,
    pub status_duration: Duration,
}

impl Config {
    /// Defaults, overridden by `TOPICGATE_*` environment variables.
    pub fn from_env() -> Self {
        let status_ms = match env::var("TOPICGATE_STATUS_MS") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "ignoring invalid TOPICGATE_STATUS_MS");
                STATUS_CLEAR_MS
            }),
            Err(_) => STATUS_CLEAR_MS,
        };

        Self {
            db_path: PathBuf::from(env_or("TOPICGATE_DB", DB_PATH)),
            credential: DocRef::new(CREDENTIAL_COLLECTION, CREDENTIAL_ID),
            topics: CollectionQuery::new(
                env_or("TOPICGATE_COLLECTION", TOPICS_COLLECTION),
                env_or("TOPICGATE_ORDER_FIELD", ORDER_FIELD),
                Direction::Descending,
            ),
            viewer: GateConfig::new(
                env_or("TOPICGATE_VIEWER_KEY", VIEWER_SESSION_KEY),
                env_or("TOPICGATE_VIEWER_FIELD", VIEWER_HASH_FIELD),
            ),
            admin: GateConfig::new(
                env_or("TOPICGATE_ADMIN_KEY", ADMIN_SESSION_KEY),
                env_or("TOPICGATE_ADMIN_FIELD", ADMIN_HASH_FIELD),
            ),
            status_duration: Duration::from_millis(status_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DB_PATH),
            credential: DocRef::new(CREDENTIAL_COLLECTION, CREDENTIAL_ID),
            topics: CollectionQuery::new(TOPICS_COLLECTION, ORDER_FIELD, Direction::Descending),
            viewer: GateConfig::new(VIEWER_SESSION_KEY, VIEWER_HASH_FIELD),
            admin: GateConfig::new(ADMIN_SESSION_KEY, ADMIN_HASH_FIELD),
            status_duration: Duration::from_millis(STATUS_CLEAR_MS),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Lock a mutex, ignoring poisoning; guarded state is always left consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// Re-export commonly used types
pub use app::{App, Page};
pub use auth::{fingerprint, provision, AdminSession, AdminState, GateError, SecurityGate, Unlocked};
pub use models::{Frame, LiveView, Topic};
pub use prompt::{HumanInput, StdinInput};
pub use session::{SessionStore, SledSession};
pub use status::StatusReporter;
pub use store::{DocumentStore, IdentityProvider, SledStore, StoreError};
pub use sync::{LiveList, MutationError, SubscriptionHandle, SyncError, SyncState};
pub use templates::{render_html, render_text};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_keys_are_distinct() {
        let config = Config::default();
        assert_ne!(config.viewer.session_key, config.admin.session_key);
        assert_ne!(config.viewer.hash_field, config.admin.hash_field);
        assert_eq!(config.credential.to_string(), "config/security");
        assert_eq!(config.topics.order_by, "createdAt");
        assert_eq!(config.topics.direction, Direction::Descending);
    }

    #[test]
    fn test_lock_survives_poison() {
        let m = std::sync::Arc::new(Mutex::new(1));
        let m2 = m.clone();
        std::thread::spawn(move || {
            let _g = m2.lock().unwrap();
            panic!("poison");
        })
        .join()
        .ok();
        assert_eq!(*lock(&m), 1);
    }
}
