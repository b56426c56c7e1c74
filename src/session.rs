//! Session-scoped flag storage.
//!
//! Flags live for one client session: they survive re-creating the gate
//! components (a reload) but not the end of the process.

use tracing::warn;

/// Value stored under a gate key while that gate is unlocked.
pub const FLAG_SET: &str = "1";

pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);

    /// Whether `key` holds [`FLAG_SET`].
    fn is_set(&self, key: &str) -> bool {
        self.get(key).as_deref() == Some(FLAG_SET)
    }
}

/// Session flags in a temporary sled database, discarded on drop.
pub struct SledSession {
    _db: sled::Db,
    tree: sled::Tree,
}

impl SledSession {
    pub fn temporary() -> Result<Self, sled::Error> {
        let db = sled::Config::new().temporary(true).open()?;
        let tree = db.open_tree("session")?;
        Ok(Self { _db: db, tree })
    }
}

impl SessionStore for SledSession {
    fn get(&self, key: &str) -> Option<String> {
        match self.tree.get(key.as_bytes()) {
            Ok(value) => value.map(|v| String::from_utf8_lossy(&v).into_owned()),
            Err(e) => {
                warn!(key, error = %e, "session read failed");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) {
        if let Err(e) = self.tree.insert(key.as_bytes(), value.as_bytes()) {
            warn!(key, error = %e, "session write failed");
        }
    }

    fn remove(&self, key: &str) {
        if let Err(e) = self.tree.remove(key.as_bytes()) {
            warn!(key, error = %e, "session remove failed");
        }
    }
}
