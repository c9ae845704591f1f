//! Presence registry: who is online, keyed by display name.
//!
//! Every operation runs under one lock, so check-and-insert (register) and
//! remove-then-insert (rename) are never observed half done.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::errors::RegistryError;
use crate::session::Session;

/// One row of the online-users listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    /// Remote endpoint.
    pub address: String,
    /// Display name.
    pub name: String,
}

/// Shared directory of online sessions.
#[derive(Default)]
pub struct PresenceRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` under its current name.
    pub fn register(&self, session: Arc<Session>) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.lock();
        let name = session.name();
        if sessions.contains_key(&name) {
            return Err(RegistryError::NameTaken(name));
        }
        debug!(session_id = %session.id(), name, "session registered");
        let _ = sessions.insert(name, session);
        Ok(())
    }

    /// Remove `session`, if it is still the entry under its current name.
    ///
    /// Returns whether an entry was removed.
    pub fn unregister(&self, session: &Session) -> bool {
        let mut sessions = self.sessions.lock();
        let name = session.name();
        let owned = sessions
            .get(&name)
            .is_some_and(|entry| entry.id() == session.id());
        if owned {
            let _ = sessions.remove(&name);
            debug!(session_id = %session.id(), name, "session unregistered");
        }
        owned
    }

    /// Move `session` from its current name to `new_name`.
    ///
    /// Returns the previous name. Fails without changing anything if
    /// `new_name` is taken (including by `session` itself) or the session is
    /// not registered.
    pub fn rename(&self, session: &Arc<Session>, new_name: &str) -> Result<String, RegistryError> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(new_name) {
            return Err(RegistryError::NameTaken(new_name.to_string()));
        }
        let old_name = session.name();
        let owned = sessions
            .get(&old_name)
            .is_some_and(|entry| entry.id() == session.id());
        if !owned {
            return Err(RegistryError::NotRegistered);
        }
        let _ = sessions.remove(&old_name);
        let _ = sessions.insert(new_name.to_string(), Arc::clone(session));
        session.set_name(new_name.to_string());
        debug!(session_id = %session.id(), old_name, new_name, "session renamed");
        Ok(old_name)
    }

    /// Find the session currently holding `name`.
    pub fn lookup(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.lock().get(name).cloned()
    }

    /// Consistent listing of everyone online, ordered by name.
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        let sessions = self.sessions.lock();
        let mut entries: Vec<PresenceEntry> = sessions
            .iter()
            .map(|(name, session)| PresenceEntry {
                address: session.address().to_string(),
                name: name.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Run `f` on every registered session while holding the lock.
    ///
    /// `f` must not block or call back into the registry. Returns the number
    /// of sessions visited.
    pub fn for_each<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&Arc<Session>),
    {
        let sessions = self.sessions.lock();
        for session in sessions.values() {
            f(session);
        }
        sessions.len()
    }

    /// Whether `name` is currently held.
    pub fn contains(&self, name: &str) -> bool {
        self.sessions.lock().contains_key(name)
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether nobody is online.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
