//! Registry of active session ids per authenticated user.
//!
//! External collaborator used by user-destination resolution; this crate
//! only registers and deregisters sessions as they connect and close.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Maps an authenticated user name to the ids of their active sessions.
pub trait UserSessionRegistry: Send + Sync {
    fn register(&self, user: &str, session_id: &str);

    fn unregister(&self, user: &str, session_id: &str);
}

/// In-memory registry (single-process; not persistent).
#[derive(Default)]
pub struct InMemorySessionRegistry {
    sessions: RwLock<HashMap<String, HashSet<String>>>,
}

impl InMemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active session ids for `user`, empty when none.
    pub fn session_ids(&self, user: &str) -> HashSet<String> {
        self.sessions
            .read()
            .map(|map| map.get(user).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl UserSessionRegistry for InMemorySessionRegistry {
    fn register(&self, user: &str, session_id: &str) {
        if let Ok(mut map) = self.sessions.write() {
            map.entry(user.to_string())
                .or_default()
                .insert(session_id.to_string());
        }
    }

    fn unregister(&self, user: &str, session_id: &str) {
        if let Ok(mut map) = self.sessions.write() {
            if let Some(ids) = map.get_mut(user) {
                ids.remove(session_id);
                if ids.is_empty() {
                    map.remove(user);
                }
            }
        }
    }
}
