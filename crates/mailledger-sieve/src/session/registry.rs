//! Application-owned collection of sessions.

use std::collections::BTreeMap;
use std::fmt;

use super::Session;

/// Opaque handle naming a session in a [`SessionRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Sessions keyed by [`SessionId`].
///
/// Handles are never reused within one registry.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, Session>,
    next: u64,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session and returns its handle.
    pub fn create(&mut self, session: Session) -> SessionId {
        self.next += 1;
        let id = SessionId(self.next);
        self.sessions.insert(id, session);
        id
    }

    /// Returns the session for a handle.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Returns the session for a handle, mutably.
    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Removes a session and disconnects it gracefully.
    ///
    /// Returns false if the handle is unknown.
    pub async fn remove(&mut self, id: SessionId) -> bool {
        match self.sessions.remove(&id) {
            Some(mut session) => {
                session.disconnect(false).await;
                true
            }
            None => false,
        }
    }

    /// Returns the number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns every handle in creation order.
    #[must_use]
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::connection::Config;
    use crate::request::sasl::Credentials;
    use crate::session::SessionConfig;

    fn offline() -> Session {
        Session::new(SessionConfig::new(
            Config::new("sieve.example.com"),
            Credentials::new("user", "secret"),
        ))
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let mut registry = SessionRegistry::new();
        assert!(registry.is_empty());

        let a = registry.create(offline());
        let b = registry.create(offline());
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec![a, b]);
        assert!(registry.get(a).is_some());
        assert!(!registry.get_mut(b).unwrap().is_connected());

        assert!(registry.remove(a).await);
        assert!(!registry.remove(a).await);
        assert!(registry.get(a).is_none());
        assert_eq!(registry.ids(), vec![b]);

        let c = registry.create(offline());
        assert_ne!(a, c);
        assert_eq!(c.to_string(), "session-3");
    }
}
