//! In-memory session store keyed by user identity.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::channels::UserId;

use super::state::Session;

/// Owns every user's [`Session`]. Nothing is persisted.
///
/// One mutex guards the whole map; it is never held across I/O.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<UserId, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current session for `user`, creating an idle one if absent.
    pub async fn get(&self, user: &UserId) -> Session {
        let mut sessions = self.sessions.lock().await;
        sessions.entry(user.clone()).or_default().clone()
    }

    /// Replace the session for `user`.
    pub async fn set(&self, user: &UserId, session: Session) {
        self.sessions.lock().await.insert(user.clone(), session);
    }

    /// Reset `user` to idle and drop any collected text.
    pub async fn clear(&self, user: &UserId) {
        self.set(user, Session::default()).await;
    }

    /// Number of users seen so far.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
