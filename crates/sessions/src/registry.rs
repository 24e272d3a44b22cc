use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    tokio::sync::RwLock,
    tracing::{debug, info, warn},
};

use crate::{Error, Result, backend::SessionBackend, handle::SessionHandle};

/// Profile id -> live session handle.
///
/// Every mutation takes the write lock, so `create` and `remove` for the same
/// profile never interleave and a profile maps to at most one handle. The
/// registry never talks to the network itself; teardown is delegated to the
/// backend passed into [`SessionRegistry::destroy_and_remove`].
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new handle. Fails with `AlreadyExists` when the profile is
    /// taken.
    pub async fn create(
        &self,
        profile_id: &str,
        user_id: &str,
        use_pairing: bool,
    ) -> Result<Arc<SessionHandle>> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(profile_id) {
            return Err(Error::already_exists(profile_id));
        }
        let handle = Arc::new(SessionHandle::new(profile_id, user_id, use_pairing));
        sessions.insert(profile_id.to_string(), Arc::clone(&handle));
        debug!(profile_id, session_id = %handle.session_id(), "session registered");
        Ok(handle)
    }

    pub async fn get(&self, profile_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(profile_id).cloned()
    }

    /// Remove whatever is registered for the profile. No-op when absent.
    pub async fn remove(&self, profile_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.write().await.remove(profile_id)
    }

    /// Remove the entry only if it still points at `handle`.
    pub async fn remove_if_same(&self, handle: &Arc<SessionHandle>) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(handle.profile_id()) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                sessions.remove(handle.profile_id());
                true
            },
            _ => false,
        }
    }

    /// Cancel the profile's handle, ask the backend to tear it down within
    /// `timeout`, then drop the entry whatever the backend answered.
    pub async fn destroy_and_remove(
        &self,
        profile_id: &str,
        backend: &dyn SessionBackend,
        timeout: Duration,
    ) -> Option<Arc<SessionHandle>> {
        let handle = self.get(profile_id).await?;
        self.destroy_handle(&handle, backend, timeout).await;
        Some(handle)
    }

    /// [`Self::destroy_and_remove`] for a handle the caller already holds.
    pub async fn destroy_handle(
        &self,
        handle: &Arc<SessionHandle>,
        backend: &dyn SessionBackend,
        timeout: Duration,
    ) {
        let profile_id = handle.profile_id();
        handle.cancel();

        match tokio::time::timeout(timeout, backend.destroy(profile_id, handle.session_id())).await
        {
            Ok(Ok(())) => debug!(profile_id, "session torn down"),
            Ok(Err(e)) => warn!(profile_id, error = %e, "session teardown failed"),
            Err(_) => warn!(
                profile_id,
                timeout_ms = timeout.as_millis() as u64,
                "session teardown timed out"
            ),
        }

        if self.remove_if_same(handle).await {
            info!(profile_id, "session removed");
        }
    }

    pub async fn list(&self) -> Vec<Arc<SessionHandle>> {
        let mut handles: Vec<_> = self.sessions.read().await.values().cloned().collect();
        handles.sort_by(|a, b| a.profile_id().cmp(b.profile_id()));
        handles
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
