use std::sync::Arc;

use crate::{
    domain::UserId,
    errors::StorageError,
    ports::{ChannelTransport, LoginConnector},
    slots::KeyedSlots,
    store::SessionStore,
};

/// Cache of live, authenticated transports, one per user.
///
/// Handles are restored lazily from the session store. Every operation for a
/// given user holds that user's slot lock, so a `logout` can never race a `get`.
pub struct SessionPool {
    connector: Arc<dyn LoginConnector>,
    store: Arc<dyn SessionStore>,
    handles: KeyedSlots<UserId, Arc<dyn ChannelTransport>>,
}

impl SessionPool {
    pub fn new(connector: Arc<dyn LoginConnector>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            connector,
            store,
            handles: KeyedSlots::new(),
        }
    }

    /// Live handle for `user`, restoring it from the store if needed.
    ///
    /// Absence of a usable session is a normal outcome and yields `None`.
    pub async fn get(&self, user: UserId) -> Option<Arc<dyn ChannelTransport>> {
        let mut slot = self.handles.lock(&user).await;

        if let Some(handle) = slot.as_ref() {
            if handle.is_connected() {
                return Some(handle.clone());
            }
            tracing::info!(user = user.0, "cached session disconnected, restoring");
            if let Some(stale) = slot.take() {
                stale.close().await;
            }
        }

        let persisted = match self.store.get_session(user).await {
            Ok(Some(s)) => s,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(user = user.0, "failed to read session: {e}");
                return None;
            }
        };

        match self.connector.restore(user, &persisted.blob).await {
            Ok(handle) => {
                tracing::info!(user = user.0, "session restored");
                *slot = Some(handle.clone());
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(user = user.0, "failed to restore session: {e}");
                None
            }
        }
    }

    /// Cache a freshly authenticated handle, closing any previous one.
    pub async fn publish(&self, user: UserId, handle: Arc<dyn ChannelTransport>) {
        let mut slot = self.handles.lock(&user).await;
        if let Some(old) = slot.replace(handle) {
            old.close().await;
        }
    }

    pub async fn is_cached(&self, user: UserId) -> bool {
        self.handles.lock(&user).await.is_some()
    }

    /// Sign out, evict the cached handle and delete the persisted session.
    ///
    /// Idempotent; returns whether anything was removed.
    pub async fn logout(&self, user: UserId) -> Result<bool, StorageError> {
        let mut slot = self.handles.lock(&user).await;
        let had_handle = match slot.take() {
            Some(handle) => {
                if let Err(e) = handle.sign_out().await {
                    tracing::warn!(user = user.0, "sign-out failed: {e}");
                }
                handle.close().await;
                true
            }
            None => false,
        };
        let had_session = self.store.delete_session(user).await?;
        Ok(had_handle || had_session)
    }

    /// Close every cached handle. Used at shutdown only.
    pub async fn stop_all(&self) {
        for (user, handle) in self.handles.drain().await {
            handle.close().await;
            tracing::info!(user = user.0, "session stopped");
        }
    }
}
