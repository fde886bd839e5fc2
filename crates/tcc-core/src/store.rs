//! Durable state: login sessions, destination preferences and clone checkpoints.
//!
//! Every write is an idempotent upsert; the last writer wins.

use std::{collections::BTreeMap, path::PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::Mutex;

use crate::{
    domain::{ChannelId, MessageId, UserId},
    errors::StorageError,
};

pub type StoreResult<T> = std::result::Result<T, StorageError>;

/// Opaque serialized session, stored base64-encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionBlob(pub Vec<u8>);

impl SessionBlob {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn from_base64(s: &str) -> StoreResult<Self> {
        STANDARD
            .decode(s.trim())
            .map(Self)
            .map_err(|e| StorageError::Corrupt(format!("session blob: {e}")))
    }
}

impl std::fmt::Debug for SessionBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        write!(f, "SessionBlob({} bytes)", self.0.len())
    }
}

impl Serialize for SessionBlob {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for SessionBlob {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        SessionBlob::from_base64(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub user_id: UserId,
    pub phone: String,
    pub blob: SessionBlob,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, user: UserId) -> StoreResult<Option<PersistedSession>>;
    async fn put_session(&self, user: UserId, phone: &str, blob: SessionBlob) -> StoreResult<()>;
    /// Returns whether a session existed.
    async fn delete_session(&self, user: UserId) -> StoreResult<bool>;

    async fn get_destination(&self, user: UserId) -> StoreResult<Option<ChannelId>>;
    async fn set_destination(&self, user: UserId, channel: ChannelId) -> StoreResult<()>;
    async fn clear_destination(&self, user: UserId) -> StoreResult<bool>;

    async fn update_high_water_mark(
        &self,
        source: ChannelId,
        user: UserId,
        id: MessageId,
    ) -> StoreResult<()>;
    async fn high_water_mark(
        &self,
        source: ChannelId,
        user: UserId,
    ) -> StoreResult<Option<MessageId>>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    sessions: BTreeMap<i64, PersistedSession>,
    #[serde(default)]
    destinations: BTreeMap<i64, ChannelId>,
    #[serde(default)]
    checkpoints: Vec<CheckpointRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    source: ChannelId,
    user_id: UserId,
    last_message_id: MessageId,
    updated_at: DateTime<Utc>,
}

impl StoreDocument {
    fn put_session(&mut self, user: UserId, phone: &str, blob: SessionBlob) {
        self.sessions.insert(
            user.0,
            PersistedSession {
                user_id: user,
                phone: phone.to_string(),
                blob,
                updated_at: Utc::now(),
            },
        );
    }

    fn set_high_water_mark(&mut self, source: ChannelId, user: UserId, id: MessageId) {
        let now = Utc::now();
        match self
            .checkpoints
            .iter_mut()
            .find(|c| c.source == source && c.user_id == user)
        {
            Some(rec) => {
                rec.last_message_id = id;
                rec.updated_at = now;
            }
            None => self.checkpoints.push(CheckpointRecord {
                source,
                user_id: user,
                last_message_id: id,
                updated_at: now,
            }),
        }
    }

    fn high_water_mark(&self, source: ChannelId, user: UserId) -> Option<MessageId> {
        self.checkpoints
            .iter()
            .find(|c| c.source == source && c.user_id == user)
            .map(|c| c.last_message_id)
    }
}

/// Single JSON document on disk, rewritten atomically (temp file + rename).
pub struct JsonFileStore {
    path: PathBuf,
    doc: Mutex<Option<StoreDocument>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            doc: Mutex::new(None),
        }
    }

    async fn load(&self) -> StoreResult<StoreDocument> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(txt) if txt.trim().is_empty() => Ok(StoreDocument::default()),
            Ok(txt) => Ok(serde_json::from_str(&txt)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, doc: &StoreDocument) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let body = serde_json::to_vec_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn read<T>(&self, f: impl FnOnce(&StoreDocument) -> T) -> StoreResult<T> {
        let mut guard = self.doc.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        let doc = guard.get_or_insert_with(StoreDocument::default);
        Ok(f(doc))
    }

    /// Apply `f` to a copy of the document and commit it only if the write succeeds.
    async fn write<T>(&self, f: impl FnOnce(&mut StoreDocument) -> T) -> StoreResult<T> {
        let mut guard = self.doc.lock().await;
        let mut doc = match guard.take() {
            Some(doc) => doc,
            None => self.load().await?,
        };
        let mut next = doc.clone();
        let out = f(&mut next);
        match self.persist(&next).await {
            Ok(()) => doc = next,
            Err(e) => {
                *guard = Some(doc);
                return Err(e);
            }
        }
        *guard = Some(doc);
        Ok(out)
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn get_session(&self, user: UserId) -> StoreResult<Option<PersistedSession>> {
        self.read(|d| d.sessions.get(&user.0).cloned()).await
    }

    async fn put_session(&self, user: UserId, phone: &str, blob: SessionBlob) -> StoreResult<()> {
        self.write(|d| d.put_session(user, phone, blob)).await?;
        tracing::info!(user = user.0, "session saved");
        Ok(())
    }

    async fn delete_session(&self, user: UserId) -> StoreResult<bool> {
        let removed = self.write(|d| d.sessions.remove(&user.0).is_some()).await?;
        if removed {
            tracing::info!(user = user.0, "session deleted");
        }
        Ok(removed)
    }

    async fn get_destination(&self, user: UserId) -> StoreResult<Option<ChannelId>> {
        self.read(|d| d.destinations.get(&user.0).copied()).await
    }

    async fn set_destination(&self, user: UserId, channel: ChannelId) -> StoreResult<()> {
        self.write(|d| d.destinations.insert(user.0, channel)).await?;
        tracing::info!(user = user.0, destination = channel.0, "destination set");
        Ok(())
    }

    async fn clear_destination(&self, user: UserId) -> StoreResult<bool> {
        self.write(|d| d.destinations.remove(&user.0).is_some())
            .await
    }

    async fn update_high_water_mark(
        &self,
        source: ChannelId,
        user: UserId,
        id: MessageId,
    ) -> StoreResult<()> {
        self.write(|d| d.set_high_water_mark(source, user, id))
            .await
    }

    async fn high_water_mark(
        &self,
        source: ChannelId,
        user: UserId,
    ) -> StoreResult<Option<MessageId>> {
        self.read(|d| d.high_water_mark(source, user)).await
    }
}

/// In-memory store, used by tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    doc: Mutex<StoreDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_count(&self) -> usize {
        self.doc.lock().await.sessions.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get_session(&self, user: UserId) -> StoreResult<Option<PersistedSession>> {
        Ok(self.doc.lock().await.sessions.get(&user.0).cloned())
    }

    async fn put_session(&self, user: UserId, phone: &str, blob: SessionBlob) -> StoreResult<()> {
        self.doc.lock().await.put_session(user, phone, blob);
        Ok(())
    }

    async fn delete_session(&self, user: UserId) -> StoreResult<bool> {
        Ok(self.doc.lock().await.sessions.remove(&user.0).is_some())
    }

    async fn get_destination(&self, user: UserId) -> StoreResult<Option<ChannelId>> {
        Ok(self.doc.lock().await.destinations.get(&user.0).copied())
    }

    async fn set_destination(&self, user: UserId, channel: ChannelId) -> StoreResult<()> {
        self.doc.lock().await.destinations.insert(user.0, channel);
        Ok(())
    }

    async fn clear_destination(&self, user: UserId) -> StoreResult<bool> {
        Ok(self.doc.lock().await.destinations.remove(&user.0).is_some())
    }

    async fn update_high_water_mark(
        &self,
        source: ChannelId,
        user: UserId,
        id: MessageId,
    ) -> StoreResult<()> {
        self.doc.lock().await.set_high_water_mark(source, user, id);
        Ok(())
    }

    async fn high_water_mark(
        &self,
        source: ChannelId,
        user: UserId,
    ) -> StoreResult<Option<MessageId>> {
        Ok(self.doc.lock().await.high_water_mark(source, user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_store(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        PathBuf::from(format!(
            "/tmp/{prefix}-{}-{ts}/store.json",
            std::process::id()
        ))
    }

    #[tokio::test]
    async fn file_store_round_trips_through_disk() {
        let path = tmp_store("tcc-store");
        let user = UserId(42);
        let src = ChannelId(-1001);

        {
            let store = JsonFileStore::new(&path);
            store
                .put_session(user, "+15550001", SessionBlob(vec![1, 2, 3]))
                .await
                .unwrap();
            store.set_destination(user, ChannelId(-1002)).await.unwrap();
            store
                .update_high_water_mark(src, user, MessageId(10))
                .await
                .unwrap();
            store
                .update_high_water_mark(src, user, MessageId(11))
                .await
                .unwrap();
        }

        let reopened = JsonFileStore::new(&path);
        let s = reopened.get_session(user).await.unwrap().unwrap();
        assert_eq!(s.phone, "+15550001");
        assert_eq!(s.blob, SessionBlob(vec![1, 2, 3]));
        assert_eq!(
            reopened.get_destination(user).await.unwrap(),
            Some(ChannelId(-1002))
        );
        assert_eq!(
            reopened.high_water_mark(src, user).await.unwrap(),
            Some(MessageId(11))
        );

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn second_session_supersedes_first() {
        let store = MemoryStore::new();
        let user = UserId(7);
        store
            .put_session(user, "+1", SessionBlob(b"first".to_vec()))
            .await
            .unwrap();
        store
            .put_session(user, "+1", SessionBlob(b"second".to_vec()))
            .await
            .unwrap();

        assert_eq!(store.session_count().await, 1);
        let s = store.get_session(user).await.unwrap().unwrap();
        assert_eq!(s.blob.0, b"second".to_vec());
    }

    #[tokio::test]
    async fn delete_and_clear_are_idempotent() {
        let path = tmp_store("tcc-store-del");
        let store = JsonFileStore::new(&path);
        let user = UserId(1);

        assert!(!store.delete_session(user).await.unwrap());
        store
            .put_session(user, "+1", SessionBlob(vec![9]))
            .await
            .unwrap();
        assert!(store.delete_session(user).await.unwrap());
        assert!(!store.delete_session(user).await.unwrap());

        assert!(!store.clear_destination(user).await.unwrap());
        store.set_destination(user, ChannelId(-5)).await.unwrap();
        assert!(store.clear_destination(user).await.unwrap());
        assert_eq!(store.get_destination(user).await.unwrap(), None);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn corrupt_document_surfaces_as_error() {
        let path = tmp_store("tcc-store-bad");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.get_session(UserId(1)).await,
            Err(StorageError::Json(_))
        ));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn blob_debug_hides_bytes() {
        let blob = SessionBlob(vec![0xde, 0xad]);
        assert_eq!(format!("{blob:?}"), "SessionBlob(2 bytes)");
        assert_eq!(SessionBlob::from_base64(&blob.to_base64()).unwrap(), blob);
    }
}
