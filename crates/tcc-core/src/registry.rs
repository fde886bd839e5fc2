use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::{domain::UserId, errors::Error, Result};

#[derive(Clone, Debug)]
pub struct TaskStatus {
    pub label: String,
    pub started_at: DateTime<Utc>,
    pub cancelled: bool,
}

#[derive(Debug)]
struct Entry {
    generation: u64,
    label: String,
    started_at: DateTime<Utc>,
    token: CancellationToken,
}

#[derive(Default)]
struct Inner {
    next_generation: AtomicU64,
    tasks: Mutex<HashMap<UserId, Entry>>,
}

impl Inner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<UserId, Entry>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One active clone job per user.
///
/// The registry only holds a liveness marker (a cancellation token); the job
/// itself is owned by whoever holds the `TaskGuard`.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job for `user`, or fail without touching the existing entry.
    pub fn try_start(&self, user: UserId, label: impl Into<String>) -> Result<TaskGuard> {
        let mut tasks = self.inner.tasks();
        if tasks.contains_key(&user) {
            return Err(Error::TaskActive);
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        tasks.insert(
            user,
            Entry {
                generation,
                label: label.into(),
                started_at: Utc::now(),
                token: token.clone(),
            },
        );

        Ok(TaskGuard {
            registry: self.inner.clone(),
            user,
            generation,
            token,
        })
    }

    /// Signal the active job to stop. Returns false if nothing was running.
    pub fn cancel(&self, user: UserId) -> bool {
        let tasks = self.inner.tasks();
        match tasks.get(&user) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, user: UserId) -> bool {
        self.inner.tasks().contains_key(&user)
    }

    pub fn status(&self, user: UserId) -> Option<TaskStatus> {
        self.inner.tasks().get(&user).map(|e| TaskStatus {
            label: e.label.clone(),
            started_at: e.started_at,
            cancelled: e.token.is_cancelled(),
        })
    }

    pub fn cancel_all(&self) -> usize {
        let tasks = self.inner.tasks();
        for entry in tasks.values() {
            entry.token.cancel();
        }
        tasks.len()
    }
}

/// Ownership of a registry slot; the slot is released on drop.
pub struct TaskGuard {
    registry: Arc<Inner>,
    user: UserId,
    generation: u64,
    token: CancellationToken,
}

impl TaskGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let mut tasks = self.registry.tasks();
        if tasks
            .get(&self.user)
            .is_some_and(|e| e.generation == self.generation)
        {
            tasks.remove(&self.user);
        }
    }
}
