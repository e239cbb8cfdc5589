//! The session store (C6): CRUD + atomic update + idempotency + lease
//! operations, specified as a trait so production and in-memory test
//! doubles are swappable (§9).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::SessionRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A named mutex with TTL, guarding a scarce shared resource (tuner slots).
#[derive(Debug, Clone)]
pub struct Lease {
    pub key: String,
    pub owner: String,
    pub expires_at: Instant,
}

impl Lease {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn get(&self, session_id: &str) -> StoreResult<Option<SessionRecord>>;

    async fn put(&self, session: SessionRecord) -> StoreResult<()>;

    /// Atomically mutate a session in place. Per-key linearizable: no two
    /// concurrent `update_session` calls for the same `session_id` observe
    /// an interleaved write (§5).
    async fn update_session(
        &self,
        session_id: &str,
        mutator: Box<dyn FnOnce(&mut SessionRecord) + Send>,
    ) -> StoreResult<Option<SessionRecord>>;

    async fn list_active(&self) -> StoreResult<Vec<SessionRecord>>;

    /// Walks nothing by itself — callers (the admission lease step, §4.6)
    /// decide which keys to try. Busy is a normal `(lease, false)` result,
    /// never an error (§3).
    async fn try_acquire_lease(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> StoreResult<(Lease, bool)>;

    async fn renew_lease(&self, key: &str, owner: &str, ttl: Duration) -> StoreResult<bool>;

    async fn release_lease(&self, key: &str, owner: &str) -> StoreResult<()>;

    /// Folds retried identical intents onto one session (§4.6 step 6).
    /// Returns `(session_id, replayed)`.
    async fn put_session_with_idempotency(
        &self,
        session: SessionRecord,
        idempotency_key: String,
        ttl: Duration,
    ) -> StoreResult<(String, bool)>;
}

struct LeaseEntry {
    owner: String,
    expires_at: Instant,
}

struct IdempotencyEntry {
    session_id: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
    leases: RwLock<HashMap<String, LeaseEntry>>,
    idempotency: RwLock<HashMap<String, IdempotencyEntry>>,
}

impl InMemorySessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> StoreResult<Option<SessionRecord>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn put(&self, session: SessionRecord) -> StoreResult<()> {
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn update_session(
        &self,
        session_id: &str,
        mutator: Box<dyn FnOnce(&mut SessionRecord) + Send>,
    ) -> StoreResult<Option<SessionRecord>> {
        let mut guard = self.sessions.write().await;
        match guard.get_mut(session_id) {
            Some(session) => {
                mutator(session);
                Ok(Some(session.clone()))
            }
            None => Ok(None),
        }
    }

    async fn list_active(&self) -> StoreResult<Vec<SessionRecord>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| !s.state.is_terminal())
            .cloned()
            .collect())
    }

    async fn try_acquire_lease(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> StoreResult<(Lease, bool)> {
        let now = Instant::now();
        let mut leases = self.leases.write().await;
        let busy = leases
            .get(key)
            .map(|entry| entry.owner != owner && entry.expires_at > now)
            .unwrap_or(false);

        if busy {
            let entry = leases.get(key).unwrap();
            return Ok((
                Lease {
                    key: key.to_string(),
                    owner: entry.owner.clone(),
                    expires_at: entry.expires_at,
                },
                false,
            ));
        }

        let expires_at = now + ttl;
        leases.insert(
            key.to_string(),
            LeaseEntry {
                owner: owner.to_string(),
                expires_at,
            },
        );
        Ok((
            Lease {
                key: key.to_string(),
                owner: owner.to_string(),
                expires_at,
            },
            true,
        ))
    }

    async fn renew_lease(&self, key: &str, owner: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        let mut leases = self.leases.write().await;
        match leases.get_mut(key) {
            Some(entry) if entry.owner == owner && entry.expires_at > now => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lease(&self, key: &str, owner: &str) -> StoreResult<()> {
        let mut leases = self.leases.write().await;
        if leases.get(key).map(|e| e.owner == owner).unwrap_or(false) {
            leases.remove(key);
        }
        Ok(())
    }

    async fn put_session_with_idempotency(
        &self,
        session: SessionRecord,
        idempotency_key: String,
        ttl: Duration,
    ) -> StoreResult<(String, bool)> {
        let now = Instant::now();
        let mut idempotency = self.idempotency.write().await;

        if let Some(entry) = idempotency.get(&idempotency_key) {
            if entry.expires_at > now {
                return Ok((entry.session_id.clone(), true));
            }
        }

        let session_id = session.session_id.clone();
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), session);
        idempotency.insert(
            idempotency_key,
            IdempotencyEntry {
                session_id: session_id.clone(),
                expires_at: now + ttl,
            },
        );
        Ok((session_id, false))
    }
}
