//! Common test utilities for client integration tests.
//!
//! This module provides:
//! - `FakeRemote`, an in-memory remote with scripted push failures
//! - `FlakyRepository`, a SQLite store whose writes can be switched off
//! - Helpers for opening sessions with fast timings

#![allow(dead_code)]

pub mod fixtures;

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use helix_core::{ContentManifest, StatePayload};
use helix_desktop::db::{
    DbError, IdentityMigration, IdentityRepository, StateRepository, StoredRecord,
};
use helix_desktop::{
    HelixSession, RemoteError, RemoteStore, RetryPolicy, SessionConfig, SqliteRepository,
};

/// In-memory remote. Pushes consume scripted failures first.
#[derive(Default)]
pub struct FakeRemote {
    stored: Mutex<HashMap<String, StatePayload>>,
    push_failures: Mutex<VecDeque<RemoteError>>,
    fetch_failure: Mutex<Option<RemoteError>>,
    pushes: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next pushes fail, in order.
    pub fn fail_pushes(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.push_failures.lock().unwrap().extend(errors);
    }

    /// Make every push fail transiently `count` times.
    pub fn go_offline(&self, count: usize) {
        self.fail_pushes((0..count).map(|_| RemoteError::Transient("connection refused".into())));
    }

    pub fn fail_fetches(&self, error: Option<RemoteError>) {
        *self.fetch_failure.lock().unwrap() = error;
    }

    /// Put a copy on the remote directly.
    pub fn seed(&self, payload: StatePayload) {
        self.stored
            .lock()
            .unwrap()
            .insert(payload.user_id.clone(), payload);
    }

    /// Answer fetches for `user_id` with `payload`, whoever it belongs to.
    pub fn seed_for(&self, user_id: &str, payload: StatePayload) {
        self.stored
            .lock()
            .unwrap()
            .insert(user_id.to_string(), payload);
    }

    pub fn stored(&self, user_id: &str) -> Option<StatePayload> {
        self.stored.lock().unwrap().get(user_id).cloned()
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn push(&self, payload: &StatePayload) -> Result<(), RemoteError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.push_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.seed(payload.clone());
        Ok(())
    }

    async fn fetch(&self, user_id: &str) -> Result<Option<StatePayload>, RemoteError> {
        if let Some(error) = self.fetch_failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.stored(user_id))
    }
}

/// SQLite store whose writes start failing when the switch is flipped.
pub struct FlakyRepository {
    inner: SqliteRepository,
    fail_writes: Arc<AtomicBool>,
}

impl FlakyRepository {
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let switch = Arc::new(AtomicBool::new(false));
        let repo = Self {
            inner: SqliteRepository::open_in_memory().unwrap(),
            fail_writes: switch.clone(),
        };
        (repo, switch)
    }

    fn check(&self) -> Result<(), DbError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DbError::InvalidData("disk full".into()));
        }
        Ok(())
    }
}

impl StateRepository for FlakyRepository {
    fn get_record(&self, key: &str) -> Result<Option<StoredRecord>, DbError> {
        self.inner.get_record(key)
    }

    fn put_record(&self, record: &StoredRecord) -> Result<(), DbError> {
        self.check()?;
        self.inner.put_record(record)
    }

    fn delete_record(&self, key: &str) -> Result<(), DbError> {
        self.check()?;
        self.inner.delete_record(key)
    }

    fn mark_synced(
        &self,
        key: &str,
        last_updated: DateTime<Utc>,
        synced_at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        self.check()?;
        self.inner.mark_synced(key, last_updated, synced_at)
    }
}

impl IdentityRepository for FlakyRepository {
    fn get_anonymous_id(&self) -> Result<Option<String>, DbError> {
        self.inner.get_anonymous_id()
    }

    fn save_anonymous_id(&self, anonymous_id: &str) -> Result<(), DbError> {
        self.check()?;
        self.inner.save_anonymous_id(anonymous_id)
    }

    fn get_migration(&self, anonymous_id: &str) -> Result<Option<IdentityMigration>, DbError> {
        self.inner.get_migration(anonymous_id)
    }

    fn commit_migration(
        &self,
        migration: &IdentityMigration,
        adopted: Option<&StoredRecord>,
    ) -> Result<(), DbError> {
        self.check()?;
        self.inner.commit_migration(migration, adopted)
    }
}

/// Retry policy with millisecond backoff.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        attempt_timeout: Duration::from_millis(500),
    }
}

/// Short rotation delay, no background sync.
pub fn manual_sync_config() -> SessionConfig {
    SessionConfig {
        rotation_delay: Duration::from_millis(5),
        auto_sync: false,
        retry: fast_retry(),
        ..SessionConfig::default()
    }
}

/// Short rotation delay, background sync after every change.
pub fn auto_sync_config() -> SessionConfig {
    SessionConfig {
        auto_sync: true,
        ..manual_sync_config()
    }
}

/// Anonymous session on an in-memory database.
pub async fn open_memory_session(
    config: SessionConfig,
    remote: Arc<FakeRemote>,
    manifest: ContentManifest,
) -> HelixSession<SqliteRepository> {
    HelixSession::open(
        config,
        SqliteRepository::open_in_memory().unwrap(),
        remote,
        None,
        manifest,
    )
    .await
    .expect("failed to open session")
}

/// Session on an on-disk database.
pub async fn open_file_session(
    path: &Path,
    config: SessionConfig,
    remote: Arc<FakeRemote>,
    user_id: Option<&str>,
    manifest: ContentManifest,
) -> HelixSession<SqliteRepository> {
    HelixSession::open(
        config,
        SqliteRepository::open(path).unwrap(),
        remote,
        user_id,
        manifest,
    )
    .await
    .expect("failed to open session")
}
