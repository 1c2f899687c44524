//! Local-first persistence with best-effort remote sync.
//!
//! Every state change is written to the local store before anything touches
//! the network. Pushes run with bounded retries; when they give up, a backup
//! record is written next to the primary copy so the change survives a
//! restart. Conflicts are settled by last-write-wins on `lastUpdated`.

pub mod remote;
pub mod retry;

pub use remote::{HttpRemote, NullRemote, RemoteError, RemoteStore};
pub use retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};

use crate::db::{backup_key, primary_key, DbError, LocalStore, StoredRecord};
use chrono::{DateTime, Utc};
use helix_core::{SchedulerState, StatePayload};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;

/// Sync errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("remote unreachable after {attempts} attempts: {last_error}")]
    TransientNetworkFailure { attempts: u32, last_error: String },

    #[error("remote rejected state: {0}")]
    PermanentRejection(String),

    #[error("local storage unavailable: {0}")]
    StorageUnavailable(#[from] DbError),
}

/// Sync status for UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum SyncStatus {
    Idle,
    Syncing { user_id: String },
    Synced { synced_at: DateTime<Utc> },
    /// Retries ran out; the state is safe in the backup record.
    Unsynced {
        attempts: u32,
        error: String,
        backup_key: String,
    },
    Failed { error: String },
}

/// Result of one sync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced { attempts: u32 },
    /// A newer snapshot was already pushed.
    Superseded,
    Unsynced {
        attempts: u32,
        error: String,
        backup_key: String,
    },
}

/// Where a loaded state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSource {
    Local,
    Backup,
    Remote,
}

#[derive(Debug, Clone)]
pub struct LoadedState {
    pub state: SchedulerState,
    pub source: StateSource,
    /// The remote copy is missing, older, or unknown.
    pub needs_sync: bool,
}

enum RemoteCopy {
    Present(SchedulerState),
    Absent,
    Unreachable,
}

/// Inner state shared across clones.
struct SyncManagerInner<R> {
    repository: Mutex<R>,
    remote: Arc<dyn RemoteStore>,
    policy: RetryPolicy,
    status: AsyncMutex<SyncStatus>,
    /// Newest `lastUpdated` known to be on the remote, per user.
    last_pushed: AsyncMutex<HashMap<String, DateTime<Utc>>>,
    /// Held for the length of one push attempt.
    push_gate: AsyncMutex<()>,
}

/// Owns the local store and the remote port.
///
/// Clone-able: all state lives behind an `Arc`, so background sync tasks can
/// hold their own handle.
pub struct SyncManager<R> {
    inner: Arc<SyncManagerInner<R>>,
}

impl<R> Clone for SyncManager<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: LocalStore> SyncManager<R> {
    pub fn new(repository: R, remote: Arc<dyn RemoteStore>, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(SyncManagerInner {
                repository: Mutex::new(repository),
                remote,
                policy,
                status: AsyncMutex::new(SyncStatus::Idle),
                last_pushed: AsyncMutex::new(HashMap::new()),
                push_gate: AsyncMutex::new(()),
            }),
        }
    }

    /// Get current sync status.
    pub async fn status(&self) -> SyncStatus {
        self.inner.status.lock().await.clone()
    }

    async fn set_status(&self, status: SyncStatus) {
        *self.inner.status.lock().await = status;
    }

    /// Run `f` against the local store. Never call this across an await.
    pub fn with_repository<T>(&self, f: impl FnOnce(&R) -> T) -> T {
        let repo = self
            .inner
            .repository
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&repo)
    }

    /// Write the primary local copy.
    pub fn persist(&self, state: &SchedulerState) -> Result<(), SyncError> {
        let record = StoredRecord::primary(state, Utc::now())?;
        self.with_repository(|repo| repo.put_record(&record))?;
        tracing::debug!(
            user_id = %state.user_id,
            last_updated = %state.last_updated,
            "persisted state"
        );
        Ok(())
    }

    async fn is_superseded(&self, state: &SchedulerState) -> bool {
        self.inner
            .last_pushed
            .lock()
            .await
            .get(&state.user_id)
            .is_some_and(|pushed| *pushed > state.last_updated)
    }

    async fn record_pushed(&self, user_id: &str, last_updated: DateTime<Utc>) {
        self.inner
            .last_pushed
            .lock()
            .await
            .entry(user_id.to_string())
            .and_modify(|pushed| *pushed = (*pushed).max(last_updated))
            .or_insert(last_updated);
    }

    /// Push a snapshot to the remote.
    ///
    /// Attempts are serialized across all syncs of this manager, and each one
    /// first checks that no newer snapshot has reached the remote; if one has,
    /// `Superseded` is returned and nothing is sent. Exhausted transient
    /// failures are not an error: the snapshot is written to the backup key
    /// and `Unsynced` is returned. Permanent rejections and local storage
    /// failures are returned as errors.
    pub async fn sync(&self, state: &SchedulerState) -> Result<SyncOutcome, SyncError> {
        if self.is_superseded(state).await {
            tracing::debug!(user_id = %state.user_id, "skipping superseded sync");
            return Ok(SyncOutcome::Superseded);
        }

        self.set_status(SyncStatus::Syncing {
            user_id: state.user_id.clone(),
        })
        .await;

        let payload = StatePayload::from(state);
        let payload_ref = &payload;
        let result = self
            .inner
            .policy
            .run("push", move || self.push_unless_superseded(state, payload_ref))
            .await;

        match result {
            Ok((false, attempts)) => {
                tracing::debug!(
                    user_id = %state.user_id,
                    attempts,
                    "newer state reached the remote first"
                );
                Ok(SyncOutcome::Superseded)
            }
            Ok((true, attempts)) => {
                let synced_at = Utc::now();
                self.with_repository(|repo| -> Result<(), DbError> {
                    repo.mark_synced(&primary_key(&state.user_id), state.last_updated, synced_at)?;
                    let backup = backup_key(&state.user_id);
                    if let Some(existing) = repo.get_record(&backup)? {
                        if existing.last_updated <= state.last_updated {
                            repo.delete_record(&backup)?;
                        }
                    }
                    Ok(())
                })?;

                tracing::info!(user_id = %state.user_id, attempts, "state synced");
                self.set_status(SyncStatus::Synced { synced_at }).await;
                Ok(SyncOutcome::Synced { attempts })
            }
            Err(SyncError::TransientNetworkFailure {
                attempts,
                last_error,
            }) => {
                if self.is_superseded(state).await {
                    return Ok(SyncOutcome::Superseded);
                }
                let key = self.write_backup(state)?;
                tracing::warn!(
                    user_id = %state.user_id,
                    attempts,
                    error = %last_error,
                    backup_key = %key,
                    "sync gave up, state kept in backup"
                );
                self.set_status(SyncStatus::Unsynced {
                    attempts,
                    error: last_error.clone(),
                    backup_key: key.clone(),
                })
                .await;
                Ok(SyncOutcome::Unsynced {
                    attempts,
                    error: last_error,
                    backup_key: key,
                })
            }
            Err(err) => {
                tracing::error!(user_id = %state.user_id, error = %err, "sync failed");
                self.set_status(SyncStatus::Failed {
                    error: err.to_string(),
                })
                .await;
                Err(err)
            }
        }
    }

    /// One push attempt. Returns `false` without sending when a newer
    /// snapshot is already on the remote.
    async fn push_unless_superseded(
        &self,
        state: &SchedulerState,
        payload: &StatePayload,
    ) -> Result<bool, RemoteError> {
        let _gate = self.inner.push_gate.lock().await;
        if self.is_superseded(state).await {
            return Ok(false);
        }
        self.inner.remote.push(payload).await?;
        self.record_pushed(&state.user_id, state.last_updated).await;
        Ok(true)
    }

    /// Write the backup record unless a newer backup is already there.
    fn write_backup(&self, state: &SchedulerState) -> Result<String, SyncError> {
        let key = backup_key(&state.user_id);
        let record = StoredRecord::backup(state, Utc::now())?;
        self.with_repository(|repo| -> Result<(), DbError> {
            let newer_exists = repo
                .get_record(&key)?
                .is_some_and(|existing| existing.last_updated > state.last_updated);
            if !newer_exists {
                repo.put_record(&record)?;
            }
            Ok(())
        })?;
        Ok(key)
    }

    /// Load and reconcile a user's state: the newest of the local primary,
    /// the local backup, and the remote copy wins.
    ///
    /// A remote winner is written back locally. Returns `None` when no copy
    /// exists anywhere.
    pub async fn load(&self, user_id: &str) -> Result<Option<LoadedState>, SyncError> {
        let (local, backup) = self.with_repository(|repo| -> Result<_, DbError> {
            Ok((
                read_state(repo, &primary_key(user_id))?,
                read_state(repo, &backup_key(user_id))?,
            ))
        })?;
        let remote = self.fetch_remote(user_id).await;

        let has_backup = backup.is_some();
        let (remote_state, remote_reachable) = match remote {
            RemoteCopy::Present(state) => (Some(state), true),
            RemoteCopy::Absent => (None, true),
            RemoteCopy::Unreachable => (None, false),
        };
        let remote_updated = remote_state.as_ref().map(|s| s.last_updated);

        let mut best: Option<(SchedulerState, StateSource)> = None;
        for (candidate, source) in [
            (local, StateSource::Local),
            (backup, StateSource::Backup),
            (remote_state, StateSource::Remote),
        ] {
            let Some(candidate) = candidate else { continue };
            let newer = best
                .as_ref()
                .map_or(true, |(current, _)| candidate.last_updated > current.last_updated);
            if newer {
                best = Some((candidate, source));
            }
        }

        let Some((state, source)) = best else {
            tracing::debug!(user_id, "no stored state");
            return Ok(None);
        };

        let needs_sync = match source {
            StateSource::Remote => false,
            StateSource::Local | StateSource::Backup => {
                has_backup
                    || !remote_reachable
                    || remote_updated.map_or(true, |remote| remote < state.last_updated)
            }
        };

        match source {
            StateSource::Local => {}
            StateSource::Backup => self.persist(&state)?,
            StateSource::Remote => {
                let record = StoredRecord::primary(&state, Utc::now())?;
                self.with_repository(|repo| -> Result<(), DbError> {
                    repo.put_record(&record)?;
                    repo.mark_synced(&record.key, state.last_updated, Utc::now())?;
                    repo.delete_record(&backup_key(user_id))
                })?;
            }
        }

        tracing::info!(user_id, ?source, needs_sync, "loaded state");
        Ok(Some(LoadedState {
            state,
            source,
            needs_sync,
        }))
    }

    async fn fetch_remote(&self, user_id: &str) -> RemoteCopy {
        let remote = self.inner.remote.as_ref();
        match self
            .inner
            .policy
            .run("fetch", move || remote.fetch(user_id))
            .await
        {
            Ok((Some(payload), _)) => match SchedulerState::try_from(payload) {
                Ok(state) if state.user_id != user_id => {
                    tracing::error!(
                        user_id,
                        remote_user_id = %state.user_id,
                        "remote copy belongs to another user, ignoring it"
                    );
                    RemoteCopy::Unreachable
                }
                Ok(state) => {
                    self.record_pushed(user_id, state.last_updated).await;
                    RemoteCopy::Present(state)
                }
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "ignoring invalid remote copy");
                    RemoteCopy::Absent
                }
            },
            Ok((None, _)) => RemoteCopy::Absent,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "remote copy unavailable, using local state");
                RemoteCopy::Unreachable
            }
        }
    }
}

/// Read and verify one record. Unreadable records are skipped.
fn read_state<R: LocalStore>(repo: &R, key: &str) -> Result<Option<SchedulerState>, DbError> {
    let Some(record) = repo.get_record(key)? else {
        return Ok(None);
    };
    match record.decode() {
        Ok(state) => Ok(Some(state)),
        Err(e) => {
            tracing::warn!(key, error = %e, "ignoring unreadable record");
            Ok(None)
        }
    }
}
