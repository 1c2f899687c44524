//! Anonymous and signed-in identities, and folding one into the other.

use crate::db::{backup_key, primary_key, DbError, IdentityMigration, LocalStore, StoredRecord};
use crate::sync::{SyncError, SyncManager};
use chrono::Utc;
use helix_core::SchedulerState;
use uuid::Uuid;

/// Who the scheduler state belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Locally generated id, persisted until the learner signs in.
    Anonymous(String),
    Authenticated(String),
}

impl Identity {
    pub fn user_id(&self) -> &str {
        match self {
            Self::Anonymous(id) | Self::Authenticated(id) => id,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous(_))
    }
}

/// Generate a fresh anonymous id.
pub fn generate_anonymous_id() -> String {
    format!("anon-{}", Uuid::new_v4())
}

/// Which state survived a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeptState {
    /// The anonymous progress was newer and now lives under the user's key.
    Anonymous,
    /// The user's existing progress was newer or the anonymous one was empty.
    Authenticated,
    /// Neither identity had any stored state.
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Nothing to migrate.
    Unchanged,
    /// This anonymous id was folded in earlier.
    AlreadyMigrated { user_id: String },
    Migrated { kept: KeptState },
}

impl<R: LocalStore> SyncManager<R> {
    /// The persisted anonymous id, generated and saved on first use.
    pub fn anonymous_id(&self) -> Result<String, SyncError> {
        let id = self.with_repository(|repo| -> Result<String, DbError> {
            if let Some(existing) = repo.get_anonymous_id()? {
                return Ok(existing);
            }
            let id = generate_anonymous_id();
            repo.save_anonymous_id(&id)?;
            tracing::info!(anonymous_id = %id, "created anonymous identity");
            Ok(id)
        })?;
        Ok(id)
    }

    /// Identity to open a session with. A signed-in user first absorbs any
    /// anonymous progress left on this device.
    pub async fn resolve_identity(&self, user_id: Option<&str>) -> Result<Identity, SyncError> {
        let Some(user_id) = user_id else {
            return Ok(Identity::Anonymous(self.anonymous_id()?));
        };

        let pending = self.with_repository(|repo| repo.get_anonymous_id())?;
        if let Some(anonymous_id) = pending {
            self.migrate_identity(&anonymous_id, user_id).await?;
        }
        Ok(Identity::Authenticated(user_id.to_string()))
    }

    /// Move anonymous progress under `user_id`.
    ///
    /// Last-write-wins between the two copies; the anonymous keys are dropped
    /// and the migration is recorded in one transaction. Replaying a finished
    /// migration is a no-op.
    pub async fn migrate_identity(
        &self,
        anonymous_id: &str,
        user_id: &str,
    ) -> Result<MigrationOutcome, SyncError> {
        if anonymous_id == user_id {
            return Ok(MigrationOutcome::Unchanged);
        }
        if let Some(done) = self.with_repository(|repo| repo.get_migration(anonymous_id))? {
            tracing::debug!(anonymous_id, user_id = %done.user_id, "identity already migrated");
            return Ok(MigrationOutcome::AlreadyMigrated {
                user_id: done.user_id,
            });
        }

        let anonymous = self.load_local_only(anonymous_id)?;
        let authenticated = self.load(user_id).await?.map(|loaded| loaded.state);

        let (kept, adopted) = match (anonymous, authenticated) {
            (Some(anon), Some(existing)) if anon.last_updated <= existing.last_updated => {
                (KeptState::Authenticated, None)
            }
            (Some(anon), _) => {
                let rekeyed = SchedulerState {
                    user_id: user_id.to_string(),
                    ..anon
                };
                (KeptState::Anonymous, Some(StoredRecord::primary(&rekeyed, Utc::now())?))
            }
            (None, Some(_)) => (KeptState::Authenticated, None),
            (None, None) => (KeptState::Nothing, None),
        };

        let migration = IdentityMigration {
            anonymous_id: anonymous_id.to_string(),
            user_id: user_id.to_string(),
            migrated_at: Utc::now(),
        };
        self.with_repository(|repo| repo.commit_migration(&migration, adopted.as_ref()))?;

        tracing::info!(anonymous_id, user_id, ?kept, "migrated anonymous identity");
        Ok(MigrationOutcome::Migrated { kept })
    }

    /// Newest of the local primary and backup, without asking the remote.
    fn load_local_only(&self, user_id: &str) -> Result<Option<SchedulerState>, SyncError> {
        let candidates = self.with_repository(|repo| -> Result<_, DbError> {
            let mut found = Vec::new();
            for key in [primary_key(user_id), backup_key(user_id)] {
                if let Some(record) = repo.get_record(&key)? {
                    match record.decode() {
                        Ok(state) => found.push(state),
                        Err(e) => tracing::warn!(key = %key, error = %e, "ignoring unreadable record"),
                    }
                }
            }
            Ok(found)
        })?;
        Ok(candidates.into_iter().max_by_key(|state| state.last_updated))
    }
}
