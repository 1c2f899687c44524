//! The scheduler session: the one handle the UI layer talks to.

use crate::db::LocalStore;
use crate::identity::{Identity, MigrationOutcome};
use crate::sync::{RemoteStore, RetryPolicy, SyncError, SyncManager, SyncOutcome, SyncStatus};
use chrono::Utc;
use helix_core::{
    advance, validate_completion, AdvanceOutcome, ContentManifest, SchedulerError,
    SchedulerState, SeedPolicy, Stitch, TubeCycler, TubeNumber,
};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

/// Pause between rotating to the next tube and re-slotting the finished stitch.
pub const DEFAULT_ROTATION_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub rotation_delay: Duration,
    pub seed_policy: SeedPolicy,
    /// Push to the remote in the background after every change.
    pub auto_sync: bool,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rotation_delay: DEFAULT_ROTATION_DELAY,
            seed_policy: SeedPolicy::default(),
            auto_sync: true,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("completion task stopped before finishing: {0}")]
    Interrupted(String),
}

/// The stitch the learner should be shown next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentStitch {
    pub tube: TubeNumber,
    pub thread_id: String,
    /// `None` only for a tube seeded with no content.
    pub stitch: Option<Stitch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionedStitch {
    pub position: u32,
    pub stitch: Stitch,
}

/// What one `complete_stitch` call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionReport {
    pub completed_tube: TubeNumber,
    pub outcome: AdvanceOutcome,
    pub active_tube: TubeNumber,
    pub cycle_count: u64,
    pub points_awarded: u64,
}

struct SessionInner<R> {
    config: SessionConfig,
    manifest: ContentManifest,
    state: Mutex<SchedulerState>,
    cycler: Arc<TubeCycler>,
    sync: SyncManager<R>,
    identity: Mutex<Identity>,
    sign_in_gate: AsyncMutex<()>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

/// Explicitly constructed scheduler handle.
///
/// Cheap to clone; every clone drives the same state. Only this type mutates
/// the scheduler state, and only while holding the cycler's in-flight guard.
pub struct HelixSession<R> {
    inner: Arc<SessionInner<R>>,
}

impl<R> Clone for HelixSession<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: LocalStore + 'static> HelixSession<R> {
    /// Open a session for `user_id`, or an anonymous one when `None`.
    ///
    /// Signing in absorbs anonymous progress left on this device. The stored
    /// state is reconciled with the remote, or seeded from `manifest` when
    /// none exists. Session points start at zero.
    pub async fn open(
        config: SessionConfig,
        repository: R,
        remote: Arc<dyn RemoteStore>,
        user_id: Option<&str>,
        manifest: ContentManifest,
    ) -> Result<Self, SessionError> {
        let sync = SyncManager::new(repository, remote, config.retry.clone());
        let identity = sync.resolve_identity(user_id).await?;
        let (state, needs_sync) = load_or_seed(&sync, &identity, &manifest, &config).await?;

        tracing::info!(
            user_id = %state.user_id,
            anonymous = identity.is_anonymous(),
            active_tube = %state.active_tube,
            "session opened"
        );

        let session = Self {
            inner: Arc::new(SessionInner {
                config,
                manifest,
                state: Mutex::new(state.clone()),
                cycler: Arc::new(TubeCycler::new()),
                sync,
                identity: Mutex::new(identity),
                sign_in_gate: AsyncMutex::new(()),
                pending: Mutex::new(Vec::new()),
            }),
        };
        if needs_sync {
            session.schedule_sync(state);
        }
        Ok(session)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a finished drill for the stitch at the front of the active tube.
    ///
    /// The active tube rotates first and is persisted; after the rotation
    /// delay the previous tube is re-slotted and persisted again. A second
    /// call while one is in flight fails with `RotationInFlight`. Rejected
    /// completions leave the state untouched.
    ///
    /// Once the guard is claimed the work runs on its own task, so dropping
    /// the returned future does not leave a rotated but unadvanced state.
    pub async fn complete_stitch(
        &self,
        thread_id: &str,
        stitch_id: &str,
        correct_answers: u32,
        total_questions: u32,
    ) -> Result<CompletionReport, SessionError> {
        let ticket = self.inner.cycler.try_begin_owned()?;

        let session = self.clone();
        let thread_id = thread_id.to_string();
        let stitch_id = stitch_id.to_string();
        let completion = tokio::spawn(async move {
            let result = session
                .run_completion(&thread_id, &stitch_id, correct_answers, total_questions)
                .await;
            drop(ticket);
            result
        });

        match completion.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(SessionError::Interrupted(e.to_string())),
        }
    }

    /// Rotate, wait, then advance. The caller holds the in-flight guard.
    async fn run_completion(
        &self,
        thread_id: &str,
        stitch_id: &str,
        correct_answers: u32,
        total_questions: u32,
    ) -> Result<CompletionReport, SessionError> {
        let (completed_tube, rotated) = {
            let state = self.state();
            validate_completion(
                state.current_tube(),
                thread_id,
                stitch_id,
                correct_answers,
                total_questions,
            )?;
            let mut rotated = state.clone();
            self.inner.cycler.rotate(&mut rotated);
            rotated.touch(Utc::now());
            (state.active_tube, rotated)
        };
        self.inner.sync.persist(&rotated)?;
        tracing::debug!(
            from = %completed_tube,
            to = %rotated.active_tube,
            cycle_count = rotated.cycle_count,
            "rotated active tube"
        );
        *self.state() = rotated;

        if !self.inner.config.rotation_delay.is_zero() {
            tokio::time::sleep(self.inner.config.rotation_delay).await;
        }

        let (advanced, report) = {
            let state = self.state();
            let now = Utc::now();
            let result = advance(
                state.tube(completed_tube),
                stitch_id,
                correct_answers,
                total_questions,
                now,
            )?;
            let mut next = state.clone();
            *next.tube_mut(completed_tube) = result.tube;
            let points_awarded = next.points.award(correct_answers);
            next.touch(now);

            let report = CompletionReport {
                completed_tube,
                outcome: result.outcome,
                active_tube: next.active_tube,
                cycle_count: next.cycle_count,
                points_awarded,
            };
            (next, report)
        };
        self.inner.sync.persist(&advanced)?;
        tracing::debug!(
            tube = %completed_tube,
            stitch_id,
            perfect = report.outcome.was_perfect,
            new_skip = %report.outcome.new_skip,
            new_position = report.outcome.new_position,
            "advanced tube"
        );
        *self.state() = advanced.clone();

        if self.inner.config.auto_sync {
            self.schedule_sync(advanced);
        }
        Ok(report)
    }

    pub fn get_current_stitch(&self) -> CurrentStitch {
        let state = self.state();
        let (tube, stitch) = TubeCycler::current(&state);
        CurrentStitch {
            tube,
            thread_id: state.tube(tube).thread_id.clone(),
            stitch: stitch.cloned(),
        }
    }

    /// Stitches of the active tube in position order.
    pub fn get_current_tube_stitches(&self) -> Vec<PositionedStitch> {
        self.state()
            .current_tube()
            .positions
            .iter()
            .map(|(position, stitch)| PositionedStitch {
                position,
                stitch: stitch.clone(),
            })
            .collect()
    }

    pub fn get_state(&self) -> SchedulerState {
        self.state().clone()
    }

    pub fn get_cycle_count(&self) -> u64 {
        self.state().cycle_count
    }

    pub fn identity(&self) -> Identity {
        self.inner
            .identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Switch to a signed-in user.
    ///
    /// Anonymous progress is migrated once (replays are no-ops), then the
    /// user's state is loaded. Concurrent calls run one after another, so a
    /// duplicate auth event for the same user returns `Unchanged`. Fails with
    /// `RotationInFlight` while a completion is being processed.
    pub async fn sign_in(&self, user_id: &str) -> Result<MigrationOutcome, SessionError> {
        let _gate = self.inner.sign_in_gate.lock().await;
        let _ticket = self.inner.cycler.try_begin()?;

        let outcome = match self.identity() {
            Identity::Authenticated(current) if current == user_id => {
                return Ok(MigrationOutcome::Unchanged);
            }
            Identity::Anonymous(anonymous_id) => {
                self.inner
                    .sync
                    .migrate_identity(&anonymous_id, user_id)
                    .await?
            }
            Identity::Authenticated(_) => MigrationOutcome::Unchanged,
        };

        let identity = Identity::Authenticated(user_id.to_string());
        let (state, needs_sync) =
            load_or_seed(&self.inner.sync, &identity, &self.inner.manifest, &self.inner.config)
                .await?;

        *self.state() = state.clone();
        *self
            .inner
            .identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = identity;
        tracing::info!(user_id, ?outcome, "signed in");

        if needs_sync {
            self.schedule_sync(state);
        }
        Ok(outcome)
    }

    /// Push the current state now and wait for the result.
    pub async fn sync_now(&self) -> Result<SyncOutcome, SessionError> {
        let snapshot = self.get_state();
        Ok(self.inner.sync.sync(&snapshot).await?)
    }

    pub async fn sync_status(&self) -> SyncStatus {
        self.inner.sync.status().await
    }

    /// Wait for every background sync started so far.
    pub async fn wait_for_pending_sync(&self) {
        loop {
            let handles: Vec<_> = {
                let mut pending = self
                    .inner
                    .pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                pending.drain(..).collect()
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "background sync task failed");
                }
            }
        }
    }

    fn schedule_sync(&self, snapshot: SchedulerState) {
        let sync = self.inner.sync.clone();
        let handle = tokio::spawn(async move {
            match sync.sync(&snapshot).await {
                Ok(outcome) => tracing::debug!(?outcome, "background sync finished"),
                Err(e) => tracing::warn!(error = %e, "background sync failed"),
            }
        });

        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        pending.retain(|handle| !handle.is_finished());
        pending.push(handle);
    }
}

/// Reconciled state for `identity`, or a fresh seed. Session points are
/// reset, and the result is persisted.
async fn load_or_seed<R: LocalStore>(
    sync: &SyncManager<R>,
    identity: &Identity,
    manifest: &ContentManifest,
    config: &SessionConfig,
) -> Result<(SchedulerState, bool), SyncError> {
    let user_id = identity.user_id();
    let (mut state, mut needs_sync) = match sync.load(user_id).await? {
        Some(loaded) => (loaded.state, loaded.needs_sync),
        None => {
            tracing::info!(user_id, seed_policy = ?config.seed_policy, "seeding new state");
            (
                SchedulerState::seed(user_id, manifest, config.seed_policy, Utc::now()),
                true,
            )
        }
    };

    if state.points.session != 0 {
        state.points.reset_session();
        state.touch(Utc::now());
        needs_sync = true;
    }
    sync.persist(&state)?;
    Ok((state, needs_sync && config.auto_sync))
}
