//! Local-first Triple-Helix client.
//!
//! Wires the scheduler from `helix-core` to SQLite storage and an optional
//! remote backend. `HelixSession` is the handle a UI drives.

pub mod config;
pub mod db;
pub mod identity;
pub mod session;
pub mod sync;

pub use config::{default_db_path, ClientConfig, ConfigError};
pub use db::{DbError, SqliteRepository};
pub use identity::{generate_anonymous_id, Identity, KeptState, MigrationOutcome};
pub use session::{
    CompletionReport, CurrentStitch, HelixSession, PositionedStitch, SessionConfig, SessionError,
};
pub use sync::{
    HttpRemote, LoadedState, NullRemote, RemoteError, RemoteStore, RetryPolicy, StateSource,
    SyncError, SyncManager, SyncOutcome, SyncStatus,
};

use anyhow::Context;
use helix_core::ContentManifest;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Open a session from environment-derived configuration.
pub async fn open_from_config(
    config: &ClientConfig,
    manifest: ContentManifest,
    user_id: Option<&str>,
) -> anyhow::Result<HelixSession<SqliteRepository>> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }

    tracing::info!(path = %config.db_path.display(), "opening database");
    let repository = SqliteRepository::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;

    if config.backend_url.is_none() {
        tracing::info!("no backend configured, running local-only");
    }

    let session = HelixSession::open(
        config.session_config(),
        repository,
        config.remote(),
        user_id,
        manifest,
    )
    .await?;
    Ok(session)
}
