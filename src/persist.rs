//! Durable storage for the conversation list and the current selection.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::DEFAULT_SAVE_QUIET_PERIOD_MS;
use crate::error::ChatError;
use crate::types::Conversation;

/// Everything that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSessions {
    pub conversations: Vec<Conversation>,
    /// Selected conversation; ignored on restore when it no longer exists.
    #[serde(default)]
    pub current_id: Option<String>,
}

/// Storage backend for session snapshots.
#[async_trait]
pub trait SessionPersistence: Send + Sync {
    async fn save(&self, sessions: &StoredSessions) -> Result<(), ChatError>;

    /// Loads the last snapshot; an absent store yields an empty one.
    async fn load(&self) -> Result<StoredSessions, ChatError>;
}

pub type DynSessionPersistence = Arc<dyn SessionPersistence>;

fn persistence_error(action: &str, err: impl std::fmt::Display) -> ChatError {
    ChatError::Persistence {
        message: format!("failed to {action}: {err}"),
    }
}

/// On-disk shapes accepted by [`JsonFilePersistence::load`]. A bare array is what
/// `export_json` produces.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredFile {
    Full(StoredSessions),
    ConversationsOnly(Vec<Conversation>),
}

/// Writes the snapshot as pretty-printed JSON to a single file.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionPersistence for JsonFilePersistence {
    async fn save(&self, sessions: &StoredSessions) -> Result<(), ChatError> {
        let json = serde_json::to_string_pretty(sessions)
            .map_err(|err| persistence_error("serialize conversations", err))?;
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| persistence_error("create storage directory", err))?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|err| persistence_error("write conversations", err))
    }

    async fn load(&self) -> Result<StoredSessions, ChatError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(StoredSessions::default()),
            Err(err) => return Err(persistence_error("read conversations", err)),
        };
        let file: StoredFile = serde_json::from_str(&raw)
            .map_err(|err| persistence_error("parse conversations", err))?;
        Ok(match file {
            StoredFile::Full(sessions) => sessions,
            StoredFile::ConversationsOnly(conversations) => StoredSessions {
                conversations,
                current_id: None,
            },
        })
    }
}

/// Coalesces snapshots and saves only the newest once no new one arrived for the quiet
/// period.
///
/// Dropping the saver (or calling [`DebouncedSaver::shutdown`]) flushes a pending
/// snapshot immediately. Save failures are logged and otherwise ignored.
pub struct DebouncedSaver {
    snapshots: watch::Sender<StoredSessions>,
    task: JoinHandle<()>,
}

impl DebouncedSaver {
    /// Starts the background writer. Must be called inside a Tokio runtime.
    pub fn spawn(persistence: DynSessionPersistence, quiet_period: Duration) -> Self {
        let (snapshots, receiver) = watch::channel(StoredSessions::default());
        let task = tokio::spawn(run_saver(receiver, persistence, quiet_period));
        Self { snapshots, task }
    }

    /// Spawns with the default 600 ms quiet period.
    pub fn with_default_period(persistence: DynSessionPersistence) -> Self {
        Self::spawn(
            persistence,
            Duration::from_millis(DEFAULT_SAVE_QUIET_PERIOD_MS),
        )
    }

    /// Replaces the pending snapshot and restarts the quiet period.
    pub fn schedule(&self, sessions: StoredSessions) {
        self.snapshots.send_replace(sessions);
    }

    /// Flushes anything pending and waits for the writer to finish.
    pub async fn shutdown(self) {
        let Self { snapshots, task } = self;
        drop(snapshots);
        if let Err(err) = task.await {
            warn!(error = %err, "session saver task failed");
        }
    }
}

async fn run_saver(
    mut receiver: watch::Receiver<StoredSessions>,
    persistence: DynSessionPersistence,
    quiet_period: Duration,
) {
    while receiver.changed().await.is_ok() {
        let mut closed = false;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(quiet_period) => break,
                changed = receiver.changed() => {
                    if changed.is_err() {
                        closed = true;
                        break;
                    }
                }
            }
        }

        let snapshot = receiver.borrow_and_update().clone();
        match persistence.save(&snapshot).await {
            Ok(()) => debug!(
                conversations = snapshot.conversations.len(),
                "sessions saved"
            ),
            Err(err) => warn!(error = %err, "failed to save sessions"),
        }
        if closed {
            break;
        }
    }
}
