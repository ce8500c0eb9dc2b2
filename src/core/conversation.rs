//! Conversation memory for Threadline.
//!
//! Each user key is bound to one assistant thread. The binding is the
//! context handle a task carries into the completion call.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::task::UserKey;
use crate::error::Result;

/// Persisted state of one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub user_key: String,

    /// Assistant thread holding the conversation history
    pub thread_id: Option<String>,

    /// Completed question/answer turns on the current thread
    #[serde(default)]
    pub turns: u64,

    pub created_at: i64,
    pub updated_at: i64,
}

impl ConversationState {
    fn new(user_key: &UserKey) -> Self {
        let now = now_timestamp();
        Self {
            user_key: user_key.to_string(),
            thread_id: None,
            turns: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Conversation store: in memory, optionally mirrored to a JSON file.
pub struct ConversationStore {
    path: Option<PathBuf>,
    conversations: Mutex<Entries>,
    /// Version of the newest snapshot on disk. Held while writing.
    written: Arc<Mutex<u64>>,
}

#[derive(Default)]
struct Entries {
    by_user: HashMap<String, ConversationState>,
    /// Bumped on every change.
    version: u64,
}

impl Entries {
    fn snapshot(&self) -> Snapshot {
        let mut states: Vec<ConversationState> = self.by_user.values().cloned().collect();
        states.sort_by(|a, b| a.user_key.cmp(&b.user_key));
        Snapshot {
            version: self.version,
            states,
        }
    }
}

struct Snapshot {
    version: u64,
    states: Vec<ConversationState>,
}

impl ConversationStore {
    /// Store that forgets everything on restart.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            conversations: Mutex::new(Entries::default()),
            written: Arc::new(Mutex::new(0)),
        }
    }

    /// Open (or start) a store persisted at `path`. An unreadable file is
    /// logged and replaced on the next write.
    pub fn open(path: PathBuf) -> Result<Self> {
        let by_user: HashMap<String, ConversationState> = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Vec<ConversationState>>(&content) {
                Ok(list) => list
                    .into_iter()
                    .map(|state| (state.user_key.clone(), state))
                    .collect(),
                Err(e) => {
                    tracing::warn!(
                        "Ignoring unreadable conversation store {}: {}",
                        path.display(),
                        e
                    );
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        tracing::debug!(
            "Opened conversation store {} ({} conversations)",
            path.display(),
            by_user.len()
        );

        Ok(Self {
            path: Some(path),
            conversations: Mutex::new(Entries {
                by_user,
                version: 0,
            }),
            written: Arc::new(Mutex::new(0)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Context handle for `user_key`.
    pub fn handle(self: &Arc<Self>, user_key: &UserKey) -> ConversationHandle {
        ConversationHandle {
            user_key: user_key.clone(),
            store: Arc::clone(self),
        }
    }

    pub fn get(&self, user_key: &UserKey) -> Option<ConversationState> {
        self.lock().by_user.get(user_key.as_str()).cloned()
    }

    /// Forget the thread bound to `user_key`. Returns whether one existed.
    pub async fn reset(&self, user_key: &UserKey) -> bool {
        let snapshot = {
            let mut entries = self.lock();
            if entries.by_user.remove(user_key.as_str()).is_none() {
                return false;
            }
            entries.version += 1;
            entries.snapshot()
        };
        tracing::info!(user = %user_key, "Conversation reset");
        self.persist(snapshot).await;
        true
    }

    pub fn len(&self) -> usize {
        self.lock().by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn update<F>(&self, user_key: &UserKey, f: F)
    where
        F: FnOnce(&mut ConversationState),
    {
        let snapshot = {
            let mut entries = self.lock();
            let state = entries
                .by_user
                .entry(user_key.to_string())
                .or_insert_with(|| ConversationState::new(user_key));
            f(state);
            state.updated_at = now_timestamp();
            entries.version += 1;
            entries.snapshot()
        };
        self.persist(snapshot).await;
    }

    /// Best effort; a failed write only costs memory across restarts.
    async fn persist(&self, snapshot: Snapshot) {
        let Some(path) = self.path.clone() else {
            return;
        };
        let written = Arc::clone(&self.written);
        let target = path.clone();

        match tokio::task::spawn_blocking(move || write_snapshot(&target, &written, snapshot)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!("Failed to persist conversations to {}: {}", path.display(), e)
            }
            Err(e) => tracing::warn!("Conversation persist task failed: {}", e),
        }
    }
}

/// Write `snapshot` unless a newer one is already on disk. The version check
/// and the write happen under one lock, so concurrent writers cannot roll the
/// file back. The file is replaced through a rename, so a crash never leaves
/// it half written.
fn write_snapshot(path: &Path, written: &Mutex<u64>, snapshot: Snapshot) -> Result<()> {
    let mut on_disk = written
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if snapshot.version <= *on_disk {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(&snapshot.states)?)?;
    std::fs::rename(&tmp, path)?;

    *on_disk = snapshot.version;
    Ok(())
}

/// Context handle for one user's conversation.
#[derive(Clone)]
pub struct ConversationHandle {
    user_key: UserKey,
    store: Arc<ConversationStore>,
}

impl ConversationHandle {
    pub fn user_key(&self) -> &UserKey {
        &self.user_key
    }

    pub fn thread_id(&self) -> Option<String> {
        self.store
            .get(&self.user_key)
            .and_then(|state| state.thread_id)
    }

    pub async fn bind_thread(&self, thread_id: &str) {
        self.store
            .update(&self.user_key, |state| {
                state.thread_id = Some(thread_id.to_string());
                state.turns = 0;
            })
            .await;
    }

    pub async fn record_turn(&self) {
        self.store
            .update(&self.user_key, |state| state.turns += 1)
            .await;
    }

    /// Forget this user's thread. Returns whether one was bound.
    pub async fn reset(&self) -> bool {
        self.store.reset(&self.user_key).await
    }
}
