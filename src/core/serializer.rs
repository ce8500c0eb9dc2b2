//! Per-user task serialization.
//!
//! Every user key owns a lane: a FIFO of pending tasks plus a busy flag. A
//! lane exists only while the user has queued or in-flight work. Tasks of one
//! user run strictly in submission order, one at a time; lanes of different
//! users drain concurrently on separate tokio tasks.
//!
//! All reads and writes of a lane happen inside one critical section on the
//! registry mutex, and the lock is never held across an `.await`:
//! - `submit` creates the lane, enqueues, and claims the busy flag together,
//!   so two racing submits for an idle user cannot both start a drain.
//! - the drain loop observes an empty backlog and removes the lane together,
//!   so a submit arriving right after sees no lane and starts fresh.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use crate::config::{OverflowPolicy, QueueConfig};
use crate::core::processor::TaskProcessor;
use crate::core::task::{Task, UserKey};

/// Backlog bounds for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueLimits {
    /// Tasks allowed to wait behind the in-flight one. `None` is unbounded.
    pub max_pending: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl From<&QueueConfig> for QueueLimits {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_pending: config.max_pending_per_user,
            overflow: config.overflow,
        }
    }
}

/// What `submit` did with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The user was idle; a drain was started for this task.
    Started,
    /// Appended behind other work; `position` is 1-based within the backlog.
    Queued { position: usize },
    /// Backlog full, task dropped.
    Rejected,
    /// Backlog full, the oldest waiting task was dropped to make room.
    ReplacedOldest,
}

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Users with a lane
    pub active_users: usize,
    /// Tasks waiting behind an in-flight task
    pub pending: usize,
    /// Tasks currently being processed
    pub in_flight: usize,
}

impl fmt::Display for QueueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Queue Stats:")?;
        writeln!(f, "  Active users: {}", self.active_users)?;
        writeln!(f, "  Pending:      {}", self.pending)?;
        write!(f, "  In flight:    {}", self.in_flight)
    }
}

/// One user's registry entry.
struct Lane {
    pending: VecDeque<Task>,
    /// Set while a drain owns this lane.
    busy: bool,
    /// Id of the task inside the processor, if any.
    current: Option<String>,
    processed: u64,
}

impl Lane {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            busy: false,
            current: None,
            processed: 0,
        }
    }
}

struct Shared {
    lanes: Mutex<HashMap<UserKey, Lane>>,
    processor: Arc<dyn TaskProcessor>,
    limits: QueueLimits,
    /// Notified whenever a lane is removed.
    lane_closed: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HashMap<UserKey, Lane>> {
        // Lane bookkeeping stays consistent across a panic elsewhere.
        self.lanes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Serializes tasks per user. Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct UserSerializer {
    shared: Arc<Shared>,
}

impl UserSerializer {
    pub fn new(processor: Arc<dyn TaskProcessor>, limits: QueueLimits) -> Self {
        Self {
            shared: Arc::new(Shared {
                lanes: Mutex::new(HashMap::new()),
                processor,
                limits,
                lane_closed: Notify::new(),
            }),
        }
    }

    /// Append `task` to the user's lane, starting a drain if the user was
    /// idle. Must be called from within a tokio runtime.
    pub fn submit(&self, user_key: UserKey, task: Task) -> SubmitOutcome {
        let (outcome, start) = {
            let mut lanes = self.shared.lock();
            let lane = lanes.entry(user_key.clone()).or_insert_with(Lane::new);

            let mut outcome = None;
            if let Some(max) = self.shared.limits.max_pending {
                // An idle lane starts its task right away, so the bound only
                // applies to the backlog behind a running task.
                if lane.busy && lane.pending.len() >= max {
                    match self.shared.limits.overflow {
                        OverflowPolicy::RejectNewest => {
                            tracing::warn!(
                                user = %user_key,
                                task = task.id(),
                                "Backlog full ({}), rejecting task",
                                max
                            );
                            return SubmitOutcome::Rejected;
                        }
                        OverflowPolicy::DropOldest => {
                            if let Some(evicted) = lane.pending.pop_front() {
                                tracing::warn!(
                                    user = %user_key,
                                    task = evicted.id(),
                                    "Backlog full ({}), dropping oldest task",
                                    max
                                );
                            }
                            outcome = Some(SubmitOutcome::ReplacedOldest);
                        }
                    }
                }
            }

            tracing::debug!(user = %user_key, task = task.id(), "Enqueued task");
            lane.pending.push_back(task);

            if lane.busy {
                let queued = SubmitOutcome::Queued {
                    position: lane.pending.len(),
                };
                (outcome.unwrap_or(queued), false)
            } else {
                lane.busy = true;
                (outcome.unwrap_or(SubmitOutcome::Started), true)
            }
        };

        if start {
            tracing::debug!(user = %user_key, "Starting drain");
            tokio::spawn(drain(Arc::clone(&self.shared), user_key));
        }

        outcome
    }

    /// Snapshot of the registry.
    pub fn stats(&self) -> QueueStats {
        let lanes = self.shared.lock();
        QueueStats {
            active_users: lanes.len(),
            pending: lanes.values().map(|lane| lane.pending.len()).sum(),
            in_flight: lanes.values().filter(|lane| lane.current.is_some()).count(),
        }
    }

    /// Whether `user_key` currently has a lane.
    pub fn is_active(&self, user_key: &UserKey) -> bool {
        self.shared.lock().contains_key(user_key)
    }

    /// Tasks waiting for `user_key`, excluding the in-flight one.
    pub fn pending(&self, user_key: &UserKey) -> usize {
        self.shared
            .lock()
            .get(user_key)
            .map_or(0, |lane| lane.pending.len())
    }

    /// Wait until no lane remains. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let shared = &self.shared;
        let wait = async {
            loop {
                let closed = shared.lane_closed.notified();
                tokio::pin!(closed);
                closed.as_mut().enable();

                if shared.lock().is_empty() {
                    return;
                }
                closed.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

/// Removes the lane if a drain is dropped before it finishes, so the busy
/// flag can never outlive its drain.
struct DrainGuard {
    shared: Arc<Shared>,
    user_key: UserKey,
    finished: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(lane) = self.shared.lock().remove(&self.user_key) {
            tracing::warn!(
                user = %self.user_key,
                "Drain aborted with {} pending task(s)",
                lane.pending.len()
            );
        }
        self.shared.lane_closed.notify_waiters();
    }
}

/// Process the user's lane until it is empty, then remove it.
async fn drain(shared: Arc<Shared>, user_key: UserKey) {
    let mut guard = DrainGuard {
        shared: Arc::clone(&shared),
        user_key: user_key.clone(),
        finished: false,
    };

    loop {
        let task = {
            let mut lanes = shared.lock();
            let Some(lane) = lanes.get_mut(&user_key) else {
                tracing::error!(user = %user_key, "Lane vanished during drain");
                break;
            };
            match lane.pending.pop_front() {
                Some(task) => {
                    lane.current = Some(task.id().to_string());
                    task
                }
                None => {
                    let processed = lane.processed;
                    lanes.remove(&user_key);
                    tracing::debug!(user = %user_key, "Lane drained after {} task(s)", processed);
                    break;
                }
            }
        };

        let task_id = task.id().to_string();
        let started = Instant::now();
        let processor = Arc::clone(&shared.processor);

        // A separate task turns a panic into a JoinError instead of killing
        // the drain.
        match tokio::spawn(async move { processor.process(task).await }).await {
            Ok(Ok(())) => tracing::info!(
                user = %user_key,
                task = %task_id,
                "Task completed in {:?}",
                started.elapsed()
            ),
            Ok(Err(e)) => tracing::error!(
                user = %user_key,
                task = %task_id,
                "Task failed after {:?}: {}",
                started.elapsed(),
                e
            ),
            Err(e) => tracing::error!(
                user = %user_key,
                task = %task_id,
                "Task panicked: {}",
                e
            ),
        }

        if let Some(lane) = shared.lock().get_mut(&user_key) {
            lane.current = None;
            lane.processed += 1;
        }
    }

    guard.finished = true;
    drop(guard);
    shared.lane_closed.notify_waiters();
}
