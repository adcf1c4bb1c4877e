//! Operation Coordinator
//!
//! Owns every live background task so none is dropped mid-flight.
//!
//! # Architecture
//!
//! - **Slots**: at most one task per [`OperationKind`]. Submitting a new task
//!   for an occupied slot cancels the current one, waits for it to stop,
//!   discards it and only then starts the replacement (cancel-and-replace).
//! - **Detached registry**: fire-and-forget tasks without a slot (suggestion
//!   generation), keyed by task id.
//!
//! Every task removes its own entry on its terminal transition. Removal is
//! matched by task id, so a finishing task never evicts its replacement.

use crate::operations::{Operation, TaskExecutor, TaskHandle};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// Slot key: one in-flight task per kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Load,
    Save,
    Delete,
    Search,
    Relationships,
    Hierarchy,
    Rename,
    NameCache,
    LastModified,
    /// Caller-chosen slot for ad-hoc read queries
    Named(String),
}

type Registry<K> = Arc<Mutex<HashMap<K, Arc<TaskHandle>>>>;

fn lock<K>(registry: &Registry<K>) -> MutexGuard<'_, HashMap<K, Arc<TaskHandle>>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Remove `key` only while it still refers to task `id`
fn remove_if_current<K: Eq + Hash>(registry: &Registry<K>, key: &K, id: Uuid) -> bool {
    let mut entries = lock(registry);
    if entries.get(key).map(|handle| handle.id()) == Some(id) {
        entries.remove(key);
        true
    } else {
        false
    }
}

#[derive(Default)]
pub struct OperationCoordinator {
    slots: Registry<OperationKind>,
    detached: Registry<Uuid>,
    submit_lock: AsyncMutex<()>,
}

impl OperationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `executor` in the slot for `kind`, replacing any running task
    ///
    /// The previous task is cancelled and fully stopped before the new one
    /// starts, so it can no longer emit. Submissions are serialised.
    pub async fn submit<O: Operation>(
        &self,
        kind: OperationKind,
        executor: TaskExecutor<O>,
    ) -> Arc<TaskHandle> {
        let _guard = self.submit_lock.lock().await;

        let previous = lock(&self.slots).get(&kind).cloned();
        if let Some(previous) = previous {
            let cancelled = previous.cancel().await;
            remove_if_current(&self.slots, &kind, previous.id());
            tracing::debug!(
                kind = ?kind,
                task_id = %previous.id(),
                cancelled,
                "Replaced previous task"
            );
        }

        let slots = self.slots.clone();
        let key = kind.clone();
        let handle = executor
            .on_finished(move |id, _| {
                remove_if_current(&slots, &key, id);
            })
            .start();

        lock(&self.slots).insert(kind.clone(), handle.clone());
        // The task may have finished before it was registered; its own
        // removal then saw nothing to remove.
        if handle.state().is_terminal() {
            remove_if_current(&self.slots, &kind, handle.id());
        }
        handle
    }

    /// Start a fire-and-forget task tracked until it finishes
    pub fn spawn_detached<O: Operation>(&self, executor: TaskExecutor<O>) -> Arc<TaskHandle> {
        let detached = self.detached.clone();
        let handle = executor
            .on_finished(move |id, _| {
                remove_if_current(&detached, &id, id);
            })
            .start();

        let id = handle.id();
        lock(&self.detached).insert(id, handle.clone());
        if handle.state().is_terminal() {
            remove_if_current(&self.detached, &id, id);
        }
        handle
    }

    /// Cancel the task in `kind`'s slot and wait for it to stop
    ///
    /// Returns whether a running task was cancelled.
    pub async fn cancel(&self, kind: &OperationKind) -> bool {
        let _guard = self.submit_lock.lock().await;
        let current = lock(&self.slots).get(kind).cloned();
        match current {
            Some(handle) => {
                let cancelled = handle.cancel().await;
                remove_if_current(&self.slots, kind, handle.id());
                cancelled
            }
            None => false,
        }
    }

    /// Cancel every slot and every detached task; returns how many were cancelled
    pub async fn cancel_all(&self) -> usize {
        let _guard = self.submit_lock.lock().await;
        let mut handles: Vec<Arc<TaskHandle>> = lock(&self.slots).values().cloned().collect();
        handles.extend(lock(&self.detached).values().cloned());

        let mut cancelled = 0;
        for handle in handles {
            if handle.cancel().await {
                cancelled += 1;
            }
        }
        lock(&self.slots).retain(|_, handle| !handle.state().is_terminal());
        lock(&self.detached).retain(|_, handle| !handle.state().is_terminal());
        tracing::info!(cancelled, "Cancelled all background tasks");
        cancelled
    }

    /// Task currently occupying `kind`'s slot
    pub fn active(&self, kind: &OperationKind) -> Option<Arc<TaskHandle>> {
        lock(&self.slots).get(kind).cloned()
    }

    pub fn active_count(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn detached_count(&self) -> usize {
        lock(&self.detached).len()
    }
}
