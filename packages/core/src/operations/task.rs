//! Cancellable Background Tasks
//!
//! Every database operation runs as one [`TaskExecutor`]: a tokio task that
//! owns its own [`ConnectionManager`], runs an [`Operation`] and emits exactly
//! one of {result, error}, or nothing if it was cancelled.
//!
//! # State Machine
//!
//! ```text
//! Idle ──start──► Running ──┬──► Completed   (result emitted)
//!                           ├──► Failed      (error emitted)
//!                           └──► Cancelled   (nothing emitted)
//! ```
//!
//! Every transition is a compare-and-set on a `watch` channel, so a cancel
//! racing a completion has exactly one winner. A result or error is emitted
//! only by the side that moved the task out of `Running`.
//!
//! # Cleanup
//!
//! The connection is closed after the operation returns, fails, panics or
//! is cancelled. [`TaskHandle::cancel`] waits until that cleanup and all
//! callbacks are done, so a cancelled handle can be discarded immediately.

use crate::db::{ConnectionManager, Connector, Session};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

/// Lifecycle of a background task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// No further transitions happen from a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Returned by [`TaskContext::checkpoint`] once the task has been cancelled
///
/// The executor maps it to `Cancelled`; it never reaches the error callback.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Task cancelled")]
pub struct TaskCancelled;

/// Error signal of a failed task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    /// Operation name, e.g. `save_node`
    pub operation: &'static str,
    /// Human-readable message with the cause chain on one line
    pub message: String,
    /// Full diagnostic: every cause, plus a backtrace when captured
    pub diagnostic: String,
}

impl TaskFailure {
    pub fn from_error(operation: &'static str, error: &anyhow::Error) -> Self {
        Self {
            operation,
            message: format!("{:#}", error),
            diagnostic: format!("{:?}", error),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.message)
    }
}

/// What an operation sees while it runs
pub struct TaskContext {
    connection: Arc<ConnectionManager>,
    state: watch::Receiver<TaskState>,
}

impl TaskContext {
    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow() == TaskState::Cancelled
    }

    /// `Err(TaskCancelled)` once cancellation has been requested
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(TaskCancelled.into());
        }
        Ok(())
    }

    /// Resolves when cancellation is requested
    pub async fn cancelled(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|state| *state == TaskState::Cancelled).await;
    }

    /// Session on this task's private connection
    pub async fn session(&self) -> Result<Session> {
        self.connection.session().await
    }
}

/// A unit of work run by a [`TaskExecutor`]
#[async_trait]
pub trait Operation: Send + 'static {
    type Output: Send + 'static;

    /// Name used in logs and in [`TaskFailure::operation`]
    fn name(&self) -> &'static str;

    /// Run the operation. Must not return a result after cancellation; call
    /// [`TaskContext::checkpoint`] before returning and between steps.
    async fn execute(&mut self, ctx: &TaskContext) -> Result<Self::Output>;
}

pub type ResultCallback<T> = Box<dyn FnOnce(T) + Send>;
pub type ErrorCallback = Box<dyn FnOnce(TaskFailure) + Send>;
pub type FinishedCallback = Box<dyn FnOnce(Uuid, TaskState) + Send>;

/// Shared view of a started task
pub struct TaskHandle {
    id: Uuid,
    operation: &'static str,
    state: watch::Sender<TaskState>,
    stopped: watch::Sender<bool>,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .field("state", &self.state())
            .finish()
    }
}

impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// True once the task has cleaned up and run its callbacks
    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    fn transition(&self, from: &[TaskState], to: TaskState) -> bool {
        self.state.send_if_modified(|state| {
            if from.contains(state) {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Request cancellation without waiting; returns whether this call won
    pub fn request_cancel(&self) -> bool {
        let won = self.transition(&[TaskState::Idle, TaskState::Running], TaskState::Cancelled);
        if won {
            tracing::debug!(task_id = %self.id, operation = self.operation, "Cancellation requested");
        }
        won
    }

    /// Cancel and wait until the task has fully stopped
    ///
    /// Returns `false` if the task had already reached a terminal state.
    pub async fn cancel(&self) -> bool {
        let won = self.request_cancel();
        self.stopped().await;
        won
    }

    /// Wait for the task to stop and return its terminal state
    pub async fn wait(&self) -> TaskState {
        self.stopped().await;
        self.state()
    }

    async fn stopped(&self) {
        let mut stopped = self.stopped.subscribe();
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }
}

/// Builder and runner for one background operation
pub struct TaskExecutor<O: Operation> {
    operation: O,
    connector: Arc<dyn Connector>,
    on_result: Option<ResultCallback<O::Output>>,
    on_error: Option<ErrorCallback>,
    on_finished: Option<FinishedCallback>,
}

impl<O: Operation> TaskExecutor<O> {
    /// No side effects until [`start`](Self::start)
    pub fn new(operation: O, connector: Arc<dyn Connector>) -> Self {
        Self {
            operation,
            connector,
            on_result: None,
            on_error: None,
            on_finished: None,
        }
    }

    pub fn on_result(mut self, callback: impl FnOnce(O::Output) + Send + 'static) -> Self {
        self.on_result = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(TaskFailure) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Runs after the terminal transition and any emission, whatever the outcome
    ///
    /// Hooks compose: a hook added later runs after the earlier ones.
    pub fn on_finished(mut self, callback: impl FnOnce(Uuid, TaskState) + Send + 'static) -> Self {
        self.on_finished = Some(match self.on_finished.take() {
            Some(previous) => Box::new(move |id, state| {
                previous(id, state);
                callback(id, state);
            }),
            None => Box::new(callback),
        });
        self
    }

    /// Move to `Running` and spawn the background unit
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Arc<TaskHandle> {
        let (state, _) = watch::channel(TaskState::Idle);
        let (stopped, _) = watch::channel(false);
        let handle = Arc::new(TaskHandle {
            id: Uuid::new_v4(),
            operation: self.operation.name(),
            state,
            stopped,
        });
        handle.transition(&[TaskState::Idle], TaskState::Running);

        let task = handle.clone();
        tokio::spawn(self.run(task));
        handle
    }

    async fn run(self, handle: Arc<TaskHandle>) {
        let TaskExecutor {
            mut operation,
            connector,
            on_result,
            on_error,
            on_finished,
        } = self;
        let name = handle.operation;
        tracing::debug!(task_id = %handle.id, operation = name, "Task started");

        let connection = Arc::new(ConnectionManager::new(connector));
        let ctx = TaskContext {
            connection: connection.clone(),
            state: handle.state.subscribe(),
        };

        let outcome = match tokio::spawn(async move { operation.execute(&ctx).await }).await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(anyhow::anyhow!(
                "Operation panicked: {}",
                panic_message(join_error)
            )),
        };

        if let Err(err) = connection.close().await {
            tracing::warn!(task_id = %handle.id, "Failed to close task connection: {}", err);
        }

        match outcome {
            Ok(output) => {
                if handle.transition(&[TaskState::Running], TaskState::Completed) {
                    if let Some(callback) = on_result {
                        guard_callback(name, "result", || callback(output));
                    }
                } else {
                    tracing::debug!(task_id = %handle.id, operation = name, "Result suppressed after cancellation");
                }
            }
            Err(err) if err.downcast_ref::<TaskCancelled>().is_some() => {
                handle.transition(&[TaskState::Running], TaskState::Cancelled);
            }
            Err(err) => {
                if handle.transition(&[TaskState::Running], TaskState::Failed) {
                    let failure = TaskFailure::from_error(name, &err);
                    tracing::error!(
                        task_id = %handle.id,
                        operation = name,
                        diagnostic = %failure.diagnostic,
                        "Operation failed: {}",
                        failure.message
                    );
                    if let Some(callback) = on_error {
                        guard_callback(name, "error", || callback(failure));
                    }
                } else {
                    tracing::debug!(task_id = %handle.id, operation = name, "Error suppressed after cancellation: {:#}", err);
                }
            }
        }

        let state = handle.state();
        tracing::debug!(task_id = %handle.id, operation = name, state = ?state, "Task finished");
        if let Some(callback) = on_finished {
            guard_callback(name, "finished", || callback(handle.id, state));
        }
        handle.stopped.send_replace(true);
    }
}

/// A panicking callback must not keep the task from reporting it has stopped
fn guard_callback(operation: &'static str, which: &'static str, callback: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::error!(operation, callback = which, "Task callback panicked");
    }
}

fn panic_message(error: tokio::task::JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
