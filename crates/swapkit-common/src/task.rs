//! Cancellable handles for long-running watcher tasks

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to a spawned watcher loop.
///
/// Dropping the handle cancels the task; cancellation is idempotent and the
/// task side observes it through the token it was spawned with.
#[derive(Debug)]
pub struct TaskHandle {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl TaskHandle {
    /// Spawn a task that observes a fresh cancellation token.
    ///
    /// A panic inside the task is logged, never swallowed.
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(f(cancel.clone()));
        let handle = tokio::spawn(async move {
            if let Err(err) = task.await {
                if err.is_panic() {
                    tracing::error!("Watcher task panicked: {err}");
                }
            }
        });
        Self { handle, cancel }
    }

    /// Request cancellation without waiting for the task to finish
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the task has finished
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
