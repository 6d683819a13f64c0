//! Cancelable delayed actions

use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// An action that runs once after a delay unless it is canceled first.
///
/// Dropping the task cancels it. The paired receiver yields the action's
/// output, or an error if the task was canceled before it ran.
pub struct DeferredTask {
    handle: JoinHandle<()>,
}

impl DeferredTask {
    /// Schedule `action` to run after `delay`. Must be called within a tokio runtime.
    pub fn schedule<F>(delay: Duration, action: F) -> (Self, oneshot::Receiver<F::Output>)
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let output = action.await;
            let _ = done_tx.send(output);
        });
        (Self { handle }, done_rx)
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether the action ran or the task was canceled
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for DeferredTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_runs_after_delay() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let (_task, done) = DeferredTask::schedule(Duration::from_millis(300), async move {
            counter.fetch_add(1, Ordering::SeqCst);
            7
        });

        tokio::time::sleep(Duration::from_millis(299)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        assert_eq!(done.await.unwrap(), 7);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_drop_prevent_the_action() {
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        let (task, canceled) = DeferredTask::schedule(Duration::from_millis(300), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        task.cancel();

        let counter = runs.clone();
        let (task, dropped) = DeferredTask::schedule(Duration::from_millis(300), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(task);

        assert!(canceled.await.is_err());
        assert!(dropped.await.is_err());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
