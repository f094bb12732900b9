//! Detached cache writes that callers never wait on, but the host can flush.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::warn;

/// Tracks spawned background tasks.
#[derive(Debug, Clone, Default)]
pub struct BackgroundWrites {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundWrites {
    pub fn new() -> Self {
        Self::default()
    }

    fn handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn `task` on the current runtime and keep its handle.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut handles = self.handles();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Tasks not yet observed as finished.
    pub fn pending(&self) -> usize {
        self.handles().iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every tracked task, including ones spawned while flushing.
    pub async fn flush(&self) {
        loop {
            let handles = std::mem::take(&mut *self.handles());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Background task did not complete");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_flush_waits_for_tasks() {
        let writes = BackgroundWrites::new();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let done = Arc::clone(&done);
            writes.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        writes.flush().await;
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(writes.pending(), 0);
    }

    #[tokio::test]
    async fn test_flush_survives_panicking_task() {
        let writes = BackgroundWrites::new();
        writes.spawn(async { panic!("write exploded") });
        writes.flush().await;
        assert_eq!(writes.pending(), 0);
    }

    #[tokio::test]
    async fn test_flush_with_nothing_pending() {
        BackgroundWrites::new().flush().await;
    }
}
