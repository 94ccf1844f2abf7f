use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;

use super::events::{AuthEvent, AuthStatus};
use super::orchestrator::AuthOrchestrator;

/// A live status watch. Dropping it (or calling `unsubscribe`) guarantees the
/// handler is not called again.
pub struct StatusSubscription {
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl StatusSubscription {
    pub fn unsubscribe(self) {}

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

/// Report the auth status now and again after every auth event that can
/// change it.
pub fn watch_status<F>(auth: Arc<AuthOrchestrator>, mut on_status: F) -> StatusSubscription
where
    F: FnMut(AuthStatus) + Send + 'static,
{
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    let mut events = auth.subscribe();

    let task = tokio::spawn(async move {
        tokio::task::yield_now().await;
        if flag.load(Ordering::SeqCst) {
            return;
        }
        on_status(auth.status());

        loop {
            let event = events.recv().await;
            if flag.load(Ordering::SeqCst) {
                return;
            }
            match event {
                Ok(AuthEvent::Notice(_)) | Ok(AuthEvent::ChainChanged(_)) => continue,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Status watcher lagged, re-deriving");
                }
                Err(RecvError::Closed) => return,
            }
            on_status(auth.status());
        }
    });

    StatusSubscription { cancelled, task }
}
