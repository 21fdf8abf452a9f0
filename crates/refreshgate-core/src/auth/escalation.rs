//! Terminal-failure handling for the session.
//!
//! When the credential is rejected outright, the stored session is cleared,
//! a [`SessionTerminated`] event goes out to every subscriber, and after a
//! grace delay the host-supplied reset hook runs (typically a return to an
//! unauthenticated landing state).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::SessionStore;

/// Buffer size for the session event channel.
/// Terminations are rare; a handful of slots covers slow subscribers.
const EVENT_CHANNEL_SIZE: usize = 8;

/// Emitted once per terminal renewal failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTerminated {
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Host callback performing the deferred full reset.
pub type ResetHook = Arc<dyn Fn() + Send + Sync>;

pub struct EscalationHandler {
    store: Arc<dyn SessionStore>,
    events: broadcast::Sender<SessionTerminated>,
    reset: Option<ResetHook>,
    grace: Duration,
    /// Set once the current session has been terminated; cleared when a new
    /// session is established.
    terminated: AtomicBool,
}

impl EscalationHandler {
    pub fn new(store: Arc<dyn SessionStore>, grace: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            store,
            events,
            reset: None,
            grace,
            terminated: AtomicBool::new(false),
        }
    }

    /// Install the hook run `grace` after a termination.
    pub fn with_reset_hook(mut self, hook: ResetHook) -> Self {
        self.reset = Some(hook);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionTerminated> {
        self.events.subscribe()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Allow the next termination to notify again.
    pub fn rearm(&self) {
        self.terminated.store(false, Ordering::SeqCst);
    }

    /// Terminate the session.
    ///
    /// The coordinator calls this exactly once per failed renewal episode.
    /// Repeat calls before the handler is rearmed only clear the store.
    /// Must be called from within a Tokio runtime when a reset hook is set.
    pub fn on_terminal(&self, reason: &str) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear session store");
        }

        if self.terminated.swap(true, Ordering::SeqCst) {
            debug!(reason = reason, "Session already terminated");
            return;
        }
        error!(reason = reason, "Session terminated - login required");

        let event = SessionTerminated {
            reason: reason.to_string(),
            at: Utc::now(),
        };
        // No subscribers is fine
        let _ = self.events.send(event);

        if let Some(hook) = self.reset.clone() {
            let grace = self.grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                info!("Running session reset hook");
                hook();
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::auth::{MemorySessionStore, Session};

    #[tokio::test(start_paused = true)]
    async fn test_on_terminal_clears_emits_and_resets_after_grace() {
        let store = Arc::new(MemorySessionStore::new());
        store
            .set(Session::new(Utc::now() + chrono::Duration::minutes(10)))
            .unwrap();

        let resets = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&resets);
        let handler = EscalationHandler::new(store.clone(), Duration::from_secs(3))
            .with_reset_hook(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        let mut events = handler.subscribe();

        handler.on_terminal("credential rejected");

        assert!(store.get().is_none());
        let event = events.recv().await.unwrap();
        assert_eq!(event.reason, "credential rejected");

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(resets.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeat_termination_notifies_once_until_rearmed() {
        let store = Arc::new(MemorySessionStore::new());
        let handler = EscalationHandler::new(store, Duration::from_millis(0));
        let mut events = handler.subscribe();

        handler.on_terminal("first");
        handler.on_terminal("second");
        assert!(handler.is_terminated());
        assert_eq!(events.recv().await.unwrap().reason, "first");
        assert!(events.try_recv().is_err());

        handler.rearm();
        handler.on_terminal("third");
        assert_eq!(events.recv().await.unwrap().reason, "third");
    }

    #[tokio::test]
    async fn test_on_terminal_without_subscribers_or_hook() {
        let store = Arc::new(MemorySessionStore::new());
        let handler = EscalationHandler::new(store.clone(), Duration::from_millis(10));
        handler.on_terminal("credential rejected");
        assert!(store.get().is_none());
    }
}
