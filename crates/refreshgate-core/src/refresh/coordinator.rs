//! Single-flight renewal engine.
//!
//! The coordinator is either `Idle` or `Refreshing`. The first caller to
//! `begin()` while idle becomes the driver: the coordinator moves to
//! `Refreshing` and spawns exactly one renewal call. Everyone arriving while
//! that call is in flight queues as a follower. When the call settles, the
//! state returns to `Idle` and every queued waiter (driver included) receives
//! the same outcome.
//!
//! The renewal runs on its own task so that cancelling any caller, including
//! the driver, never strands the coordinator in `Refreshing`. Dropping an
//! unresolved [`Ticket`] removes its waiter from the queue.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{RefreshError, RenewalFailure, Renewer};
use crate::auth::{EscalationHandler, Session, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Refreshing,
}

/// How a ticket came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketRole {
    /// Started the renewal episode.
    Driver,
    /// Joined an episode already in flight.
    Follower,
    /// A renewal already succeeded after the caller's credential was issued.
    AlreadyRenewed,
    /// The credential was already rejected after the caller observed it.
    AlreadyRejected,
}

type Outcome = Result<(), RefreshError>;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Outcome>,
}

struct State {
    phase: CoordinatorState,
    waiters: Vec<Waiter>,
    next_waiter_id: u64,
    episode: u64,
    /// Bumped whenever the credential is renewed, rejected or established.
    generation: u64,
    /// Whether the latest generation bump was a rejection.
    rejected: bool,
}

struct Inner {
    state: Mutex<State>,
    renewer: Arc<dyn Renewer>,
    store: Arc<dyn SessionStore>,
    escalation: Arc<EscalationHandler>,
}

/// Clone is cheap - all clones share one state machine.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        renewer: Arc<dyn Renewer>,
        store: Arc<dyn SessionStore>,
        escalation: Arc<EscalationHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    phase: CoordinatorState::Idle,
                    waiters: Vec::new(),
                    next_waiter_id: 0,
                    episode: 0,
                    generation: 0,
                    rejected: false,
                }),
                renewer,
                store,
                escalation,
            }),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.inner.state.lock().phase
    }

    pub fn is_idle(&self) -> bool {
        self.state() == CoordinatorState::Idle
    }

    /// Settle counter a request captures before dispatch.
    ///
    /// Advances on every renewal that succeeds or is rejected, and on every
    /// [`establish`](Self::establish). Transient failures leave it alone.
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    /// Number of waiters queued on the in-flight episode.
    pub fn queued(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.store.get()
    }

    /// Start a renewal episode, or join the one in flight.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn begin(&self) -> Ticket {
        let mut state = self.inner.state.lock();
        match state.phase {
            CoordinatorState::Idle => self.start(&mut state),
            CoordinatorState::Refreshing => self.join(&mut state),
        }
    }

    /// Like [`begin`](Self::begin), but resolves immediately when the
    /// credential was renewed or rejected since `observed_generation`.
    pub fn begin_since(&self, observed_generation: u64) -> Ticket {
        let mut state = self.inner.state.lock();
        if state.generation > observed_generation {
            if state.rejected {
                debug!(
                    observed = observed_generation,
                    current = state.generation,
                    "Credential already rejected since request was sent"
                );
                return Ticket::settled(TicketRole::AlreadyRejected, Err(RefreshError::AuthRejected));
            }
            debug!(
                observed = observed_generation,
                current = state.generation,
                "Credential already renewed since request was sent"
            );
            return Ticket::settled(TicketRole::AlreadyRenewed, Ok(()));
        }
        match state.phase {
            CoordinatorState::Idle => self.start(&mut state),
            CoordinatorState::Refreshing => self.join(&mut state),
        }
    }

    /// Start an episode only if none is in flight.
    pub fn try_begin(&self) -> Option<Ticket> {
        let mut state = self.inner.state.lock();
        match state.phase {
            CoordinatorState::Idle => Some(self.start(&mut state)),
            CoordinatorState::Refreshing => None,
        }
    }

    /// Record a session established outside the renewal path (a login).
    pub fn establish(&self, session: Session) -> anyhow::Result<()> {
        self.inner.store.set(session)?;
        self.inner.escalation.rearm();
        {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.rejected = false;
        }
        info!(expires_at = %session.expires_at, "Session established");
        Ok(())
    }

    /// Forget the session without escalating (a logout).
    pub fn end_session(&self) -> anyhow::Result<()> {
        self.inner.store.clear()?;
        info!("Session ended");
        Ok(())
    }

    fn start(&self, state: &mut State) -> Ticket {
        state.phase = CoordinatorState::Refreshing;
        state.episode += 1;
        let episode = state.episode;
        let ticket = self.enqueue(state, TicketRole::Driver);
        debug!(episode, "Starting credential renewal");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = AssertUnwindSafe(inner.renewer.renew())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(RenewalFailure::Transient("Renewal task panicked".into())));
            inner.settle(episode, result);
        });

        ticket
    }

    fn join(&self, state: &mut State) -> Ticket {
        let ticket = self.enqueue(state, TicketRole::Follower);
        debug!(
            episode = state.episode,
            waiters = state.waiters.len(),
            "Joined in-flight credential renewal"
        );
        ticket
    }

    fn enqueue(&self, state: &mut State, role: TicketRole) -> Ticket {
        let id = state.next_waiter_id;
        state.next_waiter_id += 1;
        let (tx, rx) = oneshot::channel();
        state.waiters.push(Waiter { id, tx });
        Ticket {
            role,
            waiter: Some((id, rx)),
            known: None,
            coordinator: Arc::downgrade(&self.inner),
            done: false,
        }
    }
}

impl Inner {
    fn settle(&self, episode: u64, result: Result<Session, RenewalFailure>) {
        let outcome = match result {
            Ok(session) => {
                if let Err(e) = self.store.set(session) {
                    warn!(episode, error = %e, "Failed to store renewed session");
                }
                self.escalation.rearm();
                info!(episode, expires_at = %session.expires_at, "Credential renewed");
                Ok(())
            }
            Err(RenewalFailure::Rejected(reason)) => {
                self.escalation.on_terminal(&reason);
                Err(RefreshError::AuthRejected)
            }
            Err(RenewalFailure::Transient(reason)) => {
                warn!(episode, error = %reason, "Credential renewal failed, session left intact");
                Err(RefreshError::Transient(reason))
            }
        };

        let waiters = {
            let mut state = self.state.lock();
            state.phase = CoordinatorState::Idle;
            match &outcome {
                Ok(()) | Err(RefreshError::AuthRejected) => {
                    state.generation += 1;
                    state.rejected = outcome.is_err();
                }
                Err(RefreshError::Transient(_)) => {}
            }
            std::mem::take(&mut state.waiters)
        };

        debug!(episode, waiters = waiters.len(), "Renewal settled");
        for waiter in waiters {
            // Receiver gone means the caller stopped waiting
            let _ = waiter.tx.send(outcome.clone());
        }
    }

    fn cancel(&self, id: u64) {
        let mut state = self.state.lock();
        let before = state.waiters.len();
        state.waiters.retain(|w| w.id != id);
        if state.waiters.len() < before {
            debug!(episode = state.episode, "Waiter cancelled");
        }
    }
}

/// A caller's claim on the outcome of one renewal episode.
#[must_use = "a ticket does nothing unless waited on"]
pub struct Ticket {
    role: TicketRole,
    waiter: Option<(u64, oneshot::Receiver<Outcome>)>,
    /// Outcome known when the ticket was issued.
    known: Option<Outcome>,
    coordinator: Weak<Inner>,
    done: bool,
}

impl Ticket {
    fn settled(role: TicketRole, outcome: Outcome) -> Self {
        Self {
            role,
            waiter: None,
            known: Some(outcome),
            coordinator: Weak::new(),
            done: false,
        }
    }

    pub fn role(&self) -> TicketRole {
        self.role
    }

    pub fn is_driver(&self) -> bool {
        self.role == TicketRole::Driver
    }

    /// Suspend until the episode settles.
    pub async fn wait(mut self) -> Result<(), RefreshError> {
        let outcome = match self.waiter.as_mut() {
            Some((_, rx)) => rx.await.unwrap_or_else(|_| {
                Err(RefreshError::Transient("Renewal abandoned".into()))
            }),
            None => self.known.take().unwrap_or(Ok(())),
        };
        self.done = true;
        outcome
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let (Some((id, _)), Some(inner)) = (&self.waiter, self.coordinator.upgrade()) {
            inner.cancel(*id);
        }
    }
}
