//! Credential refresh coordination.
//!
//! All renewal goes through one [`RefreshCoordinator`], which keeps at most
//! one call to the renewal endpoint in flight. Two entry points feed it:
//! - [`ProactiveGate`]: best-effort renewal ahead of ordinary calls
//! - [`ReactiveRecovery`]: renewal after a call comes back unauthorized,
//!   followed by a single replay of that call

pub mod coordinator;
pub mod error;
pub mod proactive;
pub mod recovery;
pub mod renewal;

pub use coordinator::{CoordinatorState, RefreshCoordinator, Ticket, TicketRole};
pub use error::RefreshError;
pub use proactive::{ProactiveGate, ProactivePolicy};
pub use recovery::{ReactiveRecovery, RequestContext};
pub use renewal::{HttpRenewer, RenewalFailure, Renewer};
