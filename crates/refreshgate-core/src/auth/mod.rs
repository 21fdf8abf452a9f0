//! Session state and its terminal-failure path.
//!
//! This module provides:
//! - `Session`: expiry metadata for the current credential
//! - `SessionStore`: get/set/clear holder, in memory or on disk
//! - `EscalationHandler`: clears the session and notifies the host when
//!   renewal is permanently rejected

pub mod escalation;
pub mod session;

pub use escalation::{EscalationHandler, ResetHook, SessionTerminated};
pub use session::{FileSessionStore, MemorySessionStore, Session, SessionStore};
