//! Core library for refreshgate.
//!
//! An authenticated HTTP client whose short-lived session credential is
//! renewed transparently. Concurrent callers share a single renewal call and
//! all observe its outcome; a rejected renewal terminates the session once
//! and notifies the host application.

pub mod api;
pub mod auth;
pub mod config;
pub mod refresh;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, Transport};
pub use auth::{FileSessionStore, MemorySessionStore, Session, SessionStore, SessionTerminated};
pub use config::ClientConfig;
pub use refresh::{ProactivePolicy, RefreshCoordinator, RefreshError};
