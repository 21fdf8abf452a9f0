use thiserror::Error;

/// Outcome of a failed renewal episode, shared by every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("Credential renewal failed: {0}")]
    Transient(String),

    #[error("Credential renewal rejected")]
    AuthRejected,
}
