use std::future::Future;

use reqwest::StatusCode;
use tracing::{debug, warn};

use super::RefreshCoordinator;
use crate::api::{ApiError, ApiResponse};

/// Per-request bookkeeping for recovery.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    retried: bool,
    /// Coordinator generation when the request was first sent.
    generation: u64,
}

impl RequestContext {
    pub fn new(generation: u64) -> Self {
        Self {
            retried: false,
            generation,
        }
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false if the request was already marked.
    pub fn mark_retried(&mut self) -> bool {
        !std::mem::replace(&mut self.retried, true)
    }
}

/// Renew-and-replay for calls that come back unauthorized.
#[derive(Clone)]
pub struct ReactiveRecovery {
    coordinator: RefreshCoordinator,
}

impl ReactiveRecovery {
    pub fn new(coordinator: RefreshCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn is_expired_signal(response: &ApiResponse) -> bool {
        response.status == StatusCode::UNAUTHORIZED
    }

    /// Pass `response` through unless it signals an expired credential; in
    /// that case wait on the shared renewal and replay once.
    ///
    /// The replay's response is returned as-is, except that a second
    /// unauthorized answer becomes `RequestRetryExhausted`.
    pub async fn handle<F, Fut>(
        &self,
        response: ApiResponse,
        ctx: &mut RequestContext,
        replay: F,
    ) -> Result<ApiResponse, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ApiResponse, ApiError>>,
    {
        if !Self::is_expired_signal(&response) {
            return Ok(response);
        }
        if !ctx.mark_retried() {
            debug!("Request already replayed once, not renewing again");
            return Err(ApiError::RequestRetryExhausted);
        }

        let ticket = self.coordinator.begin_since(ctx.generation());
        debug!(role = ?ticket.role(), "Waiting on credential renewal");
        ticket.wait().await?;

        let replayed = replay().await?;
        if Self::is_expired_signal(&replayed) {
            warn!("Request unauthorized again after credential renewal");
            return Err(ApiError::RequestRetryExhausted);
        }
        Ok(replayed)
    }
}
