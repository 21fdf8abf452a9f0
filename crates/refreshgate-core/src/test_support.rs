//! Fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::{Barrier, Semaphore};

use crate::api::{ApiRequest, ApiResponse, Transport, TransportError};
use crate::auth::{MemorySessionStore, Session, SessionStore};
use crate::refresh::{RenewalFailure, Renewer};

const REFRESH_PATH: &str = "/auth/token/refresh";
const LOGOUT_PATH: &str = "/auth/logout";

/// Time the fake auth service takes to answer a renewal.
const RENEWAL_LATENCY: Duration = Duration::from_millis(20);

fn fresh_session() -> Session {
    Session::new(Utc::now() + chrono::Duration::minutes(15))
}

/// Session store that counts writes.
#[derive(Default)]
pub(crate) struct CountingStore {
    inner: MemorySessionStore,
    sets: AtomicUsize,
    clears: AtomicUsize,
}

impl CountingStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub(crate) fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl SessionStore for CountingStore {
    fn get(&self) -> Option<Session> {
        self.inner.get()
    }

    fn set(&self, session: Session) -> Result<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(session)
    }

    fn clear(&self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear()
    }
}

/// Renewer that blocks until released, then succeeds or fails as told.
pub(crate) struct GatedRenewer {
    gate: Semaphore,
    calls: AtomicUsize,
    failure: Mutex<Option<RenewalFailure>>,
}

impl GatedRenewer {
    pub(crate) fn succeeding() -> Self {
        Self {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
            failure: Mutex::new(None),
        }
    }

    pub(crate) fn failing(failure: RenewalFailure) -> Self {
        let renewer = Self::succeeding();
        *renewer.failure.lock() = Some(failure);
        renewer
    }

    /// Open the gate for every current and future renewal.
    pub(crate) fn release(&self) {
        self.gate.add_permits(1 << 20);
    }

    pub(crate) fn succeed_from_now(&self) {
        *self.failure.lock() = None;
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renewer for GatedRenewer {
    async fn renew(&self) -> Result<Session, RenewalFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await;
        let failure = self.failure.lock().clone();
        match failure {
            Some(failure) => Err(failure),
            None => Ok(fresh_session()),
        }
    }
}

enum Script {
    Respond(StatusCode, String),
    Fail,
}

/// Transport answering fixed responses per path.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, path: &str, status: StatusCode, body: &str) {
        self.scripts
            .lock()
            .insert(path.to_string(), Script::Respond(status, body.to_string()));
    }

    pub(crate) fn fail(&self, path: &str) {
        self.scripts.lock().insert(path.to_string(), Script::Fail);
    }

    pub(crate) fn calls(&self, path: &str) -> usize {
        self.calls.lock().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        *self.calls.lock().entry(request.path.clone()).or_default() += 1;
        match self.scripts.lock().get(&request.path) {
            Some(Script::Respond(status, body)) => Ok(ApiResponse::new(*status, body.clone())),
            Some(Script::Fail) | None => Err(TransportError::Connection("connection refused".into())),
        }
    }
}

/// Fake API plus auth service sharing one cookie credential.
///
/// Ordinary paths answer 401 until a renewal succeeds, then echo the path.
pub(crate) struct CookieServer {
    valid: AtomicBool,
    never_authorize: bool,
    renewal_status: StatusCode,
    answer_status: StatusCode,
    fail_logout: bool,
    hold: Option<(usize, Barrier)>,
    held: AtomicUsize,
    renew_after: usize,
    renew_calls: AtomicUsize,
    unauthorized: AtomicUsize,
    authorized: AtomicUsize,
    logout_calls: AtomicUsize,
}

impl CookieServer {
    fn with_credential(valid: bool) -> Self {
        Self {
            valid: AtomicBool::new(valid),
            never_authorize: false,
            renewal_status: StatusCode::OK,
            answer_status: StatusCode::OK,
            fail_logout: false,
            hold: None,
            held: AtomicUsize::new(0),
            renew_after: 0,
            renew_calls: AtomicUsize::new(0),
            unauthorized: AtomicUsize::new(0),
            authorized: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn expired() -> Self {
        Self::with_credential(false)
    }

    pub(crate) fn valid() -> Self {
        Self::with_credential(true)
    }

    /// Hold the first `n` unauthorized answers until all `n` are pending.
    pub(crate) fn holding_first(mut self, n: usize) -> Self {
        self.hold = Some((n, Barrier::new(n)));
        self
    }

    /// Delay renewal answers until `n` unauthorized answers have gone out.
    pub(crate) fn renewing_after_unauthorized(mut self, n: usize) -> Self {
        self.renew_after = n;
        self
    }

    pub(crate) fn renewal_status(mut self, status: StatusCode) -> Self {
        self.renewal_status = status;
        self
    }

    pub(crate) fn answer_status(mut self, status: StatusCode) -> Self {
        self.answer_status = status;
        self
    }

    pub(crate) fn never_authorize(mut self) -> Self {
        self.never_authorize = true;
        self
    }

    pub(crate) fn failing_logout(mut self) -> Self {
        self.fail_logout = true;
        self
    }

    pub(crate) fn renew_calls(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn unauthorized_answers(&self) -> usize {
        self.unauthorized.load(Ordering::SeqCst)
    }

    pub(crate) fn authorized_answers(&self) -> usize {
        self.authorized.load(Ordering::SeqCst)
    }

    pub(crate) fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    async fn renew(&self) -> ApiResponse {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        while self.unauthorized.load(Ordering::SeqCst) < self.renew_after {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(RENEWAL_LATENCY).await;
        if !self.renewal_status.is_success() {
            return ApiResponse::new(self.renewal_status, "");
        }
        self.valid.store(true, Ordering::SeqCst);
        let body = serde_json::json!({ "expirationTime": fresh_session().expires_at.to_rfc3339() });
        ApiResponse::new(StatusCode::OK, body.to_string())
    }
}

#[async_trait]
impl Transport for CookieServer {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        match request.path.as_str() {
            REFRESH_PATH => Ok(self.renew().await),
            LOGOUT_PATH => {
                self.logout_calls.fetch_add(1, Ordering::SeqCst);
                if self.fail_logout {
                    Err(TransportError::Connection("connection reset".into()))
                } else {
                    Ok(ApiResponse::new(StatusCode::NO_CONTENT, ""))
                }
            }
            path => {
                if self.never_authorize || !self.valid.load(Ordering::SeqCst) {
                    self.unauthorized.fetch_add(1, Ordering::SeqCst);
                    if let Some((n, barrier)) = &self.hold {
                        if self.held.fetch_add(1, Ordering::SeqCst) < *n {
                            barrier.wait().await;
                        }
                    }
                    return Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, ""));
                }
                self.authorized.fetch_add(1, Ordering::SeqCst);
                let body = serde_json::json!({ "path": path });
                Ok(ApiResponse::new(self.answer_status, body.to_string()))
            }
        }
    }
}
