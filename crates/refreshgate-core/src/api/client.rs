//! Authenticated API client.
//!
//! `ApiClient` wraps every outbound call in the refresh machinery: the
//! proactive gate runs first, the call is dispatched, and an unauthorized
//! answer goes through reactive recovery. Callers see an ordinary
//! request/response API with extra latency while a renewal is in flight.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::cookie::Jar;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{ApiError, ApiRequest, ApiResponse, HttpTransport, Transport, TransportError};
use crate::auth::{EscalationHandler, ResetHook, Session, SessionStore, SessionTerminated};
use crate::config::ClientConfig;
use crate::refresh::{
    CoordinatorState, HttpRenewer, ProactiveGate, ReactiveRecovery, RefreshCoordinator,
    Renewer, RequestContext,
};

/// Clone is cheap - all parts are shared behind Arc.
#[derive(Clone)]
pub struct ApiClient {
    api: Arc<dyn Transport>,
    auth: Arc<dyn Transport>,
    coordinator: RefreshCoordinator,
    gate: ProactiveGate,
    recovery: ReactiveRecovery,
    escalation: Arc<EscalationHandler>,
    refresh_path: String,
    logout_path: String,
}

pub struct ApiClientBuilder {
    config: ClientConfig,
    store: Arc<dyn SessionStore>,
    reset: Option<ResetHook>,
    api: Option<Arc<dyn Transport>>,
    auth: Option<Arc<dyn Transport>>,
    renewer: Option<Arc<dyn Renewer>>,
}

impl ApiClientBuilder {
    /// Hook run after the grace delay once a session is terminated.
    pub fn on_reset(mut self, hook: ResetHook) -> Self {
        self.reset = Some(hook);
        self
    }

    pub fn api_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.api = Some(transport);
        self
    }

    pub fn auth_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.auth = Some(transport);
        self
    }

    /// Replace the default renewer, which posts to the refresh path through
    /// the auth transport.
    pub fn renewer(mut self, renewer: Arc<dyn Renewer>) -> Self {
        self.renewer = Some(renewer);
        self
    }

    pub fn build(self) -> Result<ApiClient, TransportError> {
        let config = self.config;

        // Both transports share one jar so they share the session cookie
        let jar = Arc::new(Jar::default());
        let api: Arc<dyn Transport> = match self.api {
            Some(api) => api,
            None => Arc::new(HttpTransport::new(
                &config.api_base_url,
                config.request_timeout(),
                Arc::clone(&jar),
            )?),
        };
        let auth: Arc<dyn Transport> = match self.auth {
            Some(auth) => auth,
            None => Arc::new(HttpTransport::new(
                &config.auth_base_url,
                config.request_timeout(),
                jar,
            )?),
        };
        let renewer: Arc<dyn Renewer> = match self.renewer {
            Some(renewer) => renewer,
            None => Arc::new(HttpRenewer::new(Arc::clone(&auth), config.refresh_path.clone())),
        };

        let mut escalation = EscalationHandler::new(Arc::clone(&self.store), config.escalation_grace());
        if let Some(hook) = self.reset {
            escalation = escalation.with_reset_hook(hook);
        }
        let escalation = Arc::new(escalation);

        let coordinator = RefreshCoordinator::new(renewer, self.store, Arc::clone(&escalation));
        Ok(ApiClient {
            api,
            auth,
            gate: ProactiveGate::new(coordinator.clone(), config.proactive),
            recovery: ReactiveRecovery::new(coordinator.clone()),
            coordinator,
            escalation,
            refresh_path: config.refresh_path,
            logout_path: config.logout_path,
        })
    }
}

impl ApiClient {
    pub fn builder(config: ClientConfig, store: Arc<dyn SessionStore>) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            store,
            reset: None,
            api: None,
            auth: None,
            renewer: None,
        }
    }

    /// Create a client with HTTP transports from `config`.
    pub fn new(config: ClientConfig, store: Arc<dyn SessionStore>) -> Result<Self, TransportError> {
        Self::builder(config, store).build()
    }

    /// Dispatch `request` with proactive renewal and reactive recovery.
    ///
    /// Any response other than a recoverable 401 is returned as-is; use
    /// [`get_json`](Self::get_json) and friends for status checking.
    /// Requests to the refresh path are passed through untouched and never
    /// update the stored session.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        if self.is_renewal_request(&request) {
            debug!(path = %request.path, "Renewal request bypasses refresh handling");
            return Ok(self.auth.send(&request).await?);
        }

        self.gate.before_dispatch().await?;

        let mut ctx = RequestContext::new(self.coordinator.generation());
        let response = self.api.send(&request).await?;
        self.recovery
            .handle(response, &mut ctx, || async {
                self.api.send(&request).await.map_err(ApiError::from)
            })
            .await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(ApiRequest::get(path)).await?;
        self.check_response(path, response)?.json()
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        let response = self.send(ApiRequest::post(path).with_json(body)).await?;
        self.check_response(path, response)?.json()
    }

    /// Check if response is successful, returning an error with body if not.
    fn check_response(&self, path: &str, response: ApiResponse) -> Result<ApiResponse, ApiError> {
        if response.is_success() {
            return Ok(response);
        }
        // Renewal path 401s never went through recovery
        if response.status == StatusCode::UNAUTHORIZED && self.is_renewal_path(path) {
            return Err(ApiError::AccessDenied(ApiError::truncate_body(&response.body)));
        }
        Err(ApiError::from_status(response.status, &response.body))
    }

    fn is_renewal_request(&self, request: &ApiRequest) -> bool {
        self.is_renewal_path(&request.path)
    }

    fn is_renewal_path(&self, path: &str) -> bool {
        path.contains(self.refresh_path.as_str())
    }

    /// Record the expiry of a session obtained by logging in.
    pub fn establish_session(&self, expires_at: DateTime<Utc>) -> anyhow::Result<()> {
        self.coordinator.establish(Session::new(expires_at))
    }

    /// Log out on the auth service and forget the local session.
    ///
    /// The local session is cleared even if the logout call fails.
    pub async fn logout(&self) -> anyhow::Result<()> {
        let request = ApiRequest::post(self.logout_path.clone());
        match self.auth.send(&request).await {
            Ok(response) if !response.is_success() => {
                warn!(status = %response.status, "Logout call was not accepted");
            }
            Ok(_) => debug!("Logged out on auth service"),
            Err(e) => warn!(error = %e, "Logout call failed"),
        }
        self.coordinator.end_session()
    }

    pub fn session(&self) -> Option<Session> {
        self.coordinator.session()
    }

    pub fn refresh_state(&self) -> CoordinatorState {
        self.coordinator.state()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn subscribe_terminated(&self) -> broadcast::Receiver<SessionTerminated> {
        self.escalation.subscribe()
    }
}
