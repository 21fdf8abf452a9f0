use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{RefreshCoordinator, RefreshError};

/// When to renew ahead of an ordinary call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ProactivePolicy {
    Disabled,
    /// Before every call.
    #[default]
    Always,
    /// Only when the stored expiry falls within the window.
    Within { window_secs: u64 },
}

impl FromStr for ProactivePolicy {
    type Err = String;

    /// Accepts `disabled`, `always`, or a window in seconds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(ProactivePolicy::Disabled),
            "always" => Ok(ProactivePolicy::Always),
            other => other
                .parse::<u64>()
                .map(|window_secs| ProactivePolicy::Within { window_secs })
                .map_err(|_| format!("Invalid proactive policy: {}", s)),
        }
    }
}

/// Best-effort renewal ahead of an ordinary call.
///
/// Only the call that triggers an attempt waits for it; calls arriving while
/// any renewal is in flight pass straight through. Transient failures are
/// logged and swallowed; a rejected credential is reported so the call is not
/// sent on a session that was just terminated.
#[derive(Clone)]
pub struct ProactiveGate {
    coordinator: RefreshCoordinator,
    policy: ProactivePolicy,
}

impl ProactiveGate {
    pub fn new(coordinator: RefreshCoordinator, policy: ProactivePolicy) -> Self {
        Self {
            coordinator,
            policy,
        }
    }

    pub fn policy(&self) -> ProactivePolicy {
        self.policy
    }

    /// Nothing to keep fresh without a stored session.
    fn should_attempt(&self) -> bool {
        let Some(session) = self.coordinator.session() else {
            return false;
        };
        match self.policy {
            ProactivePolicy::Disabled => false,
            ProactivePolicy::Always => true,
            ProactivePolicy::Within { window_secs } => {
                let window = i64::try_from(window_secs)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .unwrap_or(Duration::MAX);
                session.needs_refresh(window)
            }
        }
    }

    pub async fn before_dispatch(&self) -> Result<(), RefreshError> {
        if !self.should_attempt() {
            return Ok(());
        }
        let Some(ticket) = self.coordinator.try_begin() else {
            debug!("Renewal already in flight, skipping proactive attempt");
            return Ok(());
        };
        debug!("Renewing credential ahead of call");
        match ticket.wait().await {
            Err(RefreshError::AuthRejected) => Err(RefreshError::AuthRejected),
            Err(e) => {
                warn!(error = %e, "Proactive credential renewal failed");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}
