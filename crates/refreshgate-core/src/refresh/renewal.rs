//! The call to the renewal endpoint and classification of its result.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::api::{ApiError, ApiRequest, ApiResponse, Transport};
use crate::auth::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalFailure {
    /// The credential is no longer valid; a fresh login is required.
    Rejected(String),
    /// Infrastructure failure; the credential may still be valid.
    Transient(String),
}

#[async_trait]
pub trait Renewer: Send + Sync {
    /// Issue one renewal call and return the new session expiry.
    async fn renew(&self) -> Result<Session, RenewalFailure>;
}

/// Renews by posting to the refresh endpoint with the cookie credential.
pub struct HttpRenewer {
    transport: Arc<dyn Transport>,
    path: String,
}

impl HttpRenewer {
    pub fn new(transport: Arc<dyn Transport>, path: impl Into<String>) -> Self {
        Self {
            transport,
            path: path.into(),
        }
    }
}

#[async_trait]
impl Renewer for HttpRenewer {
    async fn renew(&self) -> Result<Session, RenewalFailure> {
        let request = ApiRequest::post(self.path.clone());
        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|e| RenewalFailure::Transient(e.to_string()))?;
        classify(&response)
    }
}

/// The auth service has reported the new expiry under both of these keys.
#[derive(Debug, Deserialize)]
struct RenewalBody {
    #[serde(rename = "expirationTime", alias = "tokenExpirationTime")]
    expiration_time: ExpiryValue,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpiryValue {
    Millis(i64),
    Text(String),
}

impl ExpiryValue {
    fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            ExpiryValue::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            ExpiryValue::Text(text) => {
                let text = text.trim();
                if let Ok(ms) = text.parse::<i64>() {
                    return Utc.timestamp_millis_opt(ms).single();
                }
                DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }
        }
    }
}

/// 401 and 403 are terminal; every other failure is transient.
pub(crate) fn classify(response: &ApiResponse) -> Result<Session, RenewalFailure> {
    match response.status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RenewalFailure::Rejected(
            format!("Status {}", response.status),
        )),
        status if status.is_success() => {
            let body: RenewalBody = serde_json::from_str(&response.body).map_err(|e| {
                RenewalFailure::Transient(format!("Unreadable renewal response: {}", e))
            })?;
            body.expiration_time
                .to_datetime()
                .map(Session::new)
                .ok_or_else(|| {
                    RenewalFailure::Transient("Renewal response carried an invalid expiry".into())
                })
        }
        status => Err(RenewalFailure::Transient(format!(
            "Status {}: {}",
            status,
            ApiError::truncate_body(&response.body)
        ))),
    }
}
