pub mod client;
pub mod refresh;
pub mod socket;

use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::capabilities::{HttpError, HttpRequest, HttpResponse, HttpTransport};

pub use self::client::ApiClient;
pub use self::refresh::{RefreshCoordinator, RefreshError};
pub use self::socket::{chat_socket_url, ChatChannel, ChatEvent, ConnectAction, ConnectionState};

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("access forbidden")]
    Forbidden,

    #[error("not authenticated")]
    Unauthorized,

    #[error("session expired: {0}")]
    SessionExpired(RefreshError),

    #[error("server returned HTTP {status}")]
    Status { status: u16, body: Vec<u8> },

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub(crate) fn status(response: &HttpResponse) -> Self {
        ApiError::Status {
            status: response.status(),
            body: response.body().to_vec(),
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Forbidden => Some(403),
            ApiError::Unauthorized | ApiError::SessionExpired(_) => Some(401),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ApiError::Forbidden | ApiError::Unauthorized | ApiError::SessionExpired(_)
        )
    }
}

/// Runs one request through the transport under a fixed deadline.
pub(crate) async fn execute_with_timeout(
    transport: &dyn HttpTransport,
    request: &HttpRequest,
    default_timeout: Duration,
) -> Result<HttpResponse, HttpError> {
    let timeout = request
        .timeout_ms()
        .map(Duration::from_millis)
        .unwrap_or(default_timeout);

    match tokio::time::timeout(timeout, transport.execute(request)).await {
        Ok(result) => result.map(|r| r.with_request_id(request.request_id())),
        Err(_) => Err(HttpError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            request_id: request.request_id().to_string(),
        }),
    }
}

/// Decodes a body that is either the payload itself or `{"data": payload}`.
pub fn decode_data<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| ApiError::Decode(e.to_string()))?;

    if let Some(inner) = value.get("data") {
        if let Ok(decoded) = T::deserialize(inner) {
            return Ok(decoded);
        }
    }
    serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
}
