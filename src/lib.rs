#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod app;
pub mod capabilities;
pub mod config;
pub mod event;
pub mod format;
pub mod model;
pub mod network;
pub mod persist;
pub mod services;
pub mod session;
pub mod store;
pub mod validation;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capabilities::{HttpError, KvError};
use crate::network::{ApiError, RefreshError};
use crate::persist::PersistError;
use crate::validation::ValidationError;

pub use app::App;
pub use config::EnvConfig;
pub use event::{Event, Toast, ToastKind};
pub use store::{Model, Store, ViewModel};

pub const MAX_TOASTS: usize = 20;
pub const DOWNLOAD_CACHE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Authentication,
    Authorization,
    Validation,
    NotFound,
    Conflict,
    RateLimited,
    Storage,
    Serialization,
    Deserialization,
    Server,
    Internal,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Authentication => "AUTH_ERROR",
            Self::Authorization => "FORBIDDEN",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Storage => "STORAGE_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::Server => "SERVER_ERROR",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Worth offering a "try again" for.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimited | Self::Server
        )
    }

    fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::Validation,
            401 => Self::Authentication,
            403 => Self::Authorization,
            404 => Self::NotFound,
            408 => Self::Timeout,
            409 => Self::Conflict,
            429 => Self::RateLimited,
            500..=599 => Self::Server,
            _ => Self::Unknown,
        }
    }
}

/// Error shape every service returns and every toast is built from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub kind: ErrorKind,
    /// Shown to the user.
    pub message: String,
    /// Logged only.
    pub internal_message: Option<String>,
    pub status: Option<u16>,
    pub request_id: Option<String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            internal_message: None,
            status: None,
            request_id: None,
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// 401/403 outcomes. The network layer already ended the session for
    /// these, so callers should not toast them again.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self.kind, ErrorKind::Authentication | ErrorKind::Authorization)
    }

    /// Text for the toast body: the server's message where there is one.
    #[must_use]
    pub fn toast_detail(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::Timeout => "The request timed out. Please try again.".into(),
            _ => self.message.clone(),
        }
    }

    /// Builds the error for a non-2xx reply, preferring the server's own
    /// message over a generic one.
    #[must_use]
    pub fn from_http_status(status: u16, body: Option<&[u8]>) -> Self {
        let message = body
            .and_then(extract_error_message)
            .unwrap_or_else(|| format!("HTTP error: {status}"));

        Self {
            status: Some(status),
            ..Self::new(ErrorKind::from_status(status), message)
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

/// Best-effort message from an error body: `message`, then `detail` (a
/// string or a list of `{msg}` objects), then `error`.
#[must_use]
pub fn extract_error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;

    let non_empty = |v: &Value| {
        v.as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    if let Some(message) = value.get("message").and_then(non_empty) {
        return Some(message);
    }
    match value.get("detail") {
        Some(Value::Array(items)) => {
            let joined = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(non_empty))
                .collect::<Vec<_>>()
                .join("; ");
            if !joined.is_empty() {
                return Some(joined);
            }
        }
        Some(detail) => {
            if let Some(detail) = non_empty(detail) {
                return Some(detail);
            }
        }
        None => {}
    }
    value.get("error").and_then(non_empty)
}

impl From<HttpError> for AppError {
    fn from(e: HttpError) -> Self {
        let kind = match &e {
            HttpError::Timeout { .. } => ErrorKind::Timeout,
            HttpError::ConnectionError { .. } | HttpError::Cancelled { .. } => ErrorKind::Network,
            HttpError::SerializationError { .. } => ErrorKind::Serialization,
            HttpError::InvalidResponse { .. } => ErrorKind::Deserialization,
            HttpError::InvalidUrl { .. }
            | HttpError::InvalidHeader { .. }
            | HttpError::TooManyHeaders { .. }
            | HttpError::BodyTooLarge { .. }
            | HttpError::InvalidRequest { .. } => ErrorKind::Internal,
        };
        AppError {
            request_id: e.request_id().map(String::from),
            ..AppError::new(kind, e.to_string())
        }
    }
}

impl From<RefreshError> for AppError {
    fn from(e: RefreshError) -> Self {
        AppError::new(
            ErrorKind::Authentication,
            "Your session has expired. Please sign in again.",
        )
        .with_internal(e.to_string())
    }
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Http(e) => e.into(),
            ApiError::Forbidden => AppError::from_http_status(403, None),
            ApiError::Unauthorized => AppError::from_http_status(401, None),
            ApiError::SessionExpired(e) => e.into(),
            ApiError::Status { status, body } => AppError::from_http_status(status, Some(&body)),
            ApiError::Decode(reason) => {
                AppError::new(ErrorKind::Deserialization, "Unexpected response from server")
                    .with_internal(reason)
            }
        }
    }
}

impl From<KvError> for AppError {
    fn from(e: KvError) -> Self {
        AppError::new(ErrorKind::Storage, e.to_string())
    }
}

impl From<PersistError> for AppError {
    fn from(e: PersistError) -> Self {
        let kind = match &e {
            PersistError::Kv(_) | PersistError::TooLarge { .. } => ErrorKind::Storage,
            PersistError::Serialization(_) => ErrorKind::Serialization,
            PersistError::Corrupted { .. }
            | PersistError::IntegrityCheckFailed { .. }
            | PersistError::FutureSchema { .. } => ErrorKind::Deserialization,
        };
        AppError::new(kind, e.to_string())
    }
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

#[must_use]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::FieldKind;

    #[test]
    fn message_field_wins() {
        let err = AppError::from_http_status(
            400,
            Some(br#"{"message":"Email taken","detail":"x","error":"y"}"#),
        );
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.message, "Email taken");
        assert_eq!(err.status, Some(400));
    }

    #[test]
    fn detail_list_is_joined() {
        let err = AppError::from_http_status(
            422,
            Some(br#"{"detail":[{"msg":"field required"},{"msg":"too short"}]}"#),
        );
        assert_eq!(err.message, "field required; too short");
    }

    #[test]
    fn falls_back_to_error_then_status() {
        assert_eq!(
            AppError::from_http_status(500, Some(br#"{"error":"boom"}"#)).message,
            "boom"
        );
        assert_eq!(
            AppError::from_http_status(502, Some(b"<html>")).message,
            "HTTP error: 502"
        );
        assert_eq!(AppError::from_http_status(404, None).kind, ErrorKind::NotFound);
    }

    #[test]
    fn network_errors_toast_the_friendly_text() {
        let err: AppError = HttpError::ConnectionError {
            host: "api.test".into(),
            message: "dns".into(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(err.is_retryable());
        assert!(err.toast_detail().contains("internet connection"));
    }

    #[test]
    fn auth_errors_are_flagged() {
        assert!(AppError::from(ApiError::Forbidden).is_auth());
        assert!(AppError::from(ApiError::SessionExpired(RefreshError::Aborted)).is_auth());
        assert!(!AppError::from(ApiError::Decode("x".into())).is_auth());
    }

    #[test]
    fn validation_errors_keep_their_field() {
        let err: AppError = ValidationError::Required {
            field: FieldKind::Title,
        }
        .into();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.message, "Title is required");
        assert_eq!(err.status, None);
    }

    #[test]
    fn display_includes_code() {
        let err = AppError::new(ErrorKind::Timeout, "slow").with_internal("30s");
        assert_eq!(err.to_string(), "[TIMEOUT] slow (internal: 30s)");
    }
}
