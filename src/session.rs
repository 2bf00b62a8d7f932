use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Tokens held by the session slice.
///
/// The access token is stored with its scheme prefix (`"Bearer abc"`) so it
/// can be copied straight into an Authorization header.
#[derive(Default)]
pub struct SessionCredential {
    access_token: Option<SecretString>,
    refresh_token: Option<SecretString>,
    pub logged_in: bool,
}

impl SessionCredential {
    pub fn access_token(&self) -> Option<&SecretString> {
        self.access_token.as_ref()
    }

    pub fn refresh_token(&self) -> Option<&SecretString> {
        self.refresh_token.as_ref()
    }

    pub fn has_access_token(&self) -> bool {
        self.access_token.is_some()
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    pub fn set_access_token(&mut self, token: Option<SecretString>) {
        self.access_token = token.filter(|t| !t.expose_secret().is_empty());
    }

    pub fn set_refresh_token(&mut self, token: Option<SecretString>) {
        self.refresh_token = token.filter(|t| !t.expose_secret().is_empty());
    }

    pub fn clear_tokens(&mut self) {
        self.access_token = None;
        self.refresh_token = None;
    }

    pub(crate) fn clone_tokens(&self) -> (Option<SecretString>, Option<SecretString>) {
        (
            self.access_token.as_ref().map(clone_secret),
            self.refresh_token.as_ref().map(clone_secret),
        )
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("has_access_token", &self.has_access_token())
            .field("has_refresh_token", &self.has_refresh_token())
            .field("logged_in", &self.logged_in)
            .finish()
    }
}

pub(crate) fn clone_secret(secret: &SecretString) -> SecretString {
    SecretString::new(secret.expose_secret().clone())
}

/// Token payload returned by sign-in and refresh. Some deployments wrap it
/// in `data`; callers unwrap that before decoding.
#[derive(Deserialize)]
pub struct TokenPair {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenPair {
    /// `"<token_type> <access_token>"`, or `None` when no access token came back.
    pub fn normalized_access(&self) -> Option<SecretString> {
        if self.access_token.is_empty() {
            return None;
        }
        let scheme = self
            .token_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TOKEN_TYPE);
        Some(SecretString::new(format!("{scheme} {}", self.access_token)))
    }

    pub fn refresh(&self) -> Option<SecretString> {
        self.refresh_token
            .as_ref()
            .filter(|t| !t.is_empty())
            .map(|t| SecretString::new(t.clone()))
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Why the session ended, for the toast and the log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogoutReason {
    Forbidden,
    RefreshFailed,
    SignedOut,
}

/// The network layer's view of the session slice.
///
/// Implemented by [`crate::store::Store`]; tests substitute their own.
pub trait SessionProvider: Send + Sync {
    fn access_token(&self) -> Option<SecretString>;
    fn refresh_token(&self) -> Option<SecretString>;
    /// Stores a refreshed access token, and the refresh token when rotated.
    fn store_tokens(&self, access: SecretString, refresh: Option<SecretString>);
    fn clear_access_token(&self);
    fn clear_tokens(&self);
    fn mark_logged_out(&self, reason: LogoutReason);
    fn notify_session_expired(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_with_default_scheme() {
        let pair: TokenPair = serde_json::from_str(r#"{"access_token":"abc"}"#).unwrap();
        assert_eq!(pair.normalized_access().unwrap().expose_secret(), "Bearer abc");
        assert!(pair.refresh().is_none());
    }

    #[test]
    fn keeps_server_token_type() {
        let pair: TokenPair = serde_json::from_str(
            r#"{"access_token":"abc","refresh_token":"r2","token_type":"bearer"}"#,
        )
        .unwrap();
        assert_eq!(pair.normalized_access().unwrap().expose_secret(), "bearer abc");
        assert_eq!(pair.refresh().unwrap().expose_secret(), "r2");
    }

    #[test]
    fn empty_access_token_is_no_token() {
        let pair: TokenPair = serde_json::from_str(r#"{"access_token":""}"#).unwrap();
        assert!(pair.normalized_access().is_none());
    }

    #[test]
    fn credential_debug_never_prints_tokens() {
        let mut credential = SessionCredential::default();
        credential.set_access_token(Some(SecretString::new("Bearer s3cr3t".into())));
        assert!(!format!("{credential:?}").contains("s3cr3t"));
    }

    #[test]
    fn empty_tokens_are_not_stored() {
        let mut credential = SessionCredential::default();
        credential.set_refresh_token(Some(SecretString::new(String::new())));
        assert!(!credential.has_refresh_token());
    }
}
