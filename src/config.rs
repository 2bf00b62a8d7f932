use std::time::Duration;

use url::Url;

use crate::capabilities::HttpError;

pub const DEFAULT_BASE_URL: &str = "https://legal-connect-xi.vercel.app/";
pub const DEFAULT_AUTH_URL: &str = "http://localhost:3000";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_USER_AGENT: &str = "LegalConnect-Mobile/1.0 (shared-core)";

pub const BASE_URL_VAR: &str = "LEGALCONNECT_BASE_URL";
pub const AUTH_URL_VAR: &str = "LEGALCONNECT_AUTH_URL";
pub const TIMEOUT_MS_VAR: &str = "LEGALCONNECT_TIMEOUT_MS";

/// Endpoints and transport settings shared by every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    base_url: Url,
    auth_url: Url,
    request_timeout: Duration,
    user_agent: String,
}

impl EnvConfig {
    pub fn new(base_url: &str, auth_url: &str) -> Result<Self, HttpError> {
        Ok(Self {
            base_url: parse_base(base_url)?,
            auth_url: parse_base(auth_url)?,
            request_timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }

    /// Build-time values baked in with `option_env!`, falling back to the
    /// production defaults.
    pub fn from_build() -> Result<Self, HttpError> {
        Self::new(
            option_env!("LEGALCONNECT_BASE_URL").unwrap_or(DEFAULT_BASE_URL),
            option_env!("LEGALCONNECT_AUTH_URL").unwrap_or(DEFAULT_AUTH_URL),
        )
    }

    /// Build-time values overridden by the process environment.
    pub fn from_env() -> Result<Self, HttpError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HttpError> {
        let mut config = Self::from_build()?;

        if let Some(base) = lookup(BASE_URL_VAR) {
            config.base_url = parse_base(&base)?;
        }
        if let Some(auth) = lookup(AUTH_URL_VAR) {
            config.auth_url = parse_base(&auth)?;
        }
        if let Some(raw) = lookup(TIMEOUT_MS_VAR) {
            let ms: u64 = raw.trim().parse().map_err(|_| HttpError::InvalidRequest {
                reason: format!("{TIMEOUT_MS_VAR} must be a number of milliseconds, got '{raw}'"),
            })?;
            config = config.with_timeout(Duration::from_millis(ms))?;
        }

        tracing::debug!(
            base_url = %config.base_url,
            auth_url = %config.auth_url,
            timeout_ms = config.request_timeout.as_millis() as u64,
            "loaded environment config"
        );
        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, HttpError> {
        if timeout.is_zero() {
            return Err(HttpError::InvalidRequest {
                reason: "timeout cannot be zero".to_string(),
            });
        }
        self.request_timeout = timeout;
        Ok(self)
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn chat_socket_url(&self, token: &str) -> Url {
        crate::network::socket::chat_socket_url(&self.base_url, token)
    }
}

/// Parses an http(s) origin and makes sure it ends with `/` so relative
/// API paths join beneath it.
fn parse_base(raw: &str) -> Result<Url, HttpError> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };

    let url = Url::parse(&with_slash).map_err(|e| HttpError::InvalidUrl {
        url: trimmed.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(HttpError::InvalidUrl {
            url: trimmed.to_string(),
            reason: "base URL must be an absolute http(s) URL with a host".to_string(),
        });
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_point_at_production_api() {
        let config = EnvConfig::new(DEFAULT_BASE_URL, DEFAULT_AUTH_URL).unwrap();
        assert_eq!(config.base_url().as_str(), DEFAULT_BASE_URL);
        assert_eq!(config.auth_url().as_str(), "http://localhost:3000/");
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn base_urls_gain_trailing_slash() {
        let config = EnvConfig::new("https://api.example.com/v1", "http://auth.local").unwrap();
        assert_eq!(config.base_url().as_str(), "https://api.example.com/v1/");
        assert_eq!(config.auth_url().as_str(), "http://auth.local/");
    }

    #[test]
    fn rejects_non_http_base() {
        assert!(EnvConfig::new("ftp://api.example.com", DEFAULT_AUTH_URL).is_err());
        assert!(EnvConfig::new("not a url", DEFAULT_AUTH_URL).is_err());
    }

    #[test]
    fn runtime_lookup_overrides_build_values() {
        let vars: HashMap<&str, &str> = [
            (BASE_URL_VAR, "https://staging.example.com"),
            (TIMEOUT_MS_VAR, "1500"),
        ]
        .into_iter()
        .collect();

        let config = EnvConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.base_url().as_str(), "https://staging.example.com/");
        assert_eq!(config.request_timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn bad_timeout_is_rejected() {
        let result = EnvConfig::from_lookup(|k| (k == TIMEOUT_MS_VAR).then(|| "soon".to_string()));
        assert!(matches!(result, Err(HttpError::InvalidRequest { .. })));
    }
}
