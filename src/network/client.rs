use std::sync::Arc;

use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use super::{decode_data, execute_with_timeout, ApiError, RefreshCoordinator, RefreshError};
use crate::capabilities::{
    HttpRequest, HttpResponse, HttpTransport, Origin, CONTENT_TYPE, USER_AGENT,
};
use crate::config::EnvConfig;
use crate::session::{LogoutReason, SessionProvider};

/// HTTP client that injects the session's credentials and recovers from
/// expired access tokens.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    session: Arc<dyn SessionProvider>,
    config: Arc<EnvConfig>,
    refresh: RefreshCoordinator,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url().as_str())
            .field("refresh", &self.refresh)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: Arc<dyn SessionProvider>,
        config: EnvConfig,
    ) -> Self {
        let config = Arc::new(config);
        let refresh = RefreshCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&session),
            Arc::clone(&config),
        );
        Self::with_coordinator(transport, session, config, refresh)
    }

    /// Builds a client around an existing coordinator, so several clients
    /// (or a test) can share one refresh window.
    pub fn with_coordinator(
        transport: Arc<dyn HttpTransport>,
        session: Arc<dyn SessionProvider>,
        config: Arc<EnvConfig>,
        refresh: RefreshCoordinator,
    ) -> Self {
        Self {
            transport,
            session,
            config,
            refresh,
        }
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    /// Sends with the session's access token, refreshing once on 401.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.dispatch(request, true).await
    }

    /// Sends without credentials. 401 and 403 come back as plain statuses
    /// and never touch the session.
    pub async fn send_anonymous(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.dispatch(request, false).await
    }

    #[instrument(
        skip(self, request),
        fields(
            method = request.method().as_str(),
            path = request.path(),
            request_id = request.request_id()
        )
    )]
    async fn dispatch(
        &self,
        mut request: HttpRequest,
        authenticated: bool,
    ) -> Result<HttpResponse, ApiError> {
        self.prepare(&mut request, authenticated)?;

        let response = self.execute(&request).await?;
        if response.is_success() {
            return Ok(response);
        }

        match response.status() {
            403 if authenticated => Err(self.forbidden()),
            401 if authenticated => self.replay_after_refresh(request).await,
            status => {
                debug!(status, "request failed");
                Err(ApiError::status(&response))
            }
        }
    }

    /// Sends and decodes the body, accepting a bare payload or a `data` envelope.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
    ) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        decode_data(response.body())
    }

    async fn replay_after_refresh(
        &self,
        mut request: HttpRequest,
    ) -> Result<HttpResponse, ApiError> {
        let token = match self.refresh.fresh_token().await {
            Ok(token) => token,
            Err(RefreshError::NoRefreshToken) => {
                debug!("401 without a refresh token");
                return Err(ApiError::Unauthorized);
            }
            Err(e) => return Err(ApiError::SessionExpired(e)),
        };

        request.set_authorization(token.expose_secret())?;
        info!("replaying request with refreshed token");

        // The replay goes straight to the transport, never back through
        // the coordinator. A 401 here is final; a 403 still ends the session.
        let replay = self.execute(&request).await?;
        match replay.status() {
            _ if replay.is_success() => Ok(replay),
            403 => Err(self.forbidden()),
            _ => Err(ApiError::status(&replay)),
        }
    }

    fn forbidden(&self) -> ApiError {
        warn!("forbidden, clearing access token");
        self.session.clear_access_token();
        self.session.mark_logged_out(LogoutReason::Forbidden);
        ApiError::Forbidden
    }

    fn prepare(&self, request: &mut HttpRequest, authenticated: bool) -> Result<(), ApiError> {
        let base = match request.origin() {
            Origin::Api => self.config.base_url(),
            Origin::Auth => self.config.auth_url(),
        };
        request.resolve(base)?;

        let content_type = request.body().content_type().header_value();
        let headers = request.headers_mut();
        headers.insert(CONTENT_TYPE, content_type)?;
        headers.insert(USER_AGENT, self.config.user_agent())?;

        if authenticated {
            if let Some(token) = self.session.access_token() {
                request.set_authorization(token.expose_secret())?;
            }
        }
        Ok(())
    }

    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        let response =
            execute_with_timeout(self.transport.as_ref(), request, self.config.request_timeout())
                .await?;
        debug!(status = response.status(), "response received");
        Ok(response)
    }
}
