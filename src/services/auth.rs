use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument};

use super::ServiceContext;
use crate::capabilities::{FilePart, HttpRequest, MultipartForm, Origin};
use crate::event::Event;
use crate::model::{ProfilePatch, ProfileUpdate, User, UserId};
use crate::network::decode_data;
use crate::session::TokenPair;
use crate::validation::{validate_sign_in, validate_sign_up, SignInForm, SignUpForm};
use crate::{AppError, AppResult, ErrorKind};

const SIGN_IN_FAILED: &str = "Sign in failed";

/// Flat payload of `auth/signin`.
#[derive(Deserialize, Default)]
#[serde(default)]
struct SignInPayload {
    access_token: String,
    refresh_token: Option<String>,
    token_type: Option<String>,
    user_id: UserId,
    user_email: Option<String>,
    username: Option<String>,
    phone_number: Option<String>,
    address: Option<String>,
    avatar_url: Option<String>,
    role: Option<String>,
}

impl SignInPayload {
    fn split(self) -> (TokenPair, User) {
        let tokens = TokenPair {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
        };
        let user = ProfilePatch {
            id: Some(self.user_id.0),
            email: self.user_email,
            username: self.username,
            phone_number: self.phone_number,
            address: self.address,
            avatar_url: self.avatar_url,
            avatar: None,
            role: self.role,
        }
        .into_user();
        (tokens, user)
    }
}

/// Reads the sign-in body. Some deployments answer 200 with
/// `{"status": "error", "message": ...}`.
fn parse_sign_in(body: &[u8]) -> AppResult<(SecretString, Option<SecretString>, User)> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        AppError::new(ErrorKind::Deserialization, "Login failed").with_internal(e.to_string())
    })?;

    if value.get("status").and_then(Value::as_str) == Some("error") {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or("Login failed");
        return Err(AppError::new(ErrorKind::Authentication, message));
    }

    let payload: SignInPayload = decode_data(body)?;
    let (tokens, user) = payload.split();
    let access = tokens
        .normalized_access()
        .ok_or_else(|| AppError::new(ErrorKind::Authentication, "Login failed"))?;
    Ok((access, tokens.refresh(), user))
}

/// The part of an address that is safe to put in a span.
fn email_domain(email: &str) -> &str {
    email
        .trim()
        .rsplit_once('@')
        .map_or("", |(_, domain)| domain)
}

#[derive(Debug, Clone)]
pub struct AuthService {
    ctx: ServiceContext,
}

impl AuthService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Signs in against the auth origin. Credentials never ride along with
    /// a stale session token.
    #[instrument(skip_all, fields(email_domain = email_domain(&form.email)))]
    pub async fn sign_in(&self, form: &SignInForm) -> AppResult<User> {
        if let Err(e) = validate_sign_in(form) {
            let error = AppError::from(e);
            self.ctx.dispatch(Event::SignInFailed(error.message.clone()));
            return Err(error);
        }

        self.ctx.dispatch(Event::SignInStarted);
        let result = async {
            let request = HttpRequest::post("auth/signin")
                .with_origin(Origin::Auth)
                .with_json(&json!({ "email": form.email.trim(), "password": form.password }))?;
            let response = self.ctx.client().send_anonymous(request).await?;
            parse_sign_in(response.body())
        }
        .await;

        match result {
            Ok((access, refresh, user)) => {
                info!(role = ?user.role, "signed in");
                self.ctx.dispatch(Event::SignInSucceeded {
                    user: user.clone(),
                    access,
                    refresh,
                });
                Ok(user)
            }
            Err(e) => {
                // A rejected login is reported even though it is an auth error.
                let detail = e.toast_detail();
                self.ctx.dispatch(Event::SignInFailed(detail.clone()));
                self.ctx
                    .store()
                    .push_toast(crate::event::Toast::error(SIGN_IN_FAILED, detail));
                Err(e)
            }
        }
    }

    #[instrument(skip_all)]
    pub async fn sign_up(&self, form: &SignUpForm) -> AppResult<()> {
        if let Err(e) = validate_sign_up(form) {
            let error = AppError::from(e);
            self.ctx.dispatch(Event::SignUpFailed(error.message.clone()));
            return Err(error);
        }

        self.ctx.dispatch(Event::SignUpStarted);
        let result = async {
            let request = HttpRequest::post("users/register").with_json(&json!({
                "username": form.username.trim(),
                "email": form.email.trim(),
                "password": form.password,
            }))?;
            self.ctx.client().send_anonymous(request).await?;
            Ok::<_, AppError>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.ctx.dispatch(Event::SignUpSucceeded);
                self.ctx.success("Account created");
                Ok(())
            }
            Err(e) => Err(self.ctx.fail("Sign up failed", e, Event::SignUpFailed)),
        }
    }

    #[instrument(skip_all)]
    pub async fn fetch_profile(&self) -> AppResult<User> {
        self.ctx.dispatch(Event::ProfileLoading);
        match self.ctx.fetch::<ProfilePatch>(HttpRequest::get("users/me")).await {
            Ok(patch) => {
                self.ctx.dispatch(Event::ProfileFetched(patch));
                Ok(self.ctx.store().view().session.user)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not load your profile", e, Event::ProfileFailed)),
        }
    }

    #[instrument(skip_all)]
    pub async fn update_profile(&self, update: &ProfileUpdate) -> AppResult<User> {
        self.ctx.dispatch(Event::ProfileLoading);
        let result = async {
            let request = HttpRequest::put("users/user").with_json(update)?;
            self.ctx.fetch::<ProfilePatch>(request).await
        }
        .await;

        match result {
            Ok(patch) => {
                self.ctx.dispatch(Event::ProfileUpdated(patch));
                self.ctx.success("Profile updated");
                Ok(self.ctx.store().view().session.user)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not update your profile", e, Event::ProfileFailed)),
        }
    }

    #[instrument(skip_all)]
    pub async fn upload_avatar(&self, file: FilePart) -> AppResult<User> {
        self.ctx.dispatch(Event::ProfileLoading);
        let result = async {
            let form = MultipartForm::new().file("file", file);
            let request = HttpRequest::post("users/avatar").with_multipart(form)?;
            self.ctx.fetch::<ProfilePatch>(request).await
        }
        .await;

        match result {
            Ok(patch) => {
                self.ctx.dispatch(Event::ProfileUpdated(patch));
                Ok(self.ctx.store().view().session.user)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not upload avatar", e, Event::ProfileFailed)),
        }
    }

    /// Local only: the API keeps no server-side session to end.
    pub fn sign_out(&self) {
        info!("signing out");
        self.ctx.dispatch(Event::SignedOut);
    }
}
