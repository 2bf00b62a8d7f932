//! Platform seams: the shell supplies an HTTP transport and a key-value
//! store, the core only talks to these traits.

mod http;
mod kv;

#[cfg(feature = "native-http")]
mod native;

pub use self::http::{
    ContentType, FilePart, HttpError, HttpHeaders, HttpMethod, HttpRequest, HttpResponse,
    HttpTransport, MultipartForm, Origin, RequestBody, ValidatedUrl, AUTHORIZATION, CONTENT_TYPE,
    USER_AGENT,
};
pub use self::kv::{
    KeyNamespace, KeyValueStore, KvError, KvKey, KvValue, MemoryKv, StorageErrorCode,
};

#[cfg(not(target_arch = "wasm32"))]
pub use self::kv::SqliteKv;

#[cfg(feature = "native-http")]
pub use self::native::ReqwestTransport;

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Storage error: {0}")]
    Kv(#[from] KvError),
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use secrecy::{ExposeSecret, SecretString};
    use tokio::sync::watch;

    use super::*;
    use crate::session::{LogoutReason, SessionProvider};

    enum Script {
        Reply(HttpResponse),
        Delayed(Duration, HttpResponse),
        /// 200 with `body` when the request carries `token`, 401 otherwise.
        Authorized { token: String, body: serde_json::Value },
        Fail(HttpError),
    }

    /// Transport that answers from per-path scripts and records every request.
    ///
    /// Each path has a queue of scripted replies; the last one repeats.
    /// Unscripted paths answer 404.
    #[derive(Default)]
    pub struct ScriptedTransport {
        scripts: Mutex<HashMap<String, VecDeque<Script>>>,
        gates: Mutex<HashMap<String, watch::Receiver<bool>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    /// Holds requests to one path until opened.
    pub struct Gate(watch::Sender<bool>);

    impl Gate {
        pub fn open(&self) {
            self.0.send_replace(true);
        }
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        fn push(&self, path: &str, script: Script) {
            self.scripts
                .lock()
                .unwrap()
                .entry(path.to_string())
                .or_default()
                .push_back(script);
        }

        pub fn respond(&self, path: &str, response: HttpResponse) {
            self.push(path, Script::Reply(response));
        }

        pub fn respond_after(&self, path: &str, delay: Duration, response: HttpResponse) {
            self.push(path, Script::Delayed(delay, response));
        }

        pub fn respond_when_authorized(&self, path: &str, token: &str, body: serde_json::Value) {
            self.push(
                path,
                Script::Authorized {
                    token: token.to_string(),
                    body,
                },
            );
        }

        pub fn fail(&self, path: &str, error: HttpError) {
            self.push(path, Script::Fail(error));
        }

        /// Requests to `path` block until the returned gate is opened.
        pub fn gate(&self, path: &str) -> Gate {
            let (tx, rx) = watch::channel(false);
            self.gates.lock().unwrap().insert(path.to_string(), rx);
            Gate(tx)
        }

        pub fn calls_to(&self, path: &str) -> usize {
            self.requests_to(path).len()
        }

        pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.path() == path)
                .cloned()
                .collect()
        }

        fn next_script(&self, path: &str) -> Option<Script> {
            let mut scripts = self.scripts.lock().unwrap();
            let queue = scripts.get_mut(path)?;
            if queue.len() > 1 {
                return queue.pop_front();
            }
            queue.front().map(|script| match script {
                Script::Reply(r) => Script::Reply(r.clone()),
                Script::Delayed(d, r) => Script::Delayed(*d, r.clone()),
                Script::Authorized { token, body } => Script::Authorized {
                    token: token.clone(),
                    body: body.clone(),
                },
                Script::Fail(e) => Script::Fail(e.clone()),
            })
        }
    }

    #[async_trait::async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
            self.requests.lock().unwrap().push(request.clone());

            let gate = self.gates.lock().unwrap().get(request.path()).cloned();
            if let Some(mut gate) = gate {
                let _ = gate.wait_for(|open| *open).await;
            }

            match self.next_script(request.path()) {
                Some(Script::Reply(response)) => Ok(response),
                Some(Script::Delayed(delay, response)) => {
                    tokio::time::sleep(delay).await;
                    Ok(response)
                }
                Some(Script::Authorized { token, body }) => {
                    if request.authorization() == Some(token.as_str()) {
                        Ok(HttpResponse::json_body(200, &body))
                    } else {
                        Ok(HttpResponse::json_body(401, &serde_json::json!({})))
                    }
                }
                Some(Script::Fail(error)) => Err(error),
                None => Ok(HttpResponse::json_body(404, &serde_json::json!({}))),
            }
        }
    }

    /// Session double that records what the network layer did to it.
    #[derive(Default)]
    pub struct RecordingSession {
        tokens: Mutex<(Option<String>, Option<String>)>,
        logouts: AtomicUsize,
        expired_notices: AtomicUsize,
    }

    impl RecordingSession {
        pub fn with_tokens(access: &str, refresh: &str) -> Self {
            let session = Self::default();
            *session.tokens.lock().unwrap() = (Some(access.into()), Some(refresh.into()));
            session
        }

        pub fn with_access_only(access: &str) -> Self {
            let session = Self::default();
            session.tokens.lock().unwrap().0 = Some(access.into());
            session
        }

        pub fn access(&self) -> Option<String> {
            self.tokens.lock().unwrap().0.clone()
        }

        pub fn refresh(&self) -> Option<String> {
            self.tokens.lock().unwrap().1.clone()
        }

        pub fn logouts(&self) -> usize {
            self.logouts.load(Ordering::SeqCst)
        }

        pub fn expired_notices(&self) -> usize {
            self.expired_notices.load(Ordering::SeqCst)
        }
    }

    impl SessionProvider for RecordingSession {
        fn access_token(&self) -> Option<SecretString> {
            self.access().map(SecretString::new)
        }

        fn refresh_token(&self) -> Option<SecretString> {
            self.refresh().map(SecretString::new)
        }

        fn store_tokens(&self, access: SecretString, refresh: Option<SecretString>) {
            let mut tokens = self.tokens.lock().unwrap();
            tokens.0 = Some(access.expose_secret().clone());
            if let Some(refresh) = refresh {
                tokens.1 = Some(refresh.expose_secret().clone());
            }
        }

        fn clear_access_token(&self) {
            self.tokens.lock().unwrap().0 = None;
        }

        fn clear_tokens(&self) {
            *self.tokens.lock().unwrap() = (None, None);
        }

        fn mark_logged_out(&self, _reason: LogoutReason) {
            self.logouts.fetch_add(1, Ordering::SeqCst);
        }

        fn notify_session_expired(&self) {
            self.expired_notices.fetch_add(1, Ordering::SeqCst);
        }
    }
}
