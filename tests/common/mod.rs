#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{json, Value};
use shared::capabilities::{HttpError, HttpHeaders, HttpRequest, HttpResponse, HttpTransport};
use shared::model::User;
use shared::network::ApiClient;
use shared::{EnvConfig, Event, Store};
use tokio::sync::watch;

pub const REFRESH: &str = "auth/refresh";

/// In-process stand-in for the API.
///
/// Protected paths answer 200 only for the currently valid access token and
/// 401 otherwise. Paths under `admin/` answer 403 and public fixtures skip
/// the check. `auth/refresh` answers with whatever was configured,
/// optionally held behind a gate.
pub struct FakeBackend {
    valid_token: Mutex<String>,
    refresh_reply: Mutex<(u16, Value)>,
    refresh_delay: Mutex<Option<Duration>>,
    gate_tx: watch::Sender<bool>,
    gate_rx: watch::Receiver<bool>,
    requests: Mutex<Vec<HttpRequest>>,
    fixtures: Mutex<HashMap<String, Value>>,
    public: Mutex<HashSet<String>>,
}

impl FakeBackend {
    pub fn new(valid_token: &str) -> Arc<Self> {
        let (gate_tx, gate_rx) = watch::channel(true);
        Arc::new(Self {
            valid_token: Mutex::new(valid_token.to_string()),
            refresh_reply: Mutex::new((500, json!({}))),
            refresh_delay: Mutex::new(None),
            gate_tx,
            gate_rx,
            requests: Mutex::new(Vec::new()),
            fixtures: Mutex::new(HashMap::new()),
            public: Mutex::new(HashSet::new()),
        })
    }

    /// Refresh succeeds with `access` and makes it the valid token.
    pub fn refresh_grants(&self, access: &str, refresh: Option<&str>) {
        let mut body = json!({"access_token": access, "token_type": "Bearer"});
        if let Some(refresh) = refresh {
            body["refresh_token"] = json!(refresh);
        }
        *self.refresh_reply.lock().unwrap() = (200, body);
    }

    /// Invalidates whatever access token the client holds.
    pub fn expire_access(&self) {
        *self.valid_token.lock().unwrap() = "Bearer revoked".to_string();
    }

    pub fn refresh_rejects(&self, status: u16) {
        *self.refresh_reply.lock().unwrap() = (status, json!({"detail": "refresh token expired"}));
    }

    pub fn refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = Some(delay);
    }

    /// Holds refresh calls until [`FakeBackend::open_gate`].
    pub fn close_gate(&self) {
        self.gate_tx.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate_tx.send_replace(true);
    }

    pub fn fixture(&self, path: &str, body: Value) {
        self.fixtures.lock().unwrap().insert(path.to_string(), body);
    }

    /// A fixture served without checking credentials.
    pub fn public_fixture(&self, path: &str, body: Value) {
        self.public.lock().unwrap().insert(path.to_string());
        self.fixture(path, body);
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
}

fn reply(status: u16, body: &Value) -> HttpResponse {
    HttpResponse::new(
        status,
        HttpHeaders::new(),
        serde_json::to_vec(body).unwrap(),
        String::new(),
    )
}

#[async_trait]
impl HttpTransport for FakeBackend {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        self.requests.lock().unwrap().push(request.clone());

        if request.path() == REFRESH {
            let mut gate = self.gate_rx.clone();
            let _ = gate.wait_for(|open| *open).await;
            let delay = *self.refresh_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let (status, body) = self.refresh_reply.lock().unwrap().clone();
            if status == 200 {
                if let Some(access) = body["access_token"].as_str() {
                    *self.valid_token.lock().unwrap() = format!("Bearer {access}");
                }
            }
            return Ok(reply(status, &body));
        }

        if request.path().starts_with("admin/") {
            return Ok(reply(403, &json!({"detail": "admins only"})));
        }

        let public = self.public.lock().unwrap().contains(request.path());
        let valid = self.valid_token.lock().unwrap().clone();
        if !public && request.authorization() != Some(valid.as_str()) {
            return Ok(reply(401, &json!({"detail": "token expired"})));
        }

        let body = self
            .fixtures
            .lock()
            .unwrap()
            .get(request.path())
            .cloned()
            .unwrap_or_else(|| json!({"path": request.path()}));
        Ok(reply(200, &body))
    }
}

pub fn config() -> EnvConfig {
    EnvConfig::new("https://api.test/", "https://auth.test/").unwrap()
}

/// A store signed in with `access` and, when given, a refresh token.
pub fn signed_in_store(access: &str, refresh: Option<&str>) -> Arc<Store> {
    let store = Arc::new(Store::new());
    store.dispatch(Event::SignInSucceeded {
        user: User {
            id: "u1".into(),
            email: "lan@example.vn".into(),
            ..Default::default()
        },
        access: SecretString::new(access.to_string()),
        refresh: refresh.map(|r| SecretString::new(r.to_string())),
    });
    store
}

pub fn client(backend: &Arc<FakeBackend>, store: &Arc<Store>) -> ApiClient {
    ApiClient::new(backend.clone(), store.clone(), config())
}
