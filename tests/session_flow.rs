mod common;

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use serde_json::json;
use shared::capabilities::{KeyNamespace, KeyValueStore, KvKey, MemoryKv};
use shared::persist::SessionSnapshot;
use shared::session::SessionProvider;
use shared::validation::SignInForm;
use shared::App;

use common::{config, FakeBackend, REFRESH};

fn app(backend: &Arc<FakeBackend>, kv: &Arc<MemoryKv>) -> App {
    App::new(backend.clone(), kv.clone(), config())
}

fn sign_in_fixture(backend: &FakeBackend) {
    backend.public_fixture(
        "auth/signin",
        json!({
            "access_token": "a1",
            "refresh_token": "r1",
            "token_type": "Bearer",
            "user_id": "u1",
            "user_email": "lan@example.vn",
            "username": "lan",
            "role": "user"
        }),
    );
}

fn form() -> SignInForm {
    SignInForm {
        email: " lan@example.vn ".into(),
        password: "hunter22".into(),
    }
}

/// Waits for autosave to write a signed-in snapshot.
async fn until_saved(kv: &MemoryKv) {
    let key = KvKey::new(KeyNamespace::Session, "root").unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(value) = kv.get(&key).await.unwrap() {
                if SessionSnapshot::decode(value.data()).unwrap().logged_in() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("session was never saved");
}

#[tokio::test]
async fn sign_in_then_load_cases() {
    let backend = FakeBackend::new("Bearer a1");
    sign_in_fixture(&backend);
    backend.fixture(
        "api/cases",
        json!({"data": [{"id": "c1", "title": "Land dispute", "state": "IN_PROGRESS"}]}),
    );
    let app = app(&backend, &Arc::new(MemoryKv::new()));

    let user = app.auth().sign_in(&form()).await.unwrap();
    let cases = app.cases().list().await.unwrap();

    assert_eq!(user.username, "lan");
    assert_eq!(cases.len(), 1);
    let view = app.view();
    assert!(view.session.logged_in);
    assert_eq!(view.cases.cases[0].title, "Land dispute");

    let signin = &backend.requests_to("auth/signin")[0];
    assert_eq!(signin.authorization(), None);
    assert_eq!(
        backend.requests_to("api/cases")[0].authorization(),
        Some("Bearer a1")
    );
}

#[tokio::test]
async fn session_survives_a_restart() {
    let backend = FakeBackend::new("Bearer a1");
    sign_in_fixture(&backend);
    let kv = Arc::new(MemoryKv::new());

    let first = app(&backend, &kv);
    let (restored, autosave) = first.launch().await.unwrap();
    assert!(!restored);
    first.auth().sign_in(&form()).await.unwrap();
    until_saved(&kv).await;
    autosave.abort();

    let second = app(&backend, &kv);
    let (restored, _autosave) = second.launch().await.unwrap();

    assert!(restored);
    let view = second.view();
    assert!(view.session.logged_in);
    assert_eq!(view.session.user.email, "lan@example.vn");
    let store = second.store();
    assert_eq!(store.access_token().unwrap().expose_secret(), "Bearer a1");
    assert_eq!(store.refresh_token().unwrap().expose_secret(), "r1");
}

#[tokio::test]
async fn restored_session_refreshes_on_first_expiry() {
    let backend = FakeBackend::new("Bearer a1");
    sign_in_fixture(&backend);
    let kv = Arc::new(MemoryKv::new());

    let first = app(&backend, &kv);
    let (_, autosave) = first.launch().await.unwrap();
    first.auth().sign_in(&form()).await.unwrap();
    until_saved(&kv).await;
    autosave.abort();

    backend.expire_access();
    backend.refresh_grants("a2", None);
    backend.fixture("users/me", json!({"id": "u1", "email": "lan@example.vn", "username": "lan2"}));

    let second = app(&backend, &kv);
    second.launch().await.unwrap();
    let profile = second.auth().fetch_profile().await.unwrap();

    assert_eq!(profile.username, "lan2");
    assert_eq!(backend.calls_to(REFRESH), 1);
    assert_eq!(
        backend.requests_to(REFRESH)[0].authorization(),
        Some("Bearer r1")
    );
    assert_eq!(
        second.store().access_token().unwrap().expose_secret(),
        "Bearer a2"
    );
}

#[tokio::test]
async fn rejected_refresh_signs_out_and_clears_saved_tokens() {
    let backend = FakeBackend::new("Bearer a1");
    sign_in_fixture(&backend);
    let kv = Arc::new(MemoryKv::new());
    let app = app(&backend, &kv);
    let (_, _autosave) = app.launch().await.unwrap();
    app.auth().sign_in(&form()).await.unwrap();

    backend.expire_access();
    backend.refresh_rejects(401);
    let err = app.cases().list().await.unwrap_err();

    assert!(!app.view().session.logged_in);
    assert!(app.store().access_token().is_none());
    assert!(app.connect_chat().is_none());
    assert_eq!(
        app.view()
            .toasts
            .iter()
            .filter(|t| t.title == "Session expired")
            .count(),
        1
    );
    assert!(!err.message.is_empty());
}
