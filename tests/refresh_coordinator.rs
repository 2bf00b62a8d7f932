mod common;

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use secrecy::ExposeSecret;
use shared::capabilities::{HttpRequest, HttpResponse};
use shared::network::{ApiClient, ApiError, RefreshError};
use shared::session::SessionProvider;
use shared::Store;

use common::{client, signed_in_store, FakeBackend, REFRESH};

/// Waits until `n` callers are parked on the in-flight refresh.
async fn until_waiting(client: &ApiClient, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while client.coordinator().waiting() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("callers never joined the refresh");
}

type Sent = tokio::task::JoinHandle<Result<HttpResponse, ApiError>>;

async fn burst(client: &ApiClient, n: usize) -> Vec<Sent> {
    let handles: Vec<_> = (0..n)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { client.send(HttpRequest::get(format!("cases/{i}"))).await })
        })
        .collect();

    until_waiting(client, n).await;
    handles
}

async fn join_all(handles: Vec<Sent>) -> Vec<Result<HttpResponse, ApiError>> {
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

fn session_expired_toasts(store: &Store) -> usize {
    store
        .view()
        .toasts
        .iter()
        .filter(|t| t.title == "Session expired")
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_expired_requests_share_one_refresh() {
    let backend = FakeBackend::new("Bearer valid-elsewhere");
    backend.refresh_grants("fresh", Some("r2"));
    backend.close_gate();
    let store = signed_in_store("Bearer stale", Some("r1"));
    let client = client(&backend, &store);

    let handles = burst(&client, 3).await;
    assert_eq!(client.coordinator().refresh_calls(), 1);
    assert!(client.coordinator().is_refreshing());

    backend.open_gate();
    for result in join_all(handles).await {
        assert_eq!(result.unwrap().status(), 200);
    }

    assert_eq!(backend.calls_to(REFRESH), 1);
    assert_eq!(client.coordinator().waiting(), 0);
    assert!(!client.coordinator().is_refreshing());
    assert_eq!(store.access_token().unwrap().expose_secret(), "Bearer fresh");
    assert_eq!(store.refresh_token().unwrap().expose_secret(), "r2");
}

#[tokio::test]
async fn replay_carries_new_token_and_same_request() {
    let backend = FakeBackend::new("Bearer other");
    backend.refresh_grants("fresh", None);
    let store = signed_in_store("Bearer stale", Some("r1"));
    let client = client(&backend, &store);

    let response = client.send(HttpRequest::get("cases/1")).await.unwrap();
    assert_eq!(response.status(), 200);

    let sent = backend.requests_to("cases/1");
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].authorization(), Some("Bearer stale"));
    assert_eq!(sent[1].authorization(), Some("Bearer fresh"));
    assert_eq!(sent[0].request_id(), sent[1].request_id());

    let refresh = &backend.requests_to(REFRESH)[0];
    assert_eq!(refresh.authorization(), Some("Bearer r1"));
    // The refresh token was not rotated.
    assert_eq!(store.refresh_token().unwrap().expose_secret(), "r1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_refresh_logs_out_once_and_rejects_everyone() {
    let backend = FakeBackend::new("Bearer other");
    backend.refresh_rejects(401);
    backend.close_gate();
    let store = signed_in_store("Bearer stale", Some("r1"));
    let client = client(&backend, &store);

    let handles = burst(&client, 3).await;
    backend.open_gate();

    for result in join_all(handles).await {
        assert!(matches!(
            result,
            Err(ApiError::SessionExpired(RefreshError::Rejected { status: 401 }))
        ));
    }
    assert_eq!(backend.calls_to(REFRESH), 1);
    assert!(!store.is_logged_in());
    assert!(store.access_token().is_none());
    assert!(store.refresh_token().is_none());
    assert_eq!(session_expired_toasts(&store), 1);
}

#[tokio::test]
async fn forbidden_never_refreshes() {
    let backend = FakeBackend::new("Bearer a1");
    backend.refresh_grants("fresh", None);
    let store = signed_in_store("Bearer a1", Some("r1"));
    let client = client(&backend, &store);

    let result = client.send(HttpRequest::get("admin/stats")).await;

    assert!(matches!(result, Err(ApiError::Forbidden)));
    assert_eq!(backend.calls_to(REFRESH), 0);
    assert!(!store.is_logged_in());
    assert!(store.access_token().is_none());
    assert!(store.refresh_token().is_some());
}

#[tokio::test]
async fn missing_refresh_token_rejects_without_touching_session() {
    let backend = FakeBackend::new("Bearer other");
    let store = signed_in_store("Bearer stale", None);
    let client = client(&backend, &store);

    let result = client.send(HttpRequest::get("cases/1")).await;

    assert!(matches!(result, Err(ApiError::Unauthorized)));
    assert_eq!(backend.calls_to(REFRESH), 0);
    assert!(store.is_logged_in());
    assert_eq!(store.access_token().unwrap().expose_secret(), "Bearer stale");
    assert_eq!(session_expired_toasts(&store), 0);
}

#[tokio::test]
async fn separate_expiries_refresh_separately() {
    let backend = FakeBackend::new("Bearer other");
    backend.refresh_grants("fresh1", None);
    let store = signed_in_store("Bearer stale", Some("r1"));
    let client = client(&backend, &store);

    client.send(HttpRequest::get("cases/1")).await.unwrap();
    // Same token still valid: no refresh.
    client.send(HttpRequest::get("cases/2")).await.unwrap();
    assert_eq!(client.coordinator().refresh_calls(), 1);

    backend.expire_access();
    backend.refresh_grants("fresh2", None);
    client.send(HttpRequest::get("cases/3")).await.unwrap();

    assert_eq!(client.coordinator().refresh_calls(), 2);
    assert_eq!(backend.calls_to(REFRESH), 2);
    assert_eq!(store.access_token().unwrap().expose_secret(), "Bearer fresh2");
}

#[tokio::test]
async fn slow_refresh_times_out_as_transport_error() {
    let backend = FakeBackend::new("Bearer other");
    backend.refresh_grants("fresh", None);
    backend.refresh_delay(Duration::from_secs(60));
    let store = signed_in_store("Bearer stale", Some("r1"));
    let client = ApiClient::new(
        backend.clone(),
        store.clone(),
        common::config()
            .with_timeout(Duration::from_millis(50))
            .unwrap(),
    );

    let result = client.send(HttpRequest::get("cases/1")).await;

    assert!(matches!(
        result,
        Err(ApiError::SessionExpired(RefreshError::Transport(_)))
    ));
    assert!(!store.is_logged_in());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn any_burst_of_401s_costs_one_refresh(n in 1usize..16) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        let (calls, statuses) = runtime.block_on(async {
            let backend = FakeBackend::new("Bearer other");
            backend.refresh_grants("fresh", None);
            backend.close_gate();
            let store = signed_in_store("Bearer stale", Some("r1"));
            let client = client(&backend, &store);

            let handles = burst(&client, n).await;
            backend.open_gate();
            let statuses: Vec<u16> = join_all(handles)
                .await
                .into_iter()
                .map(|r| r.map(|r| r.status()).unwrap_or(0))
                .collect();
            (backend.calls_to(REFRESH), statuses)
        });

        prop_assert_eq!(calls, 1);
        prop_assert!(statuses.iter().all(|s| *s == 200));
        prop_assert_eq!(statuses.len(), n);
    }
}

#[tokio::test]
async fn concurrent_callers_do_not_need_to_share_a_client() {
    let backend = FakeBackend::new("Bearer other");
    backend.refresh_grants("fresh", None);
    backend.close_gate();
    let store = signed_in_store("Bearer stale", Some("r1"));
    let first = client(&backend, &store);
    let second = ApiClient::with_coordinator(
        backend.clone(),
        store.clone(),
        Arc::new(common::config()),
        first.coordinator().clone(),
    );

    let a = {
        let first = first.clone();
        tokio::spawn(async move { first.send(HttpRequest::get("cases/a")).await })
    };
    let b = tokio::spawn(async move { second.send(HttpRequest::get("cases/b")).await });
    until_waiting(&first, 2).await;
    backend.open_gate();

    assert!(a.await.unwrap().is_ok());
    assert!(b.await.unwrap().is_ok());
    assert_eq!(backend.calls_to(REFRESH), 1);
}
