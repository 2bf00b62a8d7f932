//! One service per API area. Each call moves its slice through
//! loading -> loaded/failed and reports failures as toasts.

pub mod auth;
pub mod booking;
pub mod cases;
pub mod chatbot;
pub mod documents;
pub mod lawyers;
pub mod messages;
pub mod verification;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use crate::capabilities::HttpRequest;
use crate::event::{Event, Toast};
use crate::network::ApiClient;
use crate::store::Store;
use crate::AppError;

pub use self::auth::AuthService;
pub use self::booking::BookingService;
pub use self::cases::CaseService;
pub use self::chatbot::ChatbotService;
pub use self::documents::DocumentService;
pub use self::lawyers::LawyerService;
pub use self::messages::MessageService;
pub use self::verification::VerificationService;

/// What every service holds: the authenticated client and the store.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    client: ApiClient,
    store: Arc<Store>,
}

impl ServiceContext {
    pub fn new(client: ApiClient, store: Arc<Store>) -> Self {
        Self { client, store }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub(crate) fn dispatch(&self, event: Event) {
        self.store.dispatch(event);
    }

    pub(crate) fn success(&self, title: &str) {
        self.store.push_toast(Toast::success(title));
    }

    pub(crate) async fn fetch<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
    ) -> Result<T, AppError> {
        Ok(self.client.send_json(request).await?)
    }

    pub(crate) async fn call(&self, request: HttpRequest) -> Result<(), AppError> {
        self.client.send(request).await?;
        Ok(())
    }

    /// Records a failure on the slice and toasts it. Auth failures are not
    /// toasted here: the session layer has already announced them.
    pub(crate) fn fail(
        &self,
        title: &str,
        error: impl Into<AppError>,
        slice_error: impl FnOnce(String) -> Event,
    ) -> AppError {
        let error = error.into();
        let detail = error.toast_detail();
        warn!(code = error.code(), title, error = %error, "service call failed");

        self.store.dispatch(slice_error(detail.clone()));
        if !error.is_auth() {
            self.store.push_toast(Toast::error(title, detail));
        }
        error
    }
}

/// A list endpoint that sometimes answers with a single object.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub(crate) fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

/// Escapes one dynamic path segment.
pub(crate) fn segment(raw: impl AsRef<str>) -> String {
    urlencoding::encode(raw.as_ref()).into_owned()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::HttpResponse;
    use crate::event::ToastKind;
    use serde_json::json;

    #[test]
    fn path_segments_are_percent_encoded() {
        assert_eq!(
            segment("Luật đất đai"),
            "Lu%E1%BA%ADt%20%C4%91%E1%BA%A5t%20%C4%91ai"
        );
        assert_eq!(segment("a/b?c#d"), "a%2Fb%3Fc%23d");
        assert_eq!(segment("doc-1_v2.pdf~"), "doc-1_v2.pdf~");
    }

    #[test]
    fn one_or_many_accepts_both_shapes() {
        let many: OneOrMany<u32> = serde_json::from_value(json!([1, 2])).unwrap();
        assert_eq!(many.into_vec(), vec![1, 2]);
        let one: OneOrMany<u32> = serde_json::from_value(json!(3)).unwrap();
        assert_eq!(one.into_vec(), vec![3]);
    }

    #[tokio::test]
    async fn failures_toast_and_mark_the_slice() {
        let (transport, ctx) = testing::signed_in();
        transport.respond(
            "api/cases",
            HttpResponse::json_body(500, &json!({"detail": "db down"})),
        );

        let err = ctx
            .fetch::<Vec<u32>>(HttpRequest::get("api/cases"))
            .await
            .map_err(|e| ctx.fail("Could not load cases", e, Event::CasesFailed))
            .unwrap_err();

        assert_eq!(err.message, "db down");
        let view = ctx.store().view();
        assert_eq!(view.cases.error.as_deref(), Some("db down"));
        let toast = view.toasts.last().unwrap();
        assert_eq!(toast.kind, ToastKind::Error);
        assert_eq!(toast.title, "Could not load cases");
        assert_eq!(toast.detail.as_deref(), Some("db down"));
    }

    #[tokio::test]
    async fn forbidden_is_not_toasted_twice() {
        let (transport, ctx) = testing::signed_in();
        transport.respond("api/cases", HttpResponse::json_body(403, &json!({})));

        let err = ctx
            .fetch::<Vec<u32>>(HttpRequest::get("api/cases"))
            .await
            .map_err(|e| ctx.fail("Could not load cases", e, Event::CasesFailed))
            .unwrap_err();

        assert!(err.is_auth());
        assert!(ctx.store().view().toasts.is_empty());
        assert!(!ctx.store().is_logged_in());
    }
}
