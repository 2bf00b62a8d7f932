use serde_json::json;
use tracing::{info, instrument};

use super::{segment, ServiceContext};
use crate::capabilities::HttpRequest;
use crate::event::Event;
use crate::model::{VerificationId, VerificationRequest, VerificationStatus};
use crate::validation::validate_rejection_reason;
use crate::{AppError, AppResult};

const BASE: &str = "lawyer/verification-requests";

/// Lawyer verification requests. Listing all and reviewing are admin-only
/// on the server.
#[derive(Debug, Clone)]
pub struct VerificationService {
    ctx: ServiceContext,
}

impl VerificationService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    async fn load_list(&self, path: String) -> AppResult<Vec<VerificationRequest>> {
        self.ctx.dispatch(Event::VerificationLoading);
        match self
            .ctx
            .fetch::<Vec<VerificationRequest>>(HttpRequest::get(path))
            .await
        {
            Ok(requests) => {
                self.ctx
                    .dispatch(Event::VerificationsLoaded(requests.clone()));
                Ok(requests)
            }
            Err(e) => Err(self.ctx.fail(
                "Could not load verification requests",
                e,
                Event::VerificationFailed,
            )),
        }
    }

    #[instrument(skip(self))]
    pub async fn all(&self) -> AppResult<Vec<VerificationRequest>> {
        self.load_list(BASE.to_string()).await
    }

    #[instrument(skip(self))]
    pub async fn mine(&self) -> AppResult<Vec<VerificationRequest>> {
        self.load_list(format!("{BASE}/me")).await
    }

    #[instrument(skip(self), fields(id = %id))]
    pub async fn by_id(&self, id: &VerificationId) -> AppResult<VerificationRequest> {
        self.ctx.dispatch(Event::VerificationLoading);
        let request = HttpRequest::get(format!("{BASE}/{}", segment(id.as_str())));
        match self.ctx.fetch::<VerificationRequest>(request).await {
            Ok(found) => {
                self.ctx.dispatch(Event::VerificationSelected(found.clone()));
                Ok(found)
            }
            Err(e) => Err(self.ctx.fail(
                "Could not load verification request",
                e,
                Event::VerificationFailed,
            )),
        }
    }

    #[instrument(skip(self), fields(id = %id))]
    pub async fn approve(&self, id: &VerificationId) -> AppResult<()> {
        self.ctx.dispatch(Event::VerificationLoading);
        let request = HttpRequest::patch(format!("{BASE}/{}/approve", segment(id.as_str())));
        match self.ctx.call(request).await {
            Ok(()) => {
                info!("verification approved");
                self.ctx.dispatch(Event::VerificationReviewed {
                    id: id.clone(),
                    status: VerificationStatus::Approved,
                    rejection_reason: None,
                });
                self.ctx.success("Lawyer approved");
                Ok(())
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not approve request", e, Event::VerificationFailed)),
        }
    }

    #[instrument(skip(self, reason), fields(id = %id))]
    pub async fn reject(&self, id: &VerificationId, reason: &str) -> AppResult<()> {
        let reason = match validate_rejection_reason(reason) {
            Ok(reason) => reason,
            Err(e) => {
                let error = AppError::from(e);
                self.ctx
                    .dispatch(Event::VerificationFailed(error.message.clone()));
                return Err(error);
            }
        };

        self.ctx.dispatch(Event::VerificationLoading);
        let result = async {
            let request = HttpRequest::patch(format!("{BASE}/{}/reject", segment(id.as_str())))
                .with_json(&json!({ "rejection_reason": reason }))?;
            self.ctx.call(request).await
        }
        .await;

        match result {
            Ok(()) => {
                info!("verification rejected");
                self.ctx.dispatch(Event::VerificationReviewed {
                    id: id.clone(),
                    status: VerificationStatus::Rejected,
                    rejection_reason: Some(reason.to_string()),
                });
                self.ctx.success("Request rejected");
                Ok(())
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not reject request", e, Event::VerificationFailed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{HttpMethod, HttpResponse};
    use crate::services::testing::signed_in;
    use serde_json::Value;

    fn pending(id: &str) -> Value {
        json!({"id": id, "user_id": "u5", "status": "pending", "years_of_experience": 4})
    }

    #[tokio::test]
    async fn approve_updates_list_and_selection() {
        let (transport, ctx) = signed_in();
        let service = VerificationService::new(ctx);
        transport.respond(
            BASE,
            HttpResponse::json_body(200, &json!([pending("v1"), pending("v2")])),
        );
        transport.respond(
            "lawyer/verification-requests/v1",
            HttpResponse::json_body(200, &pending("v1")),
        );
        transport.respond(
            "lawyer/verification-requests/v1/approve",
            HttpResponse::json_body(200, &json!({})),
        );

        service.all().await.unwrap();
        service.by_id(&VerificationId::new("v1")).await.unwrap();
        service.approve(&VerificationId::new("v1")).await.unwrap();

        let view = service.ctx.store().view().verification;
        assert_eq!(view.requests[0].status, VerificationStatus::Approved);
        assert_eq!(view.requests[1].status, VerificationStatus::Pending);
        assert_eq!(view.selected.unwrap().status, VerificationStatus::Approved);
        let sent = &transport.requests_to("lawyer/verification-requests/v1/approve")[0];
        assert_eq!(sent.method(), HttpMethod::Patch);
    }

    #[tokio::test]
    async fn reject_sends_trimmed_reason() {
        let (transport, ctx) = signed_in();
        let service = VerificationService::new(ctx);
        transport.respond(BASE, HttpResponse::json_body(200, &json!([pending("v1")])));
        transport.respond(
            "lawyer/verification-requests/v1/reject",
            HttpResponse::json_body(200, &json!({})),
        );

        service.all().await.unwrap();
        service
            .reject(&VerificationId::new("v1"), "  blurry certificate ")
            .await
            .unwrap();

        let body = transport.requests_to("lawyer/verification-requests/v1/reject")[0]
            .body()
            .to_bytes();
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            json!({"rejection_reason": "blurry certificate"})
        );
        let request = &service.ctx.store().view().verification.requests[0];
        assert_eq!(request.status, VerificationStatus::Rejected);
        assert_eq!(request.rejection_reason.as_deref(), Some("blurry certificate"));
    }

    #[tokio::test]
    async fn blank_reason_stays_local() {
        let (transport, ctx) = signed_in();
        let service = VerificationService::new(ctx);

        let err = service.reject(&VerificationId::new("v1"), "   ").await.unwrap_err();

        assert_eq!(err.message, "Rejection reason is required");
        assert_eq!(transport.calls_to("lawyer/verification-requests/v1/reject"), 0);
        assert!(service.ctx.store().view().toasts.is_empty());
    }
}
