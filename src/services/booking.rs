use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use tracing::{info, instrument};

use super::{segment, ServiceContext};
use crate::capabilities::{HttpRequest, MultipartForm};
use crate::event::{BookingScope, Event};
use crate::model::{BookingDecision, BookingDraft, BookingId, BookingRequest, ScheduleSlot, SlotId};
use crate::validation::validate_booking;
use crate::{AppError, AppResult};

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn booking_form(draft: &BookingDraft) -> MultipartForm {
    let form = MultipartForm::new()
        .text("lawyer_id", draft.lawyer_id.as_str())
        .text("title", draft.title.trim())
        .text("short_description", draft.short_description.trim())
        .text("desired_start_time", timestamp(draft.desired_start_time))
        .text("desired_end_time", timestamp(draft.desired_end_time));
    match &draft.attachment {
        Some(file) => form.file("attachment", file.clone()),
        None => form,
    }
}

#[derive(Debug, Clone)]
pub struct BookingService {
    ctx: ServiceContext,
}

impl BookingService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(lawyer = %draft.lawyer_id))]
    pub async fn create(&self, draft: &BookingDraft) -> AppResult<BookingRequest> {
        self.create_at(draft, Utc::now()).await
    }

    pub(crate) async fn create_at(
        &self,
        draft: &BookingDraft,
        now: DateTime<Utc>,
    ) -> AppResult<BookingRequest> {
        if let Err(e) = validate_booking(draft, now) {
            let error = AppError::from(e);
            self.ctx.dispatch(Event::BookingFailed(error.message.clone()));
            return Err(error);
        }

        self.ctx.dispatch(Event::BookingLoading);
        let result = async {
            let request =
                HttpRequest::post("booking/requests").with_multipart(booking_form(draft))?;
            self.ctx.fetch::<BookingRequest>(request).await
        }
        .await;

        match result {
            Ok(request) => {
                info!(id = %request.id, "booking request created");
                self.ctx.dispatch(Event::BookingCreated(request.clone()));
                self.ctx.success("Booking request sent");
                Ok(request)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not send booking request", e, Event::BookingFailed)),
        }
    }

    async fn load_requests(&self, scope: BookingScope) -> AppResult<Vec<BookingRequest>> {
        let path = match scope {
            BookingScope::Mine => "booking/requests/me",
            BookingScope::Incoming => "booking/requests/incoming",
        };
        self.ctx.dispatch(Event::BookingLoading);
        match self.ctx.fetch::<Vec<BookingRequest>>(HttpRequest::get(path)).await {
            Ok(requests) => {
                self.ctx.dispatch(Event::BookingRequestsLoaded {
                    scope,
                    requests: requests.clone(),
                });
                Ok(requests)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not load booking requests", e, Event::BookingFailed)),
        }
    }

    #[instrument(skip(self))]
    pub async fn my_requests(&self) -> AppResult<Vec<BookingRequest>> {
        self.load_requests(BookingScope::Mine).await
    }

    #[instrument(skip(self))]
    pub async fn incoming_requests(&self) -> AppResult<Vec<BookingRequest>> {
        self.load_requests(BookingScope::Incoming).await
    }

    /// Accepting a request opens a case; the decision carries it.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn decide(&self, id: &BookingId, accept: bool) -> AppResult<BookingDecision> {
        self.ctx.dispatch(Event::BookingLoading);
        let result = async {
            let path = format!("booking/requests/{}/decision", segment(id.as_str()));
            let request = HttpRequest::post(path).with_json(&json!({ "accept": accept }))?;
            self.ctx.fetch::<BookingDecision>(request).await
        }
        .await;

        match result {
            Ok(decision) => {
                self.ctx.dispatch(Event::BookingDecided(decision.clone()));
                self.ctx
                    .success(if accept { "Booking accepted" } else { "Booking declined" });
                Ok(decision)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not update booking", e, Event::BookingFailed)),
        }
    }

    #[instrument(skip(self))]
    pub async fn create_slot(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<ScheduleSlot> {
        self.ctx.dispatch(Event::BookingLoading);
        let result = async {
            let request = HttpRequest::post("booking/schedule").with_json(&json!({
                "start_time": timestamp(start),
                "end_time": timestamp(end),
            }))?;
            self.ctx.fetch::<ScheduleSlot>(request).await
        }
        .await;

        match result {
            Ok(slot) => {
                self.ctx.dispatch(Event::SlotCreated(slot.clone()));
                self.ctx.success("Time slot added");
                Ok(slot)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not add time slot", e, Event::BookingFailed)),
        }
    }

    #[instrument(skip(self))]
    pub async fn my_slots(&self) -> AppResult<Vec<ScheduleSlot>> {
        self.ctx.dispatch(Event::BookingLoading);
        match self
            .ctx
            .fetch::<Vec<ScheduleSlot>>(HttpRequest::get("booking/schedule/me"))
            .await
        {
            Ok(slots) => {
                self.ctx.dispatch(Event::OwnSlotsLoaded(slots.clone()));
                Ok(slots)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not load your schedule", e, Event::BookingFailed)),
        }
    }

    #[instrument(skip(self), fields(id = %id))]
    pub async fn delete_slot(&self, id: &SlotId) -> AppResult<()> {
        self.ctx.dispatch(Event::BookingLoading);
        let request = HttpRequest::delete(format!("booking/schedule/{}", segment(id.as_str())));
        match self.ctx.call(request).await {
            Ok(()) => {
                self.ctx.dispatch(Event::SlotDeleted(id.clone()));
                Ok(())
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not remove time slot", e, Event::BookingFailed)),
        }
    }
}
