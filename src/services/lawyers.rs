use serde_json::json;
use tracing::{instrument, warn};

use super::{segment, ServiceContext};
use crate::capabilities::HttpRequest;
use crate::event::Event;
use crate::model::{CaseId, Lawyer, LawyerId, Rating, ScheduleSlot};
use crate::validation::validate_rating;
use crate::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct LawyerService {
    ctx: ServiceContext,
}

impl LawyerService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    async fn load_list(&self, request: HttpRequest) -> AppResult<Vec<Lawyer>> {
        self.ctx.dispatch(Event::LawyersLoading);
        match self.ctx.fetch::<Vec<Lawyer>>(request).await {
            Ok(lawyers) => {
                self.ctx.dispatch(Event::LawyersLoaded(lawyers.clone()));
                Ok(lawyers)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not load lawyers", e, Event::LawyersFailed)),
        }
    }

    #[instrument(skip(self))]
    pub async fn popular(&self) -> AppResult<Vec<Lawyer>> {
        self.load_list(HttpRequest::get("api/lawyer_profiles")).await
    }

    #[instrument(skip(self))]
    pub async fn by_category(&self, category: &str) -> AppResult<Vec<Lawyer>> {
        self.load_list(HttpRequest::get(format!(
            "api/lawyers_profiles/category/{}",
            segment(category)
        )))
        .await
    }

    #[instrument(skip(self))]
    pub async fn by_page(&self, page: u32) -> AppResult<Vec<Lawyer>> {
        self.load_list(HttpRequest::get(format!("api/lawyers_profiles/page/{page}")))
            .await
    }

    /// Loads a profile, then its schedule. A missing schedule does not fail
    /// the profile.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn by_id(&self, id: &LawyerId) -> AppResult<Lawyer> {
        self.ctx.dispatch(Event::LawyersLoading);
        let request = HttpRequest::get(format!("api/lawyers_profiles/{}", segment(id.as_str())));
        let lawyer = match self.ctx.fetch::<Lawyer>(request).await {
            Ok(lawyer) => lawyer,
            Err(e) => {
                return Err(self
                    .ctx
                    .fail("Could not load lawyer", e, Event::LawyersFailed))
            }
        };
        self.ctx.dispatch(Event::LawyerLoaded(lawyer.clone()));

        if let Err(e) = self.fetch_schedule(&lawyer.id).await {
            warn!(error = %e, "lawyer schedule unavailable");
        }
        Ok(lawyer)
    }

    async fn fetch_schedule(&self, id: &LawyerId) -> AppResult<Vec<ScheduleSlot>> {
        let request =
            HttpRequest::get(format!("booking/lawyers/{}/schedule", segment(id.as_str())));
        let slots = self.ctx.fetch::<Vec<ScheduleSlot>>(request).await?;
        self.ctx.dispatch(Event::LawyerScheduleLoaded {
            lawyer_id: id.clone(),
            slots: slots.clone(),
        });
        Ok(slots)
    }

    #[instrument(skip(self), fields(id = %id))]
    pub async fn schedule(&self, id: &LawyerId) -> AppResult<Vec<ScheduleSlot>> {
        self.fetch_schedule(id)
            .await
            .map_err(|e| self.ctx.fail("Could not load schedule", e, Event::LawyersFailed))
    }

    /// Rates a finished case, 1 to 5 stars.
    #[instrument(skip(self), fields(case = %case_id))]
    pub async fn rate_case(&self, case_id: &CaseId, stars: u8) -> AppResult<Rating> {
        validate_rating(stars).map_err(AppError::from)?;

        let result = async {
            let path = format!("booking/cases/{}/rating", segment(case_id.as_str()));
            let request = HttpRequest::post(path).with_json(&json!({ "stars": stars }))?;
            self.ctx.fetch::<Rating>(request).await
        }
        .await;

        match result {
            Ok(rating) => {
                self.ctx.success("Thanks for your rating");
                Ok(rating)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not submit rating", e, Event::LawyersFailed)),
        }
    }
}
