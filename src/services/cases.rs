use serde_json::Value;
use tracing::instrument;

use super::{segment, OneOrMany, ServiceContext};
use crate::capabilities::{FilePart, HttpRequest, MultipartForm};
use crate::event::Event;
use crate::model::{Case, CaseId, CaseNotes, CaseUpdate};
use crate::network::ApiError;
use crate::{AppError, AppResult};

/// `api/cases` answers with an array, a single case, or `null` under `data`.
fn case_list(value: Value) -> Result<Vec<Case>, ApiError> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value::<OneOrMany<Case>>(value)
        .map(OneOrMany::into_vec)
        .map_err(|e| ApiError::Decode(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct CaseService {
    ctx: ServiceContext,
}

impl CaseService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self))]
    pub async fn list(&self) -> AppResult<Vec<Case>> {
        self.ctx.dispatch(Event::CasesLoading);
        let result = async {
            let value = self.ctx.fetch::<Value>(HttpRequest::get("api/cases")).await?;
            Ok::<_, AppError>(case_list(value)?)
        }
        .await;

        match result {
            Ok(cases) => {
                self.ctx.dispatch(Event::CasesLoaded(cases.clone()));
                Ok(cases)
            }
            Err(e) => Err(self.ctx.fail("Could not load cases", e, Event::CasesFailed)),
        }
    }

    #[instrument(skip(self), fields(id = %id))]
    pub async fn detail(&self, id: &CaseId) -> AppResult<Case> {
        self.ctx.dispatch(Event::CasesLoading);
        let request = HttpRequest::get(format!("booking/cases/{}", segment(id.as_str())));
        match self.ctx.fetch::<Case>(request).await {
            Ok(case) => {
                self.ctx.dispatch(Event::CaseSelected(case.clone()));
                Ok(case)
            }
            Err(e) => Err(self.ctx.fail("Could not load case", e, Event::CasesFailed)),
        }
    }

    async fn modify(&self, title: &str, request: AppResult<HttpRequest>) -> AppResult<Case> {
        self.ctx.dispatch(Event::CasesLoading);
        let result = match request {
            Ok(request) => self.ctx.fetch::<Case>(request).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(case) => {
                self.ctx.dispatch(Event::CaseUpdated(case.clone()));
                Ok(case)
            }
            Err(e) => Err(self.ctx.fail(title, e, Event::CasesFailed)),
        }
    }

    #[instrument(skip(self, notes), fields(id = %id))]
    pub async fn update_notes(&self, id: &CaseId, notes: &CaseNotes) -> AppResult<Case> {
        let request = HttpRequest::patch(format!("booking/cases/{}/notes", segment(id.as_str())))
            .with_json(notes)
            .map_err(Into::into);
        self.modify("Could not save notes", request).await
    }

    #[instrument(skip(self, file), fields(id = %id, file = %file.file_name))]
    pub async fn upload_attachment(&self, id: &CaseId, file: FilePart) -> AppResult<Case> {
        let path = format!("booking/cases/{}/attachments", segment(id.as_str()));
        let request = HttpRequest::post(path)
            .with_multipart(MultipartForm::new().file("attachment", file))
            .map_err(Into::into);
        let case = self.modify("Could not upload attachment", request).await?;
        self.ctx.success("Attachment uploaded");
        Ok(case)
    }

    #[instrument(skip(self, update), fields(id = %id))]
    pub async fn update(&self, id: &CaseId, update: &CaseUpdate) -> AppResult<Case> {
        let request = HttpRequest::patch(format!("booking/cases/{}", segment(id.as_str())))
            .with_json(update)
            .map_err(Into::into);
        let case = self.modify("Could not update case", request).await?;
        self.ctx.success("Case updated");
        Ok(case)
    }

    /// Drops cached cases, e.g. on account switch.
    pub fn clear(&self) {
        self.ctx.dispatch(Event::CasesCleared);
    }
}
