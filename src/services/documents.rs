use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;
use tracing::{debug, instrument};

use super::{segment, ServiceContext};
use crate::capabilities::{HttpRequest, MultipartForm};
use crate::event::Event;
use crate::model::{Document, DocumentDraft, DocumentId};
use crate::{AppResult, DOWNLOAD_CACHE_CAPACITY};

type DownloadCache = LruCache<String, Arc<Vec<u8>>>;

/// Admin uploads go to the documentation API; reads go to the public
/// legal document index.
fn draft_form(draft: &DocumentDraft) -> MultipartForm {
    let non_empty = |s: &str| Some(s.trim().to_string()).filter(|s| !s.is_empty());
    let form = MultipartForm::new()
        .text_opt("display_name", non_empty(&draft.title))
        .text_opt("code", non_empty(&draft.code))
        .text_opt("description", non_empty(&draft.description))
        .text_opt("summary", non_empty(&draft.summary))
        .text_opt("category", non_empty(&draft.category));
    match &draft.file {
        Some(file) => form.file("document", file.clone()),
        None => form,
    }
}

#[derive(Debug, Clone)]
pub struct DocumentService {
    ctx: ServiceContext,
    downloads: Arc<Mutex<DownloadCache>>,
}

impl DocumentService {
    pub fn new(ctx: ServiceContext) -> Self {
        let capacity = NonZeroUsize::new(DOWNLOAD_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            ctx,
            downloads: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    fn cache(&self) -> MutexGuard<'_, DownloadCache> {
        self.downloads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn load_list(&self, request: HttpRequest) -> AppResult<Vec<Document>> {
        self.ctx.dispatch(Event::DocumentsLoading);
        match self.ctx.fetch::<Vec<Document>>(request).await {
            Ok(documents) => {
                self.ctx.dispatch(Event::DocumentsLoaded(documents.clone()));
                Ok(documents)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not load documents", e, Event::DocumentsFailed)),
        }
    }

    #[instrument(skip(self))]
    pub async fn popular(&self) -> AppResult<Vec<Document>> {
        self.load_list(HttpRequest::get("api/legal_documents")).await
    }

    #[instrument(skip(self))]
    pub async fn by_category(&self, category: &str) -> AppResult<Vec<Document>> {
        self.load_list(HttpRequest::get(format!(
            "api/legal_documents/category/{}",
            segment(category)
        )))
        .await
    }

    #[instrument(skip(self))]
    pub async fn by_page(&self, page: u32) -> AppResult<Vec<Document>> {
        self.load_list(HttpRequest::get(format!("api/legal_documents/page/{page}")))
            .await
    }

    #[instrument(skip(self), fields(id = %id))]
    pub async fn by_id(&self, id: &DocumentId) -> AppResult<Document> {
        self.ctx.dispatch(Event::DocumentsLoading);
        let request = HttpRequest::get(format!("api/legal_documents/{}", segment(id.as_str())));
        match self.ctx.fetch::<Document>(request).await {
            Ok(document) => {
                self.ctx.dispatch(Event::DocumentSelected(document.clone()));
                Ok(document)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not load document", e, Event::DocumentsFailed)),
        }
    }

    #[instrument(skip_all, fields(title = %draft.title))]
    pub async fn create(&self, draft: &DocumentDraft) -> AppResult<Document> {
        self.ctx.dispatch(Event::DocumentsLoading);
        let result = async {
            let request = HttpRequest::post("documentation/").with_multipart(draft_form(draft))?;
            self.ctx.fetch::<Document>(request).await
        }
        .await;

        match result {
            Ok(document) => {
                self.ctx.dispatch(Event::DocumentAdded(document.clone()));
                self.ctx.success("Document uploaded");
                Ok(document)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not upload document", e, Event::DocumentsFailed)),
        }
    }

    #[instrument(skip_all, fields(id = %id))]
    pub async fn update(&self, id: &DocumentId, draft: &DocumentDraft) -> AppResult<Document> {
        self.ctx.dispatch(Event::DocumentsLoading);
        let result = async {
            let request = HttpRequest::patch(format!("documentation/{}", segment(id.as_str())))
                .with_multipart(draft_form(draft))?;
            self.ctx.fetch::<Document>(request).await
        }
        .await;

        match result {
            Ok(document) => {
                self.ctx.dispatch(Event::DocumentUpdated(document.clone()));
                self.ctx.success("Document updated");
                Ok(document)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not update document", e, Event::DocumentsFailed)),
        }
    }

    #[instrument(skip(self), fields(id = %id))]
    pub async fn delete(&self, id: &DocumentId) -> AppResult<()> {
        self.ctx.dispatch(Event::DocumentsLoading);
        let request = HttpRequest::delete(format!("documentation/{}", segment(id.as_str())));
        match self.ctx.call(request).await {
            Ok(()) => {
                self.ctx.dispatch(Event::DocumentDeleted(id.clone()));
                self.ctx.success("Document deleted");
                Ok(())
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not delete document", e, Event::DocumentsFailed)),
        }
    }

    /// Fetches a document file. Files live on public storage, so no token
    /// is attached. Recent downloads are served from memory.
    #[instrument(skip(self))]
    pub async fn download(&self, url: &str) -> AppResult<Arc<Vec<u8>>> {
        let cached = self.cache().get(url).cloned();
        if let Some(bytes) = cached {
            debug!(size = bytes.len(), "download cache hit");
            return Ok(bytes);
        }

        match self.ctx.client().send_anonymous(HttpRequest::get(url)).await {
            Ok(response) => {
                let bytes = Arc::new(response.body().to_vec());
                self.cache().put(url.to_string(), Arc::clone(&bytes));
                Ok(bytes)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not download document", e, Event::DocumentsFailed)),
        }
    }
}
