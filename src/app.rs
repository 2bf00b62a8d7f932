//! The core as the shell sees it: one store, one authenticated client, and
//! a service per API area, all sharing the same session.

use std::sync::Arc;

use secrecy::ExposeSecret;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capabilities::{HttpTransport, KeyValueStore};
use crate::config::EnvConfig;
use crate::event::Event;
use crate::network::{ApiClient, ChatChannel, ConnectAction, RefreshCoordinator};
use crate::persist::{rehydrate, spawn_autosave};
use crate::services::{
    AuthService, BookingService, CaseService, ChatbotService, DocumentService, LawyerService,
    MessageService, ServiceContext, VerificationService,
};
use crate::session::SessionProvider;
use crate::store::{Store, ViewModel};
use crate::AppResult;

pub struct App {
    store: Arc<Store>,
    kv: Arc<dyn KeyValueStore>,
    client: ApiClient,
    chat: Arc<ChatChannel>,
    auth: AuthService,
    documents: DocumentService,
    lawyers: LawyerService,
    booking: BookingService,
    cases: CaseService,
    messages: MessageService,
    verification: VerificationService,
    chatbot: ChatbotService,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("client", &self.client)
            .field("chat", &self.chat)
            .finish_non_exhaustive()
    }
}

impl App {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        kv: Arc<dyn KeyValueStore>,
        config: EnvConfig,
    ) -> Self {
        let store = Arc::new(Store::new());
        let config = Arc::new(config);
        let session: Arc<dyn SessionProvider> = store.clone();

        let coordinator = RefreshCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&session),
            Arc::clone(&config),
        );
        let client =
            ApiClient::with_coordinator(transport, session, Arc::clone(&config), coordinator);
        let ctx = ServiceContext::new(client.clone(), Arc::clone(&store));

        Self {
            chat: Arc::new(ChatChannel::new(Arc::clone(&store), config)),
            auth: AuthService::new(ctx.clone()),
            documents: DocumentService::new(ctx.clone()),
            lawyers: LawyerService::new(ctx.clone()),
            booking: BookingService::new(ctx.clone()),
            cases: CaseService::new(ctx.clone()),
            messages: MessageService::new(ctx.clone()),
            verification: VerificationService::new(ctx.clone()),
            chatbot: ChatbotService::new(ctx),
            store,
            kv,
            client,
        }
    }

    /// Restores the saved session, then keeps it saved. Returns whether a
    /// snapshot was found. A corrupt snapshot is discarded and the app
    /// starts signed out.
    pub async fn launch(&self) -> AppResult<(bool, JoinHandle<()>)> {
        let restored = match rehydrate(self.kv.as_ref(), &self.store).await {
            Ok(restored) => restored,
            Err(e) => {
                warn!(error = %e, "discarding unreadable session snapshot");
                crate::persist::forget_session(self.kv.as_ref()).await?;
                false
            }
        };
        info!(restored, logged_in = self.store.is_logged_in(), "app launched");
        Ok((restored, spawn_autosave(Arc::clone(&self.kv), &self.store)))
    }

    pub fn view(&self) -> ViewModel {
        self.store.view()
    }

    pub fn dismiss_toast(&self, id: impl Into<String>) {
        self.store.dispatch(Event::ToastDismissed(id.into()));
    }

    /// Opens the chat socket with the current access token, if signed in.
    pub fn connect_chat(&self) -> Option<ConnectAction> {
        let token = self.store.access_token()?;
        Some(self.chat.connect(token.expose_secret()))
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn chat(&self) -> &Arc<ChatChannel> {
        &self.chat
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub fn documents(&self) -> &DocumentService {
        &self.documents
    }

    pub fn lawyers(&self) -> &LawyerService {
        &self.lawyers
    }

    pub fn booking(&self) -> &BookingService {
        &self.booking
    }

    pub fn cases(&self) -> &CaseService {
        &self.cases
    }

    pub fn messages(&self) -> &MessageService {
        &self.messages
    }

    pub fn verification(&self) -> &VerificationService {
        &self.verification
    }

    pub fn chatbot(&self) -> &ChatbotService {
        &self.chatbot
    }
}
