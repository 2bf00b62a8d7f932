use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::watch;

use crate::event::{BookingScope, Event, Toast};
use crate::format::parse_timestamp;
use crate::model::{
    BookingRequest, Case, ChatbotMessage, Conversation, Document, Lawyer, LawyerId, Message,
    ScheduleSlot, User, VerificationRequest, VerificationStatus,
};
use crate::session::{clone_secret, LogoutReason, SessionCredential, SessionProvider};
use crate::MAX_TOASTS;

/// Two messages with the same content this close together are the same
/// message seen twice (optimistic send, then socket echo).
pub const DUPLICATE_WINDOW_MS: i64 = 5_000;

#[derive(Debug, Default)]
pub struct SessionSlice {
    pub user: User,
    pub credential: SessionCredential,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentSlice {
    pub documents: Vec<Document>,
    pub selected: Option<Document>,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LawyerSlice {
    pub lawyers: Vec<Lawyer>,
    pub schedules: HashMap<LawyerId, Vec<ScheduleSlot>>,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BookingSlice {
    pub mine: Vec<BookingRequest>,
    pub incoming: Vec<BookingRequest>,
    pub own_slots: Vec<ScheduleSlot>,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CaseSlice {
    pub cases: Vec<Case>,
    pub current: Option<Case>,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageSlice {
    pub conversations: Vec<Conversation>,
    pub messages: Vec<Message>,
    pub loading_conversations: bool,
    pub loading_messages: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationSlice {
    pub requests: Vec<VerificationRequest>,
    pub selected: Option<VerificationRequest>,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatbotSlice {
    pub messages: Vec<ChatbotMessage>,
    pub session_id: Option<String>,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct Model {
    pub session: SessionSlice,
    pub documents: DocumentSlice,
    pub lawyers: LawyerSlice,
    pub booking: BookingSlice,
    pub cases: CaseSlice,
    pub messages: MessageSlice,
    pub verification: VerificationSlice,
    pub chatbot: ChatbotSlice,
    pub toasts: Vec<Toast>,
}

impl Model {
    /// Pure reducer: applies one event to the model.
    pub fn update(&mut self, event: Event) {
        match event {
            // --- Session ---
            Event::SignInStarted | Event::SignUpStarted | Event::ProfileLoading => {
                self.session.is_loading = true;
                self.session.error = None;
            }
            Event::SignInSucceeded {
                user,
                access,
                refresh,
            } => {
                let session = &mut self.session;
                session.is_loading = false;
                session.credential.logged_in = true;
                session.credential.set_access_token(Some(access));
                session.credential.set_refresh_token(refresh);
                session.user = user;
            }
            Event::SignUpSucceeded => {
                self.session.is_loading = false;
                self.session.error = None;
            }
            Event::SignInFailed(error)
            | Event::SignUpFailed(error)
            | Event::ProfileFailed(error) => {
                self.session.is_loading = false;
                self.session.error = Some(error);
            }
            Event::SignedOut => {
                let session = &mut self.session;
                session.is_loading = false;
                session.credential.logged_in = false;
                session.credential.clear_tokens();
                session.user = User::default();
            }
            Event::ProfileFetched(patch) => {
                self.session.is_loading = false;
                self.session.user = patch.into_user();
            }
            Event::ProfileUpdated(patch) => {
                self.session.is_loading = false;
                patch.merge_into(&mut self.session.user);
            }
            Event::TokensRefreshed { access, refresh } => {
                let credential = &mut self.session.credential;
                credential.set_access_token(Some(access));
                if refresh.is_some() {
                    credential.set_refresh_token(refresh);
                }
            }
            Event::AccessTokenCleared => self.session.credential.set_access_token(None),
            Event::TokensCleared => self.session.credential.clear_tokens(),
            Event::LoggedOut(_) => {
                let session = &mut self.session;
                session.is_loading = false;
                session.credential.logged_in = false;
                session.user = User::default();
                session.error = None;
            }
            Event::SessionRestored {
                user,
                access,
                refresh,
                logged_in,
            } => {
                let session = &mut self.session;
                session.user = user;
                session.credential.set_access_token(access);
                session.credential.set_refresh_token(refresh);
                session.credential.logged_in = logged_in;
            }
            Event::SessionErrorCleared => self.session.error = None,

            // --- Documents ---
            Event::DocumentsLoading => {
                self.documents.is_loading = true;
                self.documents.error = None;
            }
            Event::DocumentsLoaded(documents) => {
                self.documents.is_loading = false;
                self.documents.documents = documents;
            }
            Event::DocumentSelected(document) => {
                self.documents.is_loading = false;
                self.documents.selected = Some(document);
            }
            Event::DocumentAdded(document) => {
                self.documents.is_loading = false;
                self.documents.documents.push(document);
            }
            Event::DocumentUpdated(document) => {
                self.documents.is_loading = false;
                if let Some(existing) = self
                    .documents
                    .documents
                    .iter_mut()
                    .find(|d| d.id == document.id)
                {
                    *existing = document;
                }
            }
            Event::DocumentDeleted(id) => {
                self.documents.is_loading = false;
                self.documents.documents.retain(|d| d.id != id);
                if self.documents.selected.as_ref().is_some_and(|d| d.id == id) {
                    self.documents.selected = None;
                }
            }
            Event::DocumentsFailed(error) => {
                self.documents.is_loading = false;
                self.documents.error = Some(error);
            }

            // --- Lawyers ---
            Event::LawyersLoading => {
                self.lawyers.is_loading = true;
                self.lawyers.error = None;
            }
            Event::LawyersLoaded(lawyers) => {
                self.lawyers.is_loading = false;
                self.lawyers.lawyers = lawyers;
            }
            Event::LawyerLoaded(lawyer) => {
                self.lawyers.is_loading = false;
                match self.lawyers.lawyers.iter_mut().find(|l| l.id == lawyer.id) {
                    Some(existing) => *existing = lawyer,
                    None => self.lawyers.lawyers.push(lawyer),
                }
            }
            Event::LawyerScheduleLoaded { lawyer_id, slots } => {
                self.lawyers.schedules.insert(lawyer_id, slots);
            }
            Event::LawyersFailed(error) => {
                self.lawyers.is_loading = false;
                self.lawyers.error = Some(error);
            }

            // --- Booking ---
            Event::BookingLoading => {
                self.booking.is_loading = true;
                self.booking.error = None;
            }
            Event::BookingRequestsLoaded { scope, requests } => {
                self.booking.is_loading = false;
                match scope {
                    BookingScope::Mine => self.booking.mine = requests,
                    BookingScope::Incoming => self.booking.incoming = requests,
                }
            }
            Event::BookingCreated(request) => {
                self.booking.is_loading = false;
                self.booking.mine.insert(0, request);
            }
            Event::BookingDecided(decision) => {
                self.booking.is_loading = false;
                let booking = decision.booking;
                if let Some(existing) = self
                    .booking
                    .incoming
                    .iter_mut()
                    .find(|b| b.id == booking.id)
                {
                    *existing = booking;
                }
                if let Some(case) = decision.case {
                    upsert_case(&mut self.cases.cases, case);
                }
            }
            Event::OwnSlotsLoaded(slots) => {
                self.booking.is_loading = false;
                self.booking.own_slots = slots;
            }
            Event::SlotCreated(slot) => {
                self.booking.is_loading = false;
                self.booking.own_slots.push(slot);
            }
            Event::SlotDeleted(id) => {
                self.booking.is_loading = false;
                self.booking.own_slots.retain(|s| s.id != id);
            }
            Event::BookingFailed(error) => {
                self.booking.is_loading = false;
                self.booking.error = Some(error);
            }

            // --- Cases ---
            Event::CasesLoading => {
                self.cases.is_loading = true;
                self.cases.error = None;
            }
            Event::CasesLoaded(cases) => {
                self.cases.is_loading = false;
                self.cases.cases = cases;
            }
            Event::CaseSelected(case) => {
                self.cases.is_loading = false;
                self.cases.current = Some(case);
            }
            Event::CaseUpdated(case) => {
                self.cases.is_loading = false;
                if self.cases.current.as_ref().is_some_and(|c| c.id == case.id) {
                    self.cases.current = Some(case.clone());
                }
                upsert_case(&mut self.cases.cases, case);
            }
            Event::CasesCleared => {
                self.cases.cases.clear();
                self.cases.current = None;
            }
            Event::CasesFailed(error) => {
                self.cases.is_loading = false;
                self.cases.error = Some(error);
            }

            // --- Messages ---
            Event::ConversationsLoading => {
                self.messages.loading_conversations = true;
                self.messages.error = None;
            }
            Event::ConversationsLoaded(conversations) => {
                self.messages.loading_conversations = false;
                self.messages.conversations = conversations;
            }
            Event::ConversationCreated(conversation) => {
                self.messages.loading_conversations = false;
                self.messages.conversations.push(conversation);
            }
            Event::ConversationsFailed(error) => {
                self.messages.loading_conversations = false;
                self.messages.error = Some(error);
            }
            Event::MessagesLoading => {
                // Refetches keep showing cached messages.
                if self.messages.messages.is_empty() {
                    self.messages.loading_messages = true;
                }
                self.messages.error = None;
            }
            Event::MessagesLoaded(messages) => {
                self.messages.loading_messages = false;
                self.messages.messages = messages;
            }
            Event::MessageReceived(message) => {
                self.bump_conversation(&message);
                push_unique(&mut self.messages.messages, message);
            }
            Event::MessageSent(message) => push_unique(&mut self.messages.messages, message),
            Event::MessagesCleared => self.messages.messages.clear(),
            Event::MessagesFailed(error) => {
                self.messages.loading_messages = false;
                self.messages.error = Some(error);
            }

            // --- Verification ---
            Event::VerificationLoading => {
                self.verification.is_loading = true;
                self.verification.error = None;
            }
            Event::VerificationsLoaded(requests) => {
                self.verification.is_loading = false;
                self.verification.requests = requests;
            }
            Event::VerificationSelected(request) => {
                self.verification.is_loading = false;
                self.verification.selected = Some(request);
            }
            Event::VerificationReviewed {
                id,
                status,
                rejection_reason,
            } => {
                self.verification.is_loading = false;
                let review = |r: &mut VerificationRequest| {
                    r.status = status;
                    if status == VerificationStatus::Rejected {
                        r.rejection_reason = rejection_reason.clone();
                    }
                };
                self.verification
                    .requests
                    .iter_mut()
                    .filter(|r| r.id == id)
                    .for_each(review);
                if let Some(selected) = self.verification.selected.as_mut().filter(|r| r.id == id) {
                    review(selected);
                }
            }
            Event::VerificationFailed(error) => {
                self.verification.is_loading = false;
                self.verification.error = Some(error);
            }

            // --- Chatbot ---
            Event::ChatbotQuestionAsked {
                id,
                question,
                asked_at,
            } => {
                self.chatbot.is_loading = true;
                self.chatbot.error = None;
                self.chatbot.messages.push(ChatbotMessage {
                    id,
                    content: question,
                    is_bot: false,
                    timestamp: asked_at,
                    ..Default::default()
                });
            }
            Event::ChatbotAnswered { id, answer } => {
                self.chatbot.is_loading = false;
                self.chatbot.messages.push(ChatbotMessage {
                    id,
                    content: answer.answer,
                    is_bot: true,
                    timestamp: answer.asked_at,
                    confidence: Some(answer.confidence),
                    suggestions: answer.suggestions.into_iter().map(|s| s.question).collect(),
                    links: answer.links,
                });
            }
            Event::ChatbotFailed(error) => {
                self.chatbot.is_loading = false;
                self.chatbot.error = Some(error);
            }
            Event::ChatbotHistoryCleared => {
                self.chatbot.messages.clear();
                self.chatbot.session_id = None;
            }
            Event::ChatbotSessionInitialized(id) => {
                self.chatbot.session_id.get_or_insert(id);
            }

            // --- Toasts ---
            Event::ToastPushed(toast) => {
                if self.toasts.len() >= MAX_TOASTS {
                    self.toasts.remove(0);
                }
                self.toasts.push(toast);
            }
            Event::ToastDismissed(id) => self.toasts.retain(|t| t.id != id),
        }
    }

    /// Moves the message's conversation to the front with the message as its
    /// latest, creating a placeholder when the conversation is unknown.
    fn bump_conversation(&mut self, message: &Message) {
        let conversations = &mut self.messages.conversations;
        let conversation = match conversations
            .iter()
            .position(|c| c.id == message.conversation_id)
        {
            Some(index) => {
                let mut conversation = conversations.remove(index);
                conversation.last_message = Some(message.clone());
                conversation.last_message_at = Some(message.created_at.clone());
                conversation.updated_at = message.created_at.clone();
                conversation
            }
            None => Conversation::placeholder(message),
        };
        conversations.insert(0, conversation);
    }

    pub fn view(&self) -> ViewModel {
        ViewModel {
            session: SessionView {
                user: self.session.user.clone(),
                logged_in: self.session.credential.logged_in,
                is_loading: self.session.is_loading,
                error: self.session.error.clone(),
            },
            documents: self.documents.clone(),
            lawyers: self.lawyers.clone(),
            booking: self.booking.clone(),
            cases: self.cases.clone(),
            messages: self.messages.clone(),
            verification: self.verification.clone(),
            chatbot: self.chatbot.clone(),
            toasts: self.toasts.clone(),
        }
    }
}

fn upsert_case(cases: &mut Vec<Case>, case: Case) {
    match cases.iter_mut().find(|c| c.id == case.id) {
        Some(existing) => *existing = case,
        None => cases.push(case),
    }
}

fn is_duplicate(existing: &Message, incoming: &Message) -> bool {
    if existing.id == incoming.id {
        return true;
    }
    if existing.content != incoming.content {
        return false;
    }
    match (
        parse_timestamp(&existing.created_at),
        parse_timestamp(&incoming.created_at),
    ) {
        (Some(a), Some(b)) => (a - b).num_milliseconds().abs() < DUPLICATE_WINDOW_MS,
        _ => false,
    }
}

fn push_unique(messages: &mut Vec<Message>, message: Message) {
    if !messages.iter().any(|m| is_duplicate(m, &message)) {
        messages.push(message);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub user: User,
    pub logged_in: bool,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// What the shell renders. Never carries tokens.
#[derive(Debug, Clone, Serialize)]
pub struct ViewModel {
    pub session: SessionView,
    pub documents: DocumentSlice,
    pub lawyers: LawyerSlice,
    pub booking: BookingSlice,
    pub cases: CaseSlice,
    pub messages: MessageSlice,
    pub verification: VerificationSlice,
    pub chatbot: ChatbotSlice,
    pub toasts: Vec<Toast>,
}

/// Single-writer state container.
///
/// Events are applied one at a time under the lock; subscribers are woken
/// through a revision counter after every dispatch.
pub struct Store {
    model: Mutex<Model>,
    revision: watch::Sender<u64>,
    session_revision: watch::Sender<u64>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("revision", &self.revision())
            .field("logged_in", &self.is_logged_in())
            .finish_non_exhaustive()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            model: Mutex::new(Model::default()),
            revision: watch::channel(0).0,
            session_revision: watch::channel(0).0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Model> {
        self.model
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn dispatch(&self, event: Event) {
        let affects_session = event.affects_session();
        tracing::trace!(?event, "dispatch");
        self.lock().update(event);

        self.revision.send_modify(|r| *r += 1);
        if affects_session {
            self.session_revision.send_modify(|r| *r += 1);
        }
    }

    pub fn with_model<R>(&self, f: impl FnOnce(&Model) -> R) -> R {
        f(&self.lock())
    }

    pub fn view(&self) -> ViewModel {
        self.lock().view()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Wakes after every dispatch.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Wakes only after events that change the persisted session.
    pub fn subscribe_session(&self) -> watch::Receiver<u64> {
        self.session_revision.subscribe()
    }

    pub fn push_toast(&self, toast: Toast) {
        self.dispatch(Event::ToastPushed(toast));
    }

    pub fn is_logged_in(&self) -> bool {
        self.with_model(|m| m.session.credential.logged_in)
    }
}

impl SessionProvider for Store {
    fn access_token(&self) -> Option<SecretString> {
        self.with_model(|m| m.session.credential.access_token().map(clone_secret))
    }

    fn refresh_token(&self) -> Option<SecretString> {
        self.with_model(|m| m.session.credential.refresh_token().map(clone_secret))
    }

    fn store_tokens(&self, access: SecretString, refresh: Option<SecretString>) {
        self.dispatch(Event::TokensRefreshed { access, refresh });
    }

    fn clear_access_token(&self) {
        self.dispatch(Event::AccessTokenCleared);
    }

    fn clear_tokens(&self) {
        self.dispatch(Event::TokensCleared);
    }

    fn mark_logged_out(&self, reason: LogoutReason) {
        tracing::info!(?reason, "session logged out");
        self.dispatch(Event::LoggedOut(reason));
    }

    fn notify_session_expired(&self) {
        self.push_toast(Toast::session_expired());
    }
}
