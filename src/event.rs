use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::model::{
    BookingDecision, BookingRequest, Case, Conversation, Document, DocumentId, Lawyer, LawyerId,
    LegalAiAnswer, Message, ProfilePatch, ScheduleSlot, SlotId, User, VerificationId,
    VerificationRequest, VerificationStatus,
};
use crate::session::LogoutReason;

// --- Toasts ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Error,
    Info,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Toast {
    pub id: String,
    pub kind: ToastKind,
    pub title: String,
    pub detail: Option<String>,
}

impl Toast {
    fn new(kind: ToastKind, title: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            title: title.into(),
            detail,
        }
    }

    pub fn success(title: impl Into<String>) -> Self {
        Self::new(ToastKind::Success, title, None)
    }

    pub fn error(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(ToastKind::Error, title, Some(detail.into()))
    }

    pub fn info(title: impl Into<String>) -> Self {
        Self::new(ToastKind::Info, title, None)
    }

    pub fn session_expired() -> Self {
        Self::error(
            "Session expired",
            "Your session has expired. Please sign in again.",
        )
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BookingScope {
    Mine,
    Incoming,
}

/// Every mutation of the model. Applied one at a time by the store.
#[derive(Debug)]
pub enum Event {
    // Session
    SignInStarted,
    SignInSucceeded {
        user: User,
        access: SecretString,
        refresh: Option<SecretString>,
    },
    SignInFailed(String),
    SignUpStarted,
    SignUpSucceeded,
    SignUpFailed(String),
    SignedOut,
    ProfileLoading,
    ProfileFetched(ProfilePatch),
    ProfileUpdated(ProfilePatch),
    ProfileFailed(String),
    TokensRefreshed {
        access: SecretString,
        refresh: Option<SecretString>,
    },
    AccessTokenCleared,
    TokensCleared,
    LoggedOut(LogoutReason),
    SessionRestored {
        user: User,
        access: Option<SecretString>,
        refresh: Option<SecretString>,
        logged_in: bool,
    },
    SessionErrorCleared,

    // Documents
    DocumentsLoading,
    DocumentsLoaded(Vec<Document>),
    DocumentSelected(Document),
    DocumentAdded(Document),
    DocumentUpdated(Document),
    DocumentDeleted(DocumentId),
    DocumentsFailed(String),

    // Lawyers
    LawyersLoading,
    LawyersLoaded(Vec<Lawyer>),
    LawyerLoaded(Lawyer),
    LawyerScheduleLoaded {
        lawyer_id: LawyerId,
        slots: Vec<ScheduleSlot>,
    },
    LawyersFailed(String),

    // Booking
    BookingLoading,
    BookingRequestsLoaded {
        scope: BookingScope,
        requests: Vec<BookingRequest>,
    },
    BookingCreated(BookingRequest),
    BookingDecided(BookingDecision),
    OwnSlotsLoaded(Vec<ScheduleSlot>),
    SlotCreated(ScheduleSlot),
    SlotDeleted(SlotId),
    BookingFailed(String),

    // Cases
    CasesLoading,
    CasesLoaded(Vec<Case>),
    CaseSelected(Case),
    CaseUpdated(Case),
    CasesCleared,
    CasesFailed(String),

    // Messages
    ConversationsLoading,
    ConversationsLoaded(Vec<Conversation>),
    ConversationCreated(Conversation),
    ConversationsFailed(String),
    MessagesLoading,
    MessagesLoaded(Vec<Message>),
    MessageReceived(Message),
    MessageSent(Message),
    MessagesCleared,
    MessagesFailed(String),

    // Verification
    VerificationLoading,
    VerificationsLoaded(Vec<VerificationRequest>),
    VerificationSelected(VerificationRequest),
    VerificationReviewed {
        id: VerificationId,
        status: VerificationStatus,
        rejection_reason: Option<String>,
    },
    VerificationFailed(String),

    // Chatbot
    ChatbotQuestionAsked {
        id: String,
        question: String,
        asked_at: String,
    },
    ChatbotAnswered {
        id: String,
        answer: LegalAiAnswer,
    },
    ChatbotFailed(String),
    ChatbotHistoryCleared,
    ChatbotSessionInitialized(String),

    // Toasts
    ToastPushed(Toast),
    ToastDismissed(String),
}

impl Event {
    /// The user's question, stamped with a fresh id and the current time.
    pub fn chatbot_question(question: impl Into<String>) -> Self {
        Event::ChatbotQuestionAsked {
            id: uuid::Uuid::new_v4().to_string(),
            question: question.into(),
            asked_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn chatbot_answer(answer: LegalAiAnswer) -> Self {
        Event::ChatbotAnswered {
            id: uuid::Uuid::new_v4().to_string(),
            answer,
        }
    }

    /// Events that change what the persisted session snapshot holds.
    pub fn affects_session(&self) -> bool {
        matches!(
            self,
            Event::SignInSucceeded { .. }
                | Event::SignedOut
                | Event::ProfileFetched(_)
                | Event::ProfileUpdated(_)
                | Event::TokensRefreshed { .. }
                | Event::AccessTokenCleared
                | Event::TokensCleared
                | Event::LoggedOut(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn event_debug_redacts_tokens() {
        let event = Event::TokensRefreshed {
            access: SecretString::new("Bearer s3cr3t".into()),
            refresh: Some(SecretString::new("r3fr3sh".into())),
        };
        let printed = format!("{event:?}");
        assert!(!printed.contains("s3cr3t"));
        assert!(!printed.contains("r3fr3sh"));
    }

    #[test]
    fn session_events_are_flagged_for_persistence() {
        assert!(Event::TokensCleared.affects_session());
        assert!(Event::LoggedOut(LogoutReason::Forbidden).affects_session());
        assert!(!Event::DocumentsLoading.affects_session());
        assert!(!Event::ToastPushed(Toast::info("hi")).affects_session());
    }

    #[test]
    fn toast_ids_are_unique() {
        assert_ne!(Toast::success("a").id, Toast::success("a").id);
    }
}
