use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// --- Typed IDs ---

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Int(i64),
}

/// The API mixes UUID strings and integer ids; both land as strings.
fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Int(n) => n.to_string(),
    })
}

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash)]
        pub struct $name(#[serde(deserialize_with = "deserialize_id")] pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

typed_id!(UserId);
typed_id!(DocumentId);
typed_id!(LawyerId);
typed_id!(SlotId);
typed_id!(BookingId);
typed_id!(CaseId);
typed_id!(ConversationId);
typed_id!(MessageId);
typed_id!(VerificationId);

// --- Users ---

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Client,
    Lawyer,
    Admin,
    #[default]
    #[serde(other)]
    Unknown,
}

impl UserRole {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "client" | "user" => UserRole::Client,
            "lawyer" => UserRole::Lawyer,
            "admin" => UserRole::Admin,
            _ => UserRole::Unknown,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub avatar: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub role: UserRole,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Partial user record as returned by profile endpoints.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ProfilePatch {
    pub id: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub avatar_url: Option<String>,
    pub avatar: Option<String>,
    pub role: Option<String>,
}

impl ProfilePatch {
    /// Full replacement used after fetching `users/me`.
    pub fn into_user(self) -> User {
        User {
            id: UserId(self.id.unwrap_or_default()),
            email: self.email.unwrap_or_default(),
            username: self.username.unwrap_or_default(),
            avatar: self.avatar_url.or(self.avatar).unwrap_or_default(),
            phone_number: self.phone_number.filter(|s| !s.is_empty()),
            address: self.address.filter(|s| !s.is_empty()),
            role: self.role.as_deref().map(UserRole::parse).unwrap_or_default(),
        }
    }

    /// Field-by-field merge; empty or missing fields keep the prior value.
    pub fn merge_into(self, user: &mut User) {
        fn non_empty(value: Option<String>) -> Option<String> {
            value.filter(|s| !s.is_empty())
        }

        if let Some(id) = non_empty(self.id) {
            user.id = UserId(id);
        }
        if let Some(email) = non_empty(self.email) {
            user.email = email;
        }
        if let Some(username) = non_empty(self.username) {
            user.username = username;
        }
        if self.phone_number.is_some() {
            user.phone_number = self.phone_number;
        }
        if self.address.is_some() {
            user.address = self.address;
        }
        if let Some(avatar) = non_empty(self.avatar_url).or_else(|| non_empty(self.avatar)) {
            user.avatar = avatar;
        }
        if let Some(role) = non_empty(self.role) {
            user.role = UserRole::parse(&role);
        }
    }
}

/// Body of `PUT users/user`.
#[derive(Serialize, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl fmt::Debug for ProfileUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileUpdate")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

// --- Documents ---

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Document {
    pub id: DocumentId,
    pub code: String,
    pub title: String,
    pub description: String,
    #[serde(alias = "sumary")]
    pub summary: String,
    pub category: String,
    pub created_at: String,
    pub updated_at: String,
    pub url: String,
}

/// Admin create/update payload, sent as multipart.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentDraft {
    pub code: String,
    pub title: String,
    pub description: String,
    pub summary: String,
    pub category: String,
    pub file: Option<crate::capabilities::FilePart>,
}

// --- Lawyers ---

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Lawyer {
    pub id: LawyerId,
    pub user_id: UserId,
    pub name: String,
    pub bio: String,
    pub years_experience: u32,
    pub price_per_session_cents: u64,
    pub currency: String,
    pub province: String,
    pub rating_avg: f64,
    pub rating_count: u32,
    #[serde(rename = "imageUri", alias = "image_uri")]
    pub image_uri: String,
    pub updated_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ScheduleSlot {
    pub id: SlotId,
    pub lawyer_id: LawyerId,
    pub start_time: String,
    pub end_time: String,
    pub is_booked: bool,
    pub create_at: String,
    pub updated_at: String,
}

// --- Booking ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "accepted")]
    Accepted,
    #[serde(alias = "declined", alias = "rejected", alias = "REJECTED")]
    Declined,
    #[serde(alias = "cancelled")]
    Cancelled,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BookingRequest {
    pub id: BookingId,
    pub client_id: UserId,
    pub lawyer_id: LawyerId,
    pub schedule_slot_id: Option<SlotId>,
    pub title: String,
    pub short_description: String,
    pub desired_start_time: String,
    pub desired_end_time: String,
    pub attachment_url: Option<String>,
    pub status: BookingStatus,
    pub decision_at: Option<String>,
    pub create_at: String,
    pub updated_at: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingDraft {
    pub lawyer_id: LawyerId,
    pub title: String,
    pub short_description: String,
    pub desired_start_time: chrono::DateTime<chrono::Utc>,
    pub desired_end_time: chrono::DateTime<chrono::Utc>,
    pub attachment: Option<crate::capabilities::FilePart>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BookingDecision {
    pub booking: BookingRequest,
    #[serde(default)]
    pub case: Option<Case>,
}

// --- Cases ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseState {
    #[default]
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Case {
    pub id: CaseId,
    pub booking_request_id: Option<BookingId>,
    pub lawyer_id: LawyerId,
    pub client_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub state: CaseState,
    pub attachment_urls: Vec<String>,
    pub lawyer_note: Option<String>,
    pub client_note: Option<String>,
    pub started_at: String,
    pub ending_time: Option<String>,
    pub create_at: String,
    pub updated_at: String,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CaseUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<CaseState>,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CaseNotes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lawyer_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_note: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Rating {
    pub id: String,
    pub case_history_id: CaseId,
    pub lawyer_id: LawyerId,
    pub client_id: UserId,
    pub stars: u8,
    pub create_at: String,
    pub updated_at: String,
}

// --- Messaging ---

#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_size: Option<u64>,
    pub delivered_to: Vec<UserId>,
    pub read_by: Vec<UserId>,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("conversation_id", &self.conversation_id)
            .field("sender_id", &self.sender_id)
            .field("content_len", &self.content.len())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ChatUserSummary {
    pub id: UserId,
    pub username: String,
    pub email: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Participant {
    pub conversation_id: ConversationId,
    pub user: ChatUserSummary,
    pub joined_at: String,
    pub last_read_at: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Conversation {
    pub id: ConversationId,
    pub created_at: String,
    pub updated_at: String,
    pub last_message_at: Option<String>,
    pub participants: Vec<Participant>,
    pub last_message: Option<Message>,
}

impl Conversation {
    /// Stand-in for a conversation only known from an incoming message.
    /// Participants arrive with the next conversation fetch.
    pub fn placeholder(message: &Message) -> Self {
        Self {
            id: message.conversation_id.clone(),
            created_at: message.created_at.clone(),
            updated_at: message.created_at.clone(),
            last_message_at: Some(message.created_at.clone()),
            participants: Vec::new(),
            last_message: Some(message.clone()),
        }
    }
}

// --- Verification ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct VerificationRequest {
    pub id: VerificationId,
    pub user_id: UserId,
    pub status: VerificationStatus,
    pub years_of_experience: u32,
    pub current_job_position: String,
    pub rejection_reason: Option<String>,
    pub reviewed_by_admin_id: Option<UserId>,
    pub reviewed_at: Option<String>,
    pub create_at: String,
    pub updated_at: String,
    pub identity_card_front_url: String,
    pub identity_card_back_url: String,
    pub portrait_url: String,
    pub law_certificate_url: String,
    pub bachelor_degree_url: String,
    // Present only on the admin detail view.
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
}

// --- Chatbot ---

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ChatbotMessage {
    pub id: String,
    pub content: String,
    pub is_bot: bool,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct RelatedQuestion {
    pub question: String,
    pub score: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct LegalAiAnswer {
    pub answer: String,
    pub confidence: f64,
    pub is_fallback: bool,
    pub suggestions: Vec<RelatedQuestion>,
    pub links: Vec<String>,
    pub disclaimer: String,
    pub model_id: String,
    pub model_version: String,
    pub latency_ms: u64,
    pub asked_at: String,
}
