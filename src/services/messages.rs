use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::{segment, ServiceContext};
use crate::capabilities::HttpRequest;
use crate::event::Event;
use crate::model::{Conversation, ConversationId, Message, UserId};
use crate::validation::validate_message;
use crate::{AppError, AppResult};

/// Message history comes back bare or wrapped in `messages`.
#[derive(Deserialize)]
#[serde(untagged)]
enum MessageList {
    Bare(Vec<Message>),
    Wrapped {
        #[serde(default)]
        messages: Vec<Message>,
    },
}

impl MessageList {
    fn into_vec(self) -> Vec<Message> {
        match self {
            MessageList::Bare(messages) | MessageList::Wrapped { messages } => messages,
        }
    }
}

fn conversation_path(id: &ConversationId) -> String {
    format!("chat/conversations/{}/messages", segment(id.as_str()))
}

#[derive(Debug, Clone)]
pub struct MessageService {
    ctx: ServiceContext,
}

impl MessageService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self))]
    pub async fn conversations(&self) -> AppResult<Vec<Conversation>> {
        self.ctx.dispatch(Event::ConversationsLoading);
        match self
            .ctx
            .fetch::<Vec<Conversation>>(HttpRequest::get("chat/conversations"))
            .await
        {
            Ok(conversations) => {
                self.ctx
                    .dispatch(Event::ConversationsLoaded(conversations.clone()));
                Ok(conversations)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not load conversations", e, Event::ConversationsFailed)),
        }
    }

    #[instrument(skip(self), fields(recipient = %recipient))]
    pub async fn create_conversation(&self, recipient: &UserId) -> AppResult<Conversation> {
        self.ctx.dispatch(Event::ConversationsLoading);
        let result = async {
            let request = HttpRequest::post("chat/conversations")
                .with_json(&json!({ "recipient_id": recipient }))?;
            self.ctx.fetch::<Conversation>(request).await
        }
        .await;

        match result {
            Ok(conversation) => {
                self.ctx
                    .dispatch(Event::ConversationCreated(conversation.clone()));
                Ok(conversation)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not start conversation", e, Event::ConversationsFailed)),
        }
    }

    #[instrument(skip(self), fields(conversation = %id))]
    pub async fn messages(&self, id: &ConversationId) -> AppResult<Vec<Message>> {
        self.ctx.dispatch(Event::MessagesLoading);
        let request = HttpRequest::get(conversation_path(id));
        match self.ctx.fetch::<MessageList>(request).await {
            Ok(list) => {
                let messages = list.into_vec();
                debug!(count = messages.len(), "messages loaded");
                self.ctx.dispatch(Event::MessagesLoaded(messages.clone()));
                Ok(messages)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not load messages", e, Event::MessagesFailed)),
        }
    }

    /// Sends a message. The socket echo of the same message is dropped by
    /// the store's duplicate check.
    #[instrument(skip(self, content), fields(conversation = %id))]
    pub async fn send(&self, id: &ConversationId, content: &str) -> AppResult<Message> {
        let content = validate_message(content).map_err(AppError::from)?;

        let result = async {
            let request =
                HttpRequest::post(conversation_path(id)).with_json(&json!({ "content": content }))?;
            self.ctx.fetch::<Message>(request).await
        }
        .await;

        match result {
            Ok(message) => {
                self.ctx.dispatch(Event::MessageSent(message.clone()));
                Ok(message)
            }
            Err(e) => Err(self
                .ctx
                .fail("Could not send message", e, Event::MessagesFailed)),
        }
    }

    /// Forgets the open conversation's messages.
    pub fn clear(&self) {
        self.ctx.dispatch(Event::MessagesCleared);
    }
}
