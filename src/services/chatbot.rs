use serde::Serialize;
use tracing::{debug, instrument};

use super::ServiceContext;
use crate::capabilities::HttpRequest;
use crate::event::Event;
use crate::model::LegalAiAnswer;
use crate::validation::validate_message;
use crate::{AppError, AppResult};

#[derive(Serialize)]
struct Query<'a> {
    question: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

/// The legal Q&A assistant. Questions in one conversation share a session
/// id so the server can keep context.
#[derive(Debug, Clone)]
pub struct ChatbotService {
    ctx: ServiceContext,
}

impl ChatbotService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn session_id(&self) -> String {
        let existing = self.ctx.store().with_model(|m| m.chatbot.session_id.clone());
        match existing {
            Some(id) => id,
            None => {
                self.ctx.dispatch(Event::ChatbotSessionInitialized(
                    uuid::Uuid::new_v4().to_string(),
                ));
                self.ctx
                    .store()
                    .with_model(|m| m.chatbot.session_id.clone())
                    .unwrap_or_default()
            }
        }
    }

    #[instrument(skip_all)]
    pub async fn ask(&self, question: &str) -> AppResult<LegalAiAnswer> {
        let question = match validate_message(question) {
            Ok(question) => question,
            Err(e) => {
                let error = AppError::from(e);
                self.ctx.dispatch(Event::ChatbotFailed(error.message.clone()));
                return Err(error);
            }
        };

        let session_id = self.session_id();
        self.ctx.dispatch(Event::chatbot_question(question));

        let result = async {
            let request = HttpRequest::post("legal-ai/query").with_json(&Query {
                question,
                session_id: Some(session_id.as_str()).filter(|s| !s.is_empty()),
            })?;
            self.ctx.fetch::<LegalAiAnswer>(request).await
        }
        .await;

        match result {
            Ok(answer) => {
                debug!(
                    confidence = answer.confidence,
                    fallback = answer.is_fallback,
                    "chatbot answered"
                );
                self.ctx.dispatch(Event::chatbot_answer(answer.clone()));
                Ok(answer)
            }
            Err(e) => Err(self.ctx.fail("Chatbot error", e, Event::ChatbotFailed)),
        }
    }

    /// `true` when the assistant answers its health probe. Never toasts.
    #[instrument(skip(self))]
    pub async fn health(&self) -> bool {
        match self.ctx.client().send(HttpRequest::get("legal-ai/health")).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "chatbot health check failed");
                false
            }
        }
    }

    /// Clears the transcript and starts a fresh server session next time.
    pub fn clear_history(&self) {
        self.ctx.dispatch(Event::ChatbotHistoryCleared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{HttpError, HttpResponse};
    use crate::services::testing::signed_in;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn questions_share_one_session() {
        let (transport, ctx) = signed_in();
        let bot = ChatbotService::new(ctx);
        transport.respond(
            "legal-ai/query",
            HttpResponse::json_body(200, &json!({"answer": "Yes.", "confidence": 0.9})),
        );

        bot.ask("Can I sublet?").await.unwrap();
        bot.ask(" And after a year? ").await.unwrap();

        let sent: Vec<Value> = transport
            .requests_to("legal-ai/query")
            .iter()
            .map(|r| serde_json::from_slice(&r.body().to_bytes()).unwrap())
            .collect();
        assert_eq!(sent[1]["question"], "And after a year?");
        assert!(sent[0]["session_id"].is_string());
        assert_eq!(sent[0]["session_id"], sent[1]["session_id"]);

        let chatbot = bot.ctx.store().view().chatbot;
        assert_eq!(chatbot.messages.len(), 4);
        assert!(chatbot.messages[3].is_bot);
    }

    #[tokio::test]
    async fn clearing_starts_a_new_session() {
        let (transport, ctx) = signed_in();
        let bot = ChatbotService::new(ctx);
        transport.respond("legal-ai/query", HttpResponse::json_body(200, &json!({"answer": "ok"})));

        bot.ask("first").await.unwrap();
        bot.clear_history();
        bot.ask("second").await.unwrap();

        let sessions: Vec<Value> = transport
            .requests_to("legal-ai/query")
            .iter()
            .map(|r| {
                let body: Value = serde_json::from_slice(&r.body().to_bytes()).unwrap();
                body["session_id"].clone()
            })
            .collect();
        assert_ne!(sessions[0], sessions[1]);
        assert_eq!(bot.ctx.store().view().chatbot.messages.len(), 2);
    }

    #[tokio::test]
    async fn failure_stops_the_spinner() {
        let (transport, ctx) = signed_in();
        let bot = ChatbotService::new(ctx);
        transport.respond(
            "legal-ai/query",
            HttpResponse::json_body(503, &json!({"detail": "model loading"})),
        );

        let err = bot.ask("hello").await.unwrap_err();

        assert_eq!(err.message, "model loading");
        let view = bot.ctx.store().view();
        assert!(!view.chatbot.is_loading);
        assert_eq!(view.chatbot.error.as_deref(), Some("model loading"));
        assert_eq!(view.toasts[0].title, "Chatbot error");
    }

    #[tokio::test]
    async fn health_is_a_plain_bool() {
        let (transport, ctx) = signed_in();
        let bot = ChatbotService::new(ctx);
        transport.respond(
            "legal-ai/health",
            HttpResponse::json_body(200, &json!({"status": "ok"})),
        );
        transport.fail(
            "legal-ai/health",
            HttpError::ConnectionError {
                host: "api.test".into(),
                message: "refused".into(),
            },
        );

        assert!(bot.health().await);
        assert!(!bot.health().await);
        assert!(bot.ctx.store().view().toasts.is_empty());
    }
}
