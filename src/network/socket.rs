//! Chat WebSocket plumbing.
//!
//! The shell owns the socket itself. This side decides the URL, tracks
//! whether a connection is already up, and turns incoming text frames into
//! typed events.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::EnvConfig;
use crate::event::Event;
use crate::model::Message;
use crate::store::Store;

const SOCKET_PATH: &str = "chat/ws";
const EVENT_CAPACITY: usize = 64;

/// `https://host/` becomes `wss://host/chat/ws?token=...`.
pub fn chat_socket_url(base: &Url, token: &str) -> Url {
    let mut url = base.clone();
    let scheme = match base.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    // http(s) -> ws(s) is a special-to-special scheme change, which url allows.
    let _ = url.set_scheme(scheme);
    if let Ok(joined) = url.join(SOCKET_PATH) {
        url = joined;
    }
    url.query_pairs_mut().clear().append_pair("token", token);
    url
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChatEvent {
    Message(Message),
    Receipt(Value),
    Presence(Value),
    #[serde(skip)]
    Other { kind: String, data: Value },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
}

impl ChatEvent {
    /// Parses one text frame. Frames that are not JSON, have no `type`, or
    /// carry a message that does not decode yield `None`.
    pub fn parse(frame: &str) -> Option<Self> {
        let raw: RawFrame = serde_json::from_str(frame).ok()?;
        let kind = raw.kind?;
        match kind.as_str() {
            "message" => serde_json::from_value(raw.data).ok().map(ChatEvent::Message),
            "receipt" => Some(ChatEvent::Receipt(raw.data)),
            "presence" => Some(ChatEvent::Presence(raw.data)),
            _ => Some(ChatEvent::Other {
                kind,
                data: raw.data,
            }),
        }
    }
}

fn bare_token(token: &str) -> &str {
    let token = token.trim();
    match token.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim_start(),
        _ => token,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting { url: Url },
    Open { url: Url },
}

/// What the shell should do after [`ChatChannel::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectAction {
    Connect { url: Url },
    AlreadyOpen,
}

pub struct ChatChannel {
    store: Arc<Store>,
    config: Arc<EnvConfig>,
    state: Mutex<ConnectionState>,
    events: broadcast::Sender<ChatEvent>,
}

impl std::fmt::Debug for ChatChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatChannel")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl ChatChannel {
    pub fn new(store: Arc<Store>, config: Arc<EnvConfig>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            config,
            state: Mutex::new(ConnectionState::Idle),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state().clone()
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state(), ConnectionState::Open { .. })
    }

    /// Asks for a connection. While one is connecting or open the existing
    /// one is reused. `token` may carry its `Bearer ` scheme; the socket
    /// wants the bare token.
    pub fn connect(&self, token: &str) -> ConnectAction {
        let mut state = self.state();
        match &*state {
            ConnectionState::Connecting { .. } | ConnectionState::Open { .. } => {
                debug!("chat socket already up, reusing");
                ConnectAction::AlreadyOpen
            }
            ConnectionState::Idle => {
                let url = self.config.chat_socket_url(bare_token(token));
                *state = ConnectionState::Connecting { url: url.clone() };
                info!(host = url.host_str().unwrap_or_default(), "connecting chat socket");
                ConnectAction::Connect { url }
            }
        }
    }

    pub fn opened(&self) {
        let mut state = self.state();
        if let ConnectionState::Connecting { url } = &*state {
            *state = ConnectionState::Open { url: url.clone() };
        }
    }

    pub fn closed(&self) {
        *self.state() = ConnectionState::Idle;
        debug!("chat socket closed");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Handles one text frame from the shell.
    pub fn handle_frame(&self, frame: &str) -> Option<ChatEvent> {
        let Some(event) = ChatEvent::parse(frame) else {
            warn!(len = frame.len(), "ignoring unparseable chat frame");
            return None;
        };

        if let ChatEvent::Message(message) = &event {
            self.store.dispatch(Event::MessageReceived(message.clone()));
        }
        // No subscribers is fine.
        let _ = self.events.send(event.clone());
        Some(event)
    }
}
