use std::fmt;
use std::sync::{Arc, Weak};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capabilities::{KeyNamespace, KeyValueStore, KvError, KvKey};
use crate::event::Event;
use crate::model::User;
use crate::store::Store;

const CURRENT_SCHEMA_VERSION: u32 = 1;
const MAX_SNAPSHOT_BYTES: usize = 1024 * 1024;
const SNAPSHOT_MAGIC: &[u8; 4] = b"LCSS";
const SESSION_KEY: &str = "root";

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("storage error: {0}")]
    Kv(#[from] KvError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupted snapshot: {reason}")]
    Corrupted { reason: &'static str },

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    #[error("schema version {found} is newer than supported {max}")]
    FutureSchema { found: u32, max: u32 },

    #[error("snapshot too large: {size} bytes, max {max}")]
    TooLarge { size: usize, max: usize },
}

impl From<ciborium::de::Error<std::io::Error>> for PersistError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        PersistError::Serialization(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for PersistError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        PersistError::Serialization(e.to_string())
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct SnapshotEnvelope {
    magic: [u8; 4],
    schema_version: u32,
    checksum: [u8; 32],
    payload: Vec<u8>,
}

/// The persisted part of the session slice.
#[derive(Serialize, Deserialize, Default)]
pub struct SessionSnapshot {
    user: User,
    access_token: Option<String>,
    refresh_token: Option<String>,
    logged_in: bool,
}

impl fmt::Debug for SessionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSnapshot")
            .field("user", &self.user)
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("logged_in", &self.logged_in)
            .finish()
    }
}

impl SessionSnapshot {
    pub fn capture(store: &Store) -> Self {
        store.with_model(|m| {
            let credential = &m.session.credential;
            Self {
                user: m.session.user.clone(),
                access_token: credential.access_token().map(|t| t.expose_secret().clone()),
                refresh_token: credential.refresh_token().map(|t| t.expose_secret().clone()),
                logged_in: credential.logged_in,
            }
        })
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn into_event(self) -> Event {
        Event::SessionRestored {
            user: self.user,
            access: self.access_token.map(SecretString::new),
            refresh: self.refresh_token.map(SecretString::new),
            logged_in: self.logged_in,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PersistError> {
        let mut payload = Vec::new();
        ciborium::into_writer(self, &mut payload)?;

        let checksum = blake3::hash(&payload);
        let envelope = SnapshotEnvelope {
            magic: *SNAPSHOT_MAGIC,
            schema_version: CURRENT_SCHEMA_VERSION,
            checksum: *checksum.as_bytes(),
            payload,
        };

        let mut bytes = Vec::new();
        ciborium::into_writer(&envelope, &mut bytes)?;
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PersistError> {
        if bytes.is_empty() {
            return Err(PersistError::Corrupted {
                reason: "empty snapshot",
            });
        }
        if bytes.len() > MAX_SNAPSHOT_BYTES {
            return Err(PersistError::TooLarge {
                size: bytes.len(),
                max: MAX_SNAPSHOT_BYTES,
            });
        }

        let envelope: SnapshotEnvelope = ciborium::from_reader(bytes)?;

        if envelope.magic != *SNAPSHOT_MAGIC {
            return Err(PersistError::Corrupted {
                reason: "invalid magic bytes",
            });
        }

        if envelope.schema_version > CURRENT_SCHEMA_VERSION {
            return Err(PersistError::FutureSchema {
                found: envelope.schema_version,
                max: CURRENT_SCHEMA_VERSION,
            });
        }

        let actual = blake3::hash(&envelope.payload);
        if actual.as_bytes() != &envelope.checksum {
            return Err(PersistError::IntegrityCheckFailed {
                expected: hex::encode(envelope.checksum),
                actual: hex::encode(actual.as_bytes()),
            });
        }

        Ok(ciborium::from_reader(&envelope.payload[..])?)
    }
}

fn session_key() -> Result<KvKey, KvError> {
    KvKey::new(KeyNamespace::Session, SESSION_KEY)
}

pub async fn save_session(kv: &dyn KeyValueStore, store: &Store) -> Result<(), PersistError> {
    let bytes = SessionSnapshot::capture(store).encode()?;
    let version = kv.set(&session_key()?, bytes).await?;
    debug!(version, "session snapshot saved");
    Ok(())
}

/// Restores the session slice at launch. A missing snapshot leaves a fresh
/// signed-out session and is not an error.
pub async fn rehydrate(kv: &dyn KeyValueStore, store: &Store) -> Result<bool, PersistError> {
    let Some(value) = kv.get(&session_key()?).await? else {
        debug!("no session snapshot, starting signed out");
        return Ok(false);
    };

    let snapshot = SessionSnapshot::decode(value.data())?;
    info!(logged_in = snapshot.logged_in(), "session rehydrated");
    store.dispatch(snapshot.into_event());
    Ok(true)
}

pub async fn forget_session(kv: &dyn KeyValueStore) -> Result<(), PersistError> {
    kv.delete(&session_key()?).await?;
    Ok(())
}

/// Saves the session snapshot after every session-affecting dispatch until
/// the store is dropped.
pub fn spawn_autosave(kv: Arc<dyn KeyValueStore>, store: &Arc<Store>) -> JoinHandle<()> {
    let mut changes = store.subscribe_session();
    let store: Weak<Store> = Arc::downgrade(store);

    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let Some(store) = store.upgrade() else {
                break;
            };
            if let Err(e) = save_session(kv.as_ref(), &store).await {
                warn!(error = %e, "failed to persist session");
            }
        }
    })
}
