use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::get_current_time_ms;

pub const MAX_KEY_LENGTH: usize = 512;
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;
pub const MAX_PREFIX_LENGTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvKey {
    namespace: KeyNamespace,
    key: String,
}

impl KvKey {
    pub fn new(namespace: KeyNamespace, key: impl Into<String>) -> Result<Self, KvError> {
        let key = key.into();
        Self::validate_key(&key)?;
        Ok(Self { namespace, key })
    }

    pub fn raw(&self) -> String {
        format!("{}:{}", self.namespace.prefix(), self.key)
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn validate_key(key: &str) -> Result<(), KvError> {
        if key.trim().is_empty() {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot be empty".to_string(),
            });
        }

        if key.len() > MAX_KEY_LENGTH {
            return Err(KvError::InvalidKey {
                key: key.chars().take(50).collect::<String>() + "...",
                reason: format!("key exceeds maximum length of {} bytes", MAX_KEY_LENGTH),
            });
        }

        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot contain path traversal sequences".to_string(),
            });
        }

        if key.chars().any(|c| c.is_control() && c != '\t') {
            return Err(KvError::InvalidKey {
                key: key.escape_default().to_string(),
                reason: "key contains invalid control characters".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyNamespace {
    Session,
    Cache,
    Settings,
    Custom(String),
}

impl KeyNamespace {
    pub fn prefix(&self) -> &str {
        match self {
            KeyNamespace::Session => "session",
            KeyNamespace::Cache => "cache",
            KeyNamespace::Settings => "settings",
            KeyNamespace::Custom(s) => s.as_str(),
        }
    }

    pub fn custom(prefix: impl Into<String>) -> Result<Self, KvError> {
        let prefix = prefix.into();
        if prefix.is_empty() || prefix.len() > MAX_PREFIX_LENGTH {
            return Err(KvError::InvalidKey {
                key: prefix,
                reason: format!("custom namespace must be 1..={} bytes", MAX_PREFIX_LENGTH),
            });
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(KvError::InvalidKey {
                key: prefix,
                reason: "custom namespace contains invalid characters".to_string(),
            });
        }
        Ok(KeyNamespace::Custom(prefix))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvValue {
    data: Vec<u8>,
    version: u64,
    created_at: u64,
    updated_at: u64,
}

impl KvValue {
    pub fn new(data: Vec<u8>, now_ms: u64) -> Result<Self, KvError> {
        check_size(&data)?;
        Ok(Self {
            data,
            version: 1,
            created_at: now_ms,
            updated_at: now_ms,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }

    pub fn update_data(&mut self, data: Vec<u8>, now_ms: u64) -> Result<(), KvError> {
        check_size(&data)?;
        self.data = data;
        self.version = self.version.saturating_add(1);
        self.updated_at = now_ms;
        Ok(())
    }
}

fn check_size(data: &[u8]) -> Result<(), KvError> {
    if data.len() > MAX_VALUE_SIZE {
        return Err(KvError::ValueTooLarge {
            size: data.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage error: {message} (code: {code:?}, retryable: {retryable})")]
    Storage {
        code: StorageErrorCode,
        message: String,
        retryable: bool,
    },
}

impl KvError {
    pub fn is_retryable(&self) -> bool {
        match self {
            KvError::Storage { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn storage(code: StorageErrorCode, message: impl Into<String>) -> Self {
        let retryable = code.is_retryable();
        Self::Storage {
            code,
            message: message.into(),
            retryable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageErrorCode {
    Unknown,
    ConnectionFailed,
    Corrupted,
    DiskFull,
    PermissionDenied,
    Busy,
    Locked,
    IoError,
}

impl StorageErrorCode {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageErrorCode::ConnectionFailed | StorageErrorCode::Busy | StorageErrorCode::Locked
        )
    }
}

/// Namespaced byte storage backing persisted slices and caches.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &KvKey) -> Result<Option<KvValue>, KvError>;
    /// Writes `data` and returns the new version.
    async fn set(&self, key: &KvKey, data: Vec<u8>) -> Result<u64, KvError>;
    /// Returns whether the key existed.
    async fn delete(&self, key: &KvKey) -> Result<bool, KvError>;

    async fn exists(&self, key: &KvKey) -> Result<bool, KvError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, KvValue>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &KvKey) -> Result<Option<KvValue>, KvError> {
        Ok(self.entries.read().await.get(&key.raw()).cloned())
    }

    async fn set(&self, key: &KvKey, data: Vec<u8>) -> Result<u64, KvError> {
        let now = get_current_time_ms();
        let mut entries = self.entries.write().await;
        match entries.get_mut(&key.raw()) {
            Some(existing) => {
                existing.update_data(data, now)?;
                Ok(existing.version())
            }
            None => {
                let value = KvValue::new(data, now)?;
                entries.insert(key.raw(), value);
                Ok(1)
            }
        }
    }

    async fn delete(&self, key: &KvKey) -> Result<bool, KvError> {
        Ok(self.entries.write().await.remove(&key.raw()).is_some())
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use self::sqlite::SqliteKv;

#[cfg(not(target_arch = "wasm32"))]
mod sqlite {
    use super::*;
    use rusqlite::{params, Connection, OptionalExtension};
    use std::path::Path;
    use std::sync::{Mutex, MutexGuard};

    /// SQLite-backed store for native shells that hand us a file path.
    pub struct SqliteKv {
        conn: Mutex<Connection>,
    }

    impl std::fmt::Debug for SqliteKv {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SqliteKv").finish_non_exhaustive()
        }
    }

    impl SqliteKv {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
            let conn = Connection::open(path).map_err(map_sqlite)?;
            Self::init(conn)
        }

        pub fn open_in_memory() -> Result<Self, KvError> {
            let conn = Connection::open_in_memory().map_err(map_sqlite)?;
            Self::init(conn)
        }

        fn init(conn: Connection) -> Result<Self, KvError> {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS kv_entries (
                    key TEXT PRIMARY KEY,
                    data BLOB NOT NULL,
                    version INTEGER NOT NULL DEFAULT 1,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                "#,
            )
            .map_err(map_sqlite)?;
            Ok(Self {
                conn: Mutex::new(conn),
            })
        }

        fn conn(&self) -> MutexGuard<'_, Connection> {
            self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }
    }

    #[async_trait::async_trait]
    impl KeyValueStore for SqliteKv {
        async fn get(&self, key: &KvKey) -> Result<Option<KvValue>, KvError> {
            let conn = self.conn();
            conn.query_row(
                "SELECT data, version, created_at, updated_at FROM kv_entries WHERE key = ?1",
                params![key.raw()],
                |row| {
                    Ok(KvValue {
                        data: row.get(0)?,
                        version: row.get::<_, i64>(1)? as u64,
                        created_at: row.get::<_, i64>(2)? as u64,
                        updated_at: row.get::<_, i64>(3)? as u64,
                    })
                },
            )
            .optional()
            .map_err(map_sqlite)
        }

        async fn set(&self, key: &KvKey, data: Vec<u8>) -> Result<u64, KvError> {
            check_size(&data)?;
            let now = get_current_time_ms() as i64;
            let conn = self.conn();
            conn.execute(
                r#"
                INSERT INTO kv_entries (key, data, version, created_at, updated_at)
                VALUES (?1, ?2, 1, ?3, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    data = excluded.data,
                    version = kv_entries.version + 1,
                    updated_at = excluded.updated_at
                "#,
                params![key.raw(), data, now],
            )
            .map_err(map_sqlite)?;

            let version: i64 = conn
                .query_row(
                    "SELECT version FROM kv_entries WHERE key = ?1",
                    params![key.raw()],
                    |row| row.get(0),
                )
                .map_err(map_sqlite)?;
            Ok(version as u64)
        }

        async fn delete(&self, key: &KvKey) -> Result<bool, KvError> {
            let removed = self
                .conn()
                .execute("DELETE FROM kv_entries WHERE key = ?1", params![key.raw()])
                .map_err(map_sqlite)?;
            Ok(removed > 0)
        }
    }

    fn map_sqlite(err: rusqlite::Error) -> KvError {
        use rusqlite::ErrorCode;

        let code = match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) => StorageErrorCode::Busy,
            Some(ErrorCode::DatabaseLocked) => StorageErrorCode::Locked,
            Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase) => {
                StorageErrorCode::Corrupted
            }
            Some(ErrorCode::DiskFull) => StorageErrorCode::DiskFull,
            Some(ErrorCode::PermissionDenied) | Some(ErrorCode::ReadOnly) => {
                StorageErrorCode::PermissionDenied
            }
            Some(ErrorCode::CannotOpen) => StorageErrorCode::ConnectionFailed,
            Some(ErrorCode::SystemIoFailure) => StorageErrorCode::IoError,
            _ => StorageErrorCode::Unknown,
        };
        KvError::storage(code, err.to_string())
    }
}
