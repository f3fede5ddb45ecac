//! Identity store: the one entity this tool owns
//!
//! A user identity is created once, on first observation, and never updated.
//! Uniqueness of `user_id` is enforced by the storage layer; `create` reports
//! a violated constraint as [`CreateOutcome::Duplicate`] instead of failing,
//! so concurrent producers racing on the same id stay correct.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mysql_async::{params, prelude::Queryable, Opts, OptsBuilder, Pool};
use tracing::info;

use crate::chat::UserId;
use crate::error::{Error, Result};

/// MySQL duplicate-entry error code (ER_DUP_ENTRY).
const ER_DUP_ENTRY: u16 = 1062;

/// Result of an attempted insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The identifier was already present.
    Duplicate,
}

/// Persistence for user identities.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Create the schema if it does not exist yet.
    async fn migrate(&self) -> Result<()>;

    async fn exists(&self, user_id: UserId) -> Result<bool>;

    async fn create(&self, user_id: UserId, user_name: &str) -> Result<CreateOutcome>;
}

/// Supported storage drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreDriver {
    Mysql,
    Memory,
}

impl FromStr for StoreDriver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mysql" => Ok(StoreDriver::Mysql),
            "memory" | "mem" => Ok(StoreDriver::Memory),
            other => Err(Error::InvalidArgument(format!(
                "unsupported database driver: {other} (expected mysql or memory)"
            ))),
        }
    }
}

/// Open the store for `driver` and apply the schema.
pub async fn open_store(driver: &str, connection: &str) -> Result<Arc<dyn IdentityStore>> {
    let store: Arc<dyn IdentityStore> = match driver.parse::<StoreDriver>()? {
        StoreDriver::Mysql => Arc::new(MySqlStore::connect(connection)?),
        StoreDriver::Memory => Arc::new(MemoryStore::new()),
    };
    store.migrate().await?;
    info!(driver, "Identity store ready");
    Ok(store)
}

/// Stored identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub user_id: UserId,
    pub user_name: String,
}

/// Process-local store, used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<UserId, IdentityRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, user_id: UserId) -> Option<IdentityRecord> {
        self.lock().get(&user_id).cloned()
    }

    /// Stored identifiers in ascending order.
    pub fn user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, IdentityRecord>> {
        // A poisoned map is still consistent: every write is a single insert.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn migrate(&self) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, user_id: UserId) -> Result<bool> {
        Ok(self.lock().contains_key(&user_id))
    }

    async fn create(&self, user_id: UserId, user_name: &str) -> Result<CreateOutcome> {
        use std::collections::hash_map::Entry;

        match self.lock().entry(user_id) {
            Entry::Occupied(_) => Ok(CreateOutcome::Duplicate),
            Entry::Vacant(slot) => {
                slot.insert(IdentityRecord {
                    user_id,
                    user_name: user_name.to_string(),
                });
                Ok(CreateOutcome::Created)
            }
        }
    }
}

/// MySQL-backed store (`tg_users` table).
pub struct MySqlStore {
    pool: Pool,
}

impl MySqlStore {
    /// Connect using a `mysql://` URL, or the `MYSQL_*` environment when empty.
    pub fn connect(connection: &str) -> Result<Self> {
        let pool = if connection.trim().is_empty() {
            mysql_pool_from_env()?
        } else {
            let opts = Opts::from_url(connection)
                .map_err(|e| Error::InvalidArgument(format!("Invalid MySQL URL: {}", e)))?;
            Pool::new(opts)
        };
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<mysql_async::Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| Error::ConnectionError(e.to_string()))
    }
}

#[async_trait]
impl IdentityStore for MySqlStore {
    async fn migrate(&self) -> Result<()> {
        const SQL: &str = r#"
            CREATE TABLE IF NOT EXISTS tg_users (
                id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                deleted_at DATETIME NULL,
                user_id BIGINT NOT NULL,
                user_name VARCHAR(255),
                UNIQUE KEY idx_tg_users_user_id (user_id),
                KEY idx_tg_users_deleted_at (deleted_at)
            ) DEFAULT CHARSET = utf8mb4
        "#;

        let mut conn = self.conn().await?;
        conn.query_drop(SQL).await?;
        Ok(())
    }

    async fn exists(&self, user_id: UserId) -> Result<bool> {
        let mut conn = self.conn().await?;
        let found: Option<u8> = conn
            .exec_first(
                "SELECT 1 FROM tg_users WHERE user_id = :user_id AND deleted_at IS NULL LIMIT 1",
                params! { "user_id" => user_id },
            )
            .await?;
        Ok(found.is_some())
    }

    async fn create(&self, user_id: UserId, user_name: &str) -> Result<CreateOutcome> {
        let mut conn = self.conn().await?;
        let result = conn
            .exec_drop(
                "INSERT INTO tg_users (user_id, user_name) VALUES (:user_id, :user_name)",
                params! {
                    "user_id" => user_id,
                    "user_name" => user_name,
                },
            )
            .await;

        match result {
            Ok(()) => Ok(CreateOutcome::Created),
            Err(mysql_async::Error::Server(ref err)) if err.code == ER_DUP_ENTRY => {
                Ok(CreateOutcome::Duplicate)
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn mysql_pool_from_env() -> Result<Pool> {
    let host = std::env::var("MYSQL_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port: u16 = std::env::var("MYSQL_PORT")
        .unwrap_or_else(|_| "3306".to_string())
        .parse()
        .map_err(|e| Error::ConnectionError(format!("Invalid MYSQL_PORT: {}", e)))?;
    let database =
        std::env::var("MYSQL_DATABASE").unwrap_or_else(|_| "telegram_harvester".to_string());
    let user = std::env::var("MYSQL_USER").unwrap_or_else(|_| "telegram_harvester".to_string());
    let password = std::env::var("MYSQL_PASSWORD").unwrap_or_default();

    let opts = OptsBuilder::default()
        .ip_or_hostname(host)
        .tcp_port(port)
        .db_name(Some(database))
        .user(Some(user))
        .pass(Some(password));

    Ok(Pool::new(opts))
}
