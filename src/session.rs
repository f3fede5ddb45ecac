//! Session management for the Telegram client
//!
//! Provides:
//! - File-based session locking so two harvesters never share a session
//! - Client connection over a SQLite-backed grammers session
//! - Interactive phone/code/password authorization

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use grammers_client::client::updates::UpdatesLike;
use grammers_client::{Client, SignInError};
use grammers_mtsender::{SenderPool, SenderPoolHandle};
use grammers_session::storages::SqliteSession;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};

/// Session lock guard that ensures exclusive access to the Telegram session.
pub struct SessionLock {
    path: PathBuf,
    lock_file: Option<File>,
}

impl SessionLock {
    /// Acquire an exclusive lock on the given lock file.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::LockError(format!("Failed to open lock file: {}", e)))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                path,
                lock_file: Some(lock_file),
            }),
            Err(_) => {
                eprintln!(
                    "Telegram session is already in use by another process ({}). \
                     Wait for it to finish and try again.",
                    path.display()
                );
                Err(Error::SessionLocked)
            }
        }
    }

    /// Release the lock manually
    pub fn release(&mut self) {
        if let Some(file) = self.lock_file.take() {
            let _ = file.unlock();
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Open (or create) the session file named by the configuration.
pub fn open_session(config: &Config) -> Result<Arc<SqliteSession>> {
    let session_file = config.session_file();
    let session = SqliteSession::open(&session_file)
        .map_err(|e| Error::SessionNotFound(format!("{}: {}", session_file, e)))?;
    Ok(Arc::new(session))
}

/// Holder for SenderPool components and Client
pub struct TelegramClient {
    pub client: Client,
    pub session: Arc<SqliteSession>,
    pub handle: SenderPoolHandle,
    updates: Option<mpsc::UnboundedReceiver<UpdatesLike>>,
    _runner_handle: tokio::task::JoinHandle<()>,
}

impl TelegramClient {
    /// Connect using the configured session file and API id.
    pub async fn connect(config: &Config) -> Result<Self> {
        if config.api_id == 0 {
            return Err(Error::InvalidArgument(
                "TELEGRAM_API_ID is not configured".into(),
            ));
        }

        let session = open_session(config)?;
        let pool = SenderPool::new(session.clone(), config.api_id);

        // Create client from pool (need reference to whole pool)
        let client = Client::new(&pool);

        let SenderPool {
            runner,
            updates,
            handle,
        } = pool;

        let runner_handle = tokio::spawn(async move {
            runner.run().await;
        });

        Ok(Self {
            client,
            session,
            handle,
            updates: Some(updates),
            _runner_handle: runner_handle,
        })
    }

    /// Take ownership of the updates receiver to build an UpdateStream.
    /// Returns None if updates were already taken.
    pub fn take_updates(&mut self) -> Option<mpsc::UnboundedReceiver<UpdatesLike>> {
        self.updates.take()
    }

    /// Sign in interactively unless the session is already authorized.
    pub async fn authorize(&self, config: &Config) -> Result<()> {
        if self.client.is_authorized().await? {
            info!("Session already authorized");
            return Ok(());
        }

        let phone = if config.phone.is_empty() {
            prompt("Enter phone number: ")?
        } else {
            config.phone.clone()
        };

        let token = self
            .client
            .request_login_code(&phone, &config.api_hash)
            .await
            .map_err(|e| Error::TelegramError(format!("Failed to request code: {}", e)))?;

        let code = prompt("Enter code: ")?;
        let user = match self.client.sign_in(&token, &code).await {
            Ok(user) => user,
            Err(SignInError::PasswordRequired(password_token)) => {
                let hint = password_token.hint().unwrap_or("none").to_string();
                let password = prompt(&format!("Enter password (hint: {}): ", hint))?;
                self.client
                    .check_password(password_token, password.as_bytes())
                    .await
                    .map_err(|e| Error::TelegramError(format!("Failed to sign in: {}", e)))?
            }
            Err(e) => return Err(Error::TelegramError(format!("Failed to sign in: {}", e))),
        };

        info!(
            name = %user.full_name(),
            username = user.username().unwrap_or(""),
            "Signed in"
        );
        Ok(())
    }

    /// Tear down the connection; pending calls fail immediately.
    pub fn shutdown(&self) {
        self.handle.quit();
    }
}

// Implement Deref to allow using TelegramClient as &Client
impl std::ops::Deref for TelegramClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

fn prompt(message: &str) -> Result<String> {
    print!("{}", message);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let line = line.trim().to_string();
    if line.is_empty() {
        return Err(Error::AuthorizationRequired);
    }
    Ok(line)
}
