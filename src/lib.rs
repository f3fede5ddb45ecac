//! Telegram Member Harvester Library
//!
//! This library provides tools to:
//! - Walk the account's chat list page by page
//! - Enumerate group and channel members by paging and prefix search
//! - Record newly observed users exactly once in an identity store
//! - Capture users seen in the live update stream

pub mod chat;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod recorder;
pub mod session;
pub mod store;
pub mod updates;

// Re-export common types
pub use chat::{Chat, ChatBackend, ChatCursor, ChatId, ChatKind, UserId};
pub use config::Config;
pub use error::{Error, Result};
pub use recorder::{Recorded, Source, UserRecorder};
pub use session::{SessionLock, TelegramClient};
pub use store::{open_store, IdentityStore, MemoryStore};

// Commands module uses re-exported types, so it must be declared after the re-exports
pub mod commands;
