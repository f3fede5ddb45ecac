//! Live update classification.
//!
//! Updates arrive as loosely-typed `{"@type": ...}` records. [`LiveUpdate::parse`]
//! turns each one into a closed set of shapes; the drain loop forwards any
//! sender identity it finds to the insert-if-new path.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chat::UserId;
use crate::recorder::{Recorded, Source, UserRecorder};

/// Recognized update shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveUpdate {
    UserStatus { user_id: UserId },
    NewMessage { sender_user_id: UserId },
    ChatLastMessage { sender_user_id: UserId },
    Other,
}

impl LiveUpdate {
    /// Parse a record. `None` means the record has no usable type tag or a
    /// recognized tag with a malformed body.
    pub fn parse(record: &Value) -> Option<Self> {
        let tag = record.get("@type")?.as_str()?;
        match tag {
            "updateUserStatus" => user_id_field(record, "user_id")
                .map(|user_id| LiveUpdate::UserStatus { user_id }),
            "updateNewMessage" => message_sender(record)
                .map(|sender_user_id| LiveUpdate::NewMessage { sender_user_id }),
            "updateChatLastMessage" => message_sender(record)
                .map(|sender_user_id| LiveUpdate::ChatLastMessage { sender_user_id }),
            _ => Some(LiveUpdate::Other),
        }
    }

    /// Identity carried by the update, if any.
    pub fn sender(&self) -> Option<UserId> {
        match *self {
            LiveUpdate::UserStatus { user_id } => Some(user_id),
            LiveUpdate::NewMessage { sender_user_id }
            | LiveUpdate::ChatLastMessage { sender_user_id } => Some(sender_user_id),
            LiveUpdate::Other => None,
        }
    }
}

fn message_sender(record: &Value) -> Option<UserId> {
    user_id_field(record.get("content")?, "sender_user_id")
}

fn user_id_field(object: &Value, key: &str) -> Option<UserId> {
    object.get(key)?.as_i64().filter(|id| *id > 0)
}

/// Counters for one drain run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStats {
    pub received: usize,
    pub discarded: usize,
    pub inserted: usize,
    pub known: usize,
    pub failed: usize,
}

/// Drain the update channel until it closes.
pub async fn drain_updates(
    mut rx: mpsc::UnboundedReceiver<Value>,
    recorder: UserRecorder,
) -> UpdateStats {
    let mut stats = UpdateStats::default();

    while let Some(record) = rx.recv().await {
        stats.received += 1;

        let Some(user_id) = LiveUpdate::parse(&record).and_then(|u| u.sender()) else {
            stats.discarded += 1;
            continue;
        };

        match recorder.record(user_id, Source::LiveUpdate).await {
            Ok(Recorded::Inserted) => stats.inserted += 1,
            Ok(Recorded::AlreadyKnown) => {
                debug!(user_id, "Update sender already known");
                stats.known += 1;
            }
            Err(err) => {
                warn!(user_id, "Can't record update sender: {}", err);
                stats.failed += 1;
            }
        }
    }

    info!(
        received = stats.received,
        inserted = stats.inserted,
        "Update stream closed"
    );
    stats
}
