//! Chat domain types and the messaging backend seam
//!
//! Everything the discovery pipeline knows about Telegram goes through
//! [`ChatBackend`]. The grammers implementation lives in [`crate::client`];
//! tests drive the pipeline with scripted in-memory backends.

use async_trait::async_trait;

use crate::error::Result;

/// Marked chat identifier (users positive, groups and channels negative).
pub type ChatId = i64;

/// Numeric Telegram user identifier.
pub type UserId = i64;

/// Offset applied to channel ids in the marked form, like the Bot API does.
const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

/// Marked chat id for a basic group.
pub fn basic_group_chat_id(group_id: i64) -> ChatId {
    -group_id
}

/// Marked chat id for a supergroup or broadcast channel.
pub fn supergroup_chat_id(supergroup_id: i64) -> ChatId {
    -CHANNEL_ID_OFFSET - supergroup_id
}

/// Type tag of a chat as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    /// One-to-one conversation with a user or bot.
    Private { user_id: UserId },
    /// Small group with a full, unpaged member list.
    BasicGroup { group_id: i64 },
    /// Megagroup or broadcast channel with paged membership APIs.
    Supergroup { supergroup_id: i64 },
}

/// A chat visible to the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub title: String,
    pub kind: ChatKind,
    /// Opaque pagination key; non-increasing along the chat list.
    pub order: i64,
}

/// Position in the chat list from which the next page is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatCursor {
    pub order: i64,
    pub chat_id: ChatId,
}

impl ChatCursor {
    /// Cursor before the first chat of the list.
    pub const START: ChatCursor = ChatCursor {
        order: i64::MAX,
        chat_id: 0,
    };

    /// Cursor positioned right after `chat`.
    pub fn after(chat: &Chat) -> Self {
        Self {
            order: chat.order,
            chat_id: chat.id,
        }
    }

    pub fn is_start(&self) -> bool {
        *self == Self::START
    }
}

/// Summary record of a supergroup or channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Supergroup {
    pub id: i64,
    pub username: Option<String>,
    pub member_count: i32,
    /// Broadcast channel rather than a megagroup.
    pub is_channel: bool,
}

/// Full-info record of a supergroup or channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupergroupFullInfo {
    pub member_count: i32,
    pub can_get_members: bool,
}

/// One window of members returned by a listing or search call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberPage {
    /// Total members the backend claims for the query.
    pub total_count: i32,
    pub members: Vec<UserId>,
}

impl MemberPage {
    /// A window with nothing to record.
    pub fn is_empty(&self) -> bool {
        self.total_count == 0 || self.members.is_empty()
    }
}

/// User profile used to name a new identity record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl UserProfile {
    /// Username when set, otherwise the full name.
    pub fn display_name(&self) -> String {
        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            return username.to_string();
        }

        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Messaging client operations consumed by the discovery pipeline.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Fetch up to `limit` chat identifiers following `cursor`, in list order.
    /// An empty page means the chat list is exhausted.
    async fn chat_page(&self, cursor: ChatCursor, limit: usize) -> Result<Vec<ChatId>>;

    /// Resolve a chat identifier to its record.
    async fn chat(&self, chat_id: ChatId) -> Result<Chat>;

    async fn supergroup(&self, supergroup_id: i64) -> Result<Supergroup>;

    async fn supergroup_full_info(&self, supergroup_id: i64) -> Result<SupergroupFullInfo>;

    /// Complete member list of a basic group.
    async fn basic_group_members(&self, group_id: i64) -> Result<Vec<UserId>>;

    /// Recent-members listing of a supergroup by numeric offset.
    async fn supergroup_members(
        &self,
        supergroup_id: i64,
        offset: i32,
        limit: i32,
    ) -> Result<MemberPage>;

    /// Member search in a supergroup or channel by text filter.
    async fn search_chat_members(
        &self,
        chat_id: ChatId,
        query: &str,
        limit: i32,
    ) -> Result<MemberPage>;

    async fn user(&self, user_id: UserId) -> Result<UserProfile>;
}
