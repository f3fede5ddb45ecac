//! Scripted in-memory backend for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::chat::{
    basic_group_chat_id, supergroup_chat_id, Chat, ChatBackend, ChatCursor, ChatId, ChatKind,
    MemberPage, Supergroup, SupergroupFullInfo, UserId, UserProfile,
};
use crate::error::{Error, Result};

/// Backend call, recorded in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    ChatPage { cursor: ChatCursor, limit: usize },
    Chat(ChatId),
    Supergroup(i64),
    FullInfo(i64),
    BasicMembers(i64),
    Paged { supergroup_id: i64, offset: i32 },
    Search { chat_id: ChatId, query: String },
    User(UserId),
}

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    /// Chat list in backend order.
    pub chats: Vec<Chat>,
    /// Largest page the backend hands out regardless of the requested limit.
    pub max_page: Option<usize>,
    pub supergroups: HashMap<i64, (Supergroup, SupergroupFullInfo)>,
    pub supergroup_members: HashMap<i64, Vec<UserId>>,
    /// Plain listing stops returning members past this many.
    pub listing_cap: Option<usize>,
    pub basic_groups: HashMap<i64, Vec<UserId>>,
    pub users: HashMap<UserId, UserProfile>,
    pub failing_chats: HashSet<ChatId>,
    pub failing_full_info: HashSet<i64>,
    pub failing_pages: HashSet<i32>,
    pub failing_queries: HashSet<String>,
    pub calls: Mutex<Vec<Call>>,
}

impl ScriptedBackend {
    pub fn add_user(&mut self, user_id: UserId, username: Option<&str>) {
        self.users.insert(
            user_id,
            UserProfile {
                id: user_id,
                username: username.map(String::from),
                first_name: Some(format!("User {user_id}")),
                last_name: None,
            },
        );
    }

    /// Users named so that every search seed finds a share of them.
    pub fn add_named_users(&mut self, ids: &[UserId]) {
        const SEEDS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
        for id in ids {
            let seed = SEEDS[(*id as usize) % SEEDS.len()] as char;
            self.add_user(*id, Some(&format!("{seed}user{id}")));
        }
    }

    pub fn add_private_chat(&mut self, user_id: UserId) {
        let order = self.next_order();
        self.chats.push(Chat {
            id: user_id,
            title: format!("User {user_id}"),
            kind: ChatKind::Private { user_id },
            order,
        });
    }

    pub fn add_basic_group(&mut self, group_id: i64, title: &str, members: Vec<UserId>) {
        let order = self.next_order();
        self.chats.push(Chat {
            id: basic_group_chat_id(group_id),
            title: title.to_string(),
            kind: ChatKind::BasicGroup { group_id },
            order,
        });
        self.add_named_users(&members);
        self.basic_groups.insert(group_id, members);
    }

    pub fn add_supergroup(
        &mut self,
        supergroup_id: i64,
        title: &str,
        is_channel: bool,
        member_count: i32,
        can_get_members: bool,
        members: Vec<UserId>,
    ) {
        let order = self.next_order();
        self.chats.push(Chat {
            id: supergroup_chat_id(supergroup_id),
            title: title.to_string(),
            kind: ChatKind::Supergroup { supergroup_id },
            order,
        });
        self.supergroups.insert(
            supergroup_id,
            (
                Supergroup {
                    id: supergroup_id,
                    username: None,
                    member_count,
                    is_channel,
                },
                SupergroupFullInfo {
                    member_count,
                    can_get_members,
                },
            ),
        );
        self.add_named_users(&members);
        self.supergroup_members.insert(supergroup_id, members);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn member_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    Call::Paged { .. } | Call::Search { .. } | Call::BasicMembers(_)
                )
            })
            .collect()
    }

    fn next_order(&self) -> i64 {
        1_000_000 - (self.chats.len() as i64) * 10
    }

    fn log(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn name_of(&self, user_id: UserId) -> String {
        self.users
            .get(&user_id)
            .map(|p| p.display_name().to_lowercase())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn chat_page(&self, cursor: ChatCursor, limit: usize) -> Result<Vec<ChatId>> {
        self.log(Call::ChatPage { cursor, limit });

        let start = if cursor.is_start() {
            0
        } else {
            self.chats
                .iter()
                .position(|chat| chat.id == cursor.chat_id)
                .map(|index| index + 1)
                .ok_or(Error::ChatNotFound(cursor.chat_id))?
        };
        let size = self.max_page.map_or(limit, |max| max.min(limit));

        Ok(self
            .chats
            .iter()
            .skip(start)
            .take(size)
            .map(|chat| chat.id)
            .collect())
    }

    async fn chat(&self, chat_id: ChatId) -> Result<Chat> {
        self.log(Call::Chat(chat_id));
        if self.failing_chats.contains(&chat_id) {
            return Err(Error::TelegramError(format!("CHANNEL_PRIVATE {chat_id}")));
        }
        self.chats
            .iter()
            .find(|chat| chat.id == chat_id)
            .cloned()
            .ok_or(Error::ChatNotFound(chat_id))
    }

    async fn supergroup(&self, supergroup_id: i64) -> Result<Supergroup> {
        self.log(Call::Supergroup(supergroup_id));
        self.supergroups
            .get(&supergroup_id)
            .map(|(summary, _)| summary.clone())
            .ok_or(Error::ChatNotFound(supergroup_chat_id(supergroup_id)))
    }

    async fn supergroup_full_info(&self, supergroup_id: i64) -> Result<SupergroupFullInfo> {
        self.log(Call::FullInfo(supergroup_id));
        if self.failing_full_info.contains(&supergroup_id) {
            return Err(Error::TelegramError("CHAT_ADMIN_REQUIRED".into()));
        }
        self.supergroups
            .get(&supergroup_id)
            .map(|(_, full)| *full)
            .ok_or(Error::ChatNotFound(supergroup_chat_id(supergroup_id)))
    }

    async fn basic_group_members(&self, group_id: i64) -> Result<Vec<UserId>> {
        self.log(Call::BasicMembers(group_id));
        self.basic_groups
            .get(&group_id)
            .cloned()
            .ok_or(Error::ChatNotFound(basic_group_chat_id(group_id)))
    }

    async fn supergroup_members(
        &self,
        supergroup_id: i64,
        offset: i32,
        limit: i32,
    ) -> Result<MemberPage> {
        self.log(Call::Paged {
            supergroup_id,
            offset,
        });
        if self.failing_pages.contains(&offset) {
            return Err(Error::TelegramError("FLOOD_WAIT_5".into()));
        }

        let members = self
            .supergroup_members
            .get(&supergroup_id)
            .ok_or(Error::ChatNotFound(supergroup_chat_id(supergroup_id)))?;
        let visible = self.listing_cap.map_or(members.len(), |cap| cap.min(members.len()));

        Ok(MemberPage {
            total_count: members.len() as i32,
            members: members[..visible]
                .iter()
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .copied()
                .collect(),
        })
    }

    async fn search_chat_members(
        &self,
        chat_id: ChatId,
        query: &str,
        limit: i32,
    ) -> Result<MemberPage> {
        self.log(Call::Search {
            chat_id,
            query: query.to_string(),
        });
        if self.failing_queries.contains(query) {
            return Err(Error::TelegramError("FLOOD_WAIT_5".into()));
        }

        let members = self
            .supergroup_members
            .iter()
            .find(|(id, _)| supergroup_chat_id(**id) == chat_id)
            .map(|(_, members)| members)
            .ok_or(Error::ChatNotFound(chat_id))?;
        let matched: Vec<UserId> = members
            .iter()
            .filter(|id| self.name_of(**id).starts_with(query))
            .copied()
            .collect();

        Ok(MemberPage {
            total_count: matched.len() as i32,
            members: matched.into_iter().take(limit.max(0) as usize).collect(),
        })
    }

    async fn user(&self, user_id: UserId) -> Result<UserProfile> {
        self.log(Call::User(user_id));
        self.users
            .get(&user_id)
            .cloned()
            .ok_or(Error::UserNotFound(user_id))
    }
}
