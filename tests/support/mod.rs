//! In-memory Telegram account used by the integration tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use telegram_harvester::chat::{
    basic_group_chat_id, supergroup_chat_id, Chat, ChatBackend, ChatCursor, ChatId, ChatKind,
    MemberPage, Supergroup, SupergroupFullInfo, UserId, UserProfile,
};
use telegram_harvester::{Error, Result};

/// Members the plain listing returns before it stops, like the real API.
pub const LISTING_CAP: usize = 200;

#[derive(Default)]
pub struct FakeTelegram {
    chats: Vec<Chat>,
    supergroups: HashMap<i64, (Supergroup, SupergroupFullInfo, Vec<UserId>)>,
    basic_groups: HashMap<i64, Vec<UserId>>,
    users: HashMap<UserId, UserProfile>,
    pub page_limit: usize,
    pub queries: Mutex<Vec<String>>,
    pub offsets: Mutex<Vec<(i64, i32)>>,
}

impl FakeTelegram {
    pub fn new() -> Self {
        Self {
            page_limit: 10,
            ..Default::default()
        }
    }

    pub fn user(&mut self, id: UserId) {
        // Spread names over the alphabet so every search seed finds someone.
        let seed = b"abcdefghijklmnopqrstuvwxyz0123456789"[(id as usize) % 36] as char;
        self.users.insert(
            id,
            UserProfile {
                id,
                username: Some(format!("{seed}{id}")),
                first_name: None,
                last_name: None,
            },
        );
    }

    pub fn private(&mut self, user_id: UserId) {
        self.user(user_id);
        self.push(user_id, format!("dm {user_id}"), ChatKind::Private { user_id });
    }

    pub fn basic_group(&mut self, group_id: i64, title: &str, members: Vec<UserId>) {
        members.iter().for_each(|id| self.user(*id));
        self.basic_groups.insert(group_id, members);
        self.push(
            basic_group_chat_id(group_id),
            title.to_string(),
            ChatKind::BasicGroup { group_id },
        );
    }

    pub fn supergroup(
        &mut self,
        id: i64,
        title: &str,
        is_channel: bool,
        member_count: i32,
        members: Vec<UserId>,
    ) {
        members.iter().for_each(|m| self.user(*m));
        self.supergroups.insert(
            id,
            (
                Supergroup {
                    id,
                    username: None,
                    member_count,
                    is_channel,
                },
                SupergroupFullInfo {
                    member_count,
                    can_get_members: true,
                },
                members,
            ),
        );
        self.push(
            supergroup_chat_id(id),
            title.to_string(),
            ChatKind::Supergroup { supergroup_id: id },
        );
    }

    pub fn hide_members(&mut self, id: i64) {
        if let Some((_, full, _)) = self.supergroups.get_mut(&id) {
            full.can_get_members = false;
        }
    }

    fn push(&mut self, id: ChatId, title: String, kind: ChatKind) {
        let order = 1_000 - self.chats.len() as i64;
        self.chats.push(Chat {
            id,
            title,
            kind,
            order,
        });
    }

    fn members_of(&self, chat_id: ChatId) -> Result<&Vec<UserId>> {
        self.supergroups
            .iter()
            .find(|(id, _)| supergroup_chat_id(**id) == chat_id)
            .map(|(_, (_, _, members))| members)
            .ok_or(Error::ChatNotFound(chat_id))
    }
}

#[async_trait]
impl ChatBackend for FakeTelegram {
    async fn chat_page(&self, cursor: ChatCursor, limit: usize) -> Result<Vec<ChatId>> {
        Ok(self
            .chats
            .iter()
            .filter(|chat| cursor.is_start() || chat.order < cursor.order)
            .take(limit.min(self.page_limit))
            .map(|chat| chat.id)
            .collect())
    }

    async fn chat(&self, chat_id: ChatId) -> Result<Chat> {
        self.chats
            .iter()
            .find(|chat| chat.id == chat_id)
            .cloned()
            .ok_or(Error::ChatNotFound(chat_id))
    }

    async fn supergroup(&self, id: i64) -> Result<Supergroup> {
        self.supergroups
            .get(&id)
            .map(|(summary, _, _)| summary.clone())
            .ok_or(Error::ChatNotFound(supergroup_chat_id(id)))
    }

    async fn supergroup_full_info(&self, id: i64) -> Result<SupergroupFullInfo> {
        self.supergroups
            .get(&id)
            .map(|(_, full, _)| *full)
            .ok_or(Error::ChatNotFound(supergroup_chat_id(id)))
    }

    async fn basic_group_members(&self, group_id: i64) -> Result<Vec<UserId>> {
        self.basic_groups
            .get(&group_id)
            .cloned()
            .ok_or(Error::ChatNotFound(basic_group_chat_id(group_id)))
    }

    async fn supergroup_members(&self, id: i64, offset: i32, limit: i32) -> Result<MemberPage> {
        self.offsets.lock().unwrap().push((id, offset));
        let members = self.members_of(supergroup_chat_id(id))?;
        let visible = &members[..members.len().min(LISTING_CAP)];
        Ok(MemberPage {
            total_count: members.len() as i32,
            members: visible
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
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
        self.queries.lock().unwrap().push(query.to_string());
        let found: Vec<UserId> = self
            .members_of(chat_id)?
            .iter()
            .filter(|id| {
                self.users
                    .get(id)
                    .is_some_and(|user| user.display_name().starts_with(query))
            })
            .copied()
            .collect();
        Ok(MemberPage {
            total_count: found.len() as i32,
            members: found.into_iter().take(limit as usize).collect(),
        })
    }

    async fn user(&self, user_id: UserId) -> Result<UserProfile> {
        self.users
            .get(&user_id)
            .cloned()
            .ok_or(Error::UserNotFound(user_id))
    }
}
