//! grammers implementation of [`ChatBackend`].
//!
//! All calls go through raw MTProto functions. Peers and users seen in any
//! response are cached with their access hashes so later calls can build
//! input peers from a bare identifier.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use grammers_client::client::updates::UpdatesLike;
use grammers_client::client::UpdatesConfiguration;
use grammers_client::types::peer::Peer;
use grammers_client::types::update::Update;
use grammers_client::Client;
use grammers_session::defs::{PeerAuth, PeerId, PeerInfo};
use grammers_session::Session;
use grammers_tl_types as tl;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::chat::{
    basic_group_chat_id, supergroup_chat_id, Chat, ChatBackend, ChatCursor, ChatId, ChatKind,
    MemberPage, Supergroup, SupergroupFullInfo, UserId, UserProfile,
};
use crate::error::{Error, Result};

/// Largest page `messages.getDialogs` accepts.
const MAX_DIALOG_PAGE: usize = 100;

/// Pack a dialog's top message date and id into a list order key.
pub fn dialog_order(date: i32, top_message: i32) -> i64 {
    ((date as i64) << 32) | (top_message as u32 as i64)
}

/// Split an order key back into `(offset_date, offset_id)`.
pub fn split_order(order: i64) -> (i32, i32) {
    ((order >> 32) as i32, order as u32 as i32)
}

/// Supergroup id behind a marked channel chat id.
fn supergroup_id_of(chat_id: ChatId) -> Option<i64> {
    let id = supergroup_chat_id(0) - chat_id;
    (id > 0).then_some(id)
}

#[derive(Debug, Clone)]
struct ChannelEntry {
    access_hash: i64,
    username: Option<String>,
    participants_count: Option<i32>,
    broadcast: bool,
}

/// Session entry for a user whose access hash is usable outside the
/// response it arrived in.
fn user_peer_info(u: &tl::types::User) -> Option<PeerInfo> {
    if u.min {
        return None;
    }
    let access_hash = u.access_hash?;
    Some(PeerInfo::User {
        id: u.id,
        auth: Some(PeerAuth::from_hash(access_hash)),
        bot: Some(u.bot),
        is_self: Some(u.is_self),
    })
}

#[derive(Default)]
struct PeerCache {
    chats: HashMap<ChatId, Chat>,
    channels: HashMap<i64, ChannelEntry>,
    users: HashMap<UserId, (i64, UserProfile)>,
    /// Persistent peer store shared with the grammers client. User hashes
    /// written here survive restarts.
    session: Option<Arc<dyn Session>>,
}

impl PeerCache {
    fn add_users(&mut self, users: &[tl::enums::User]) {
        for user in users {
            if let tl::enums::User::User(u) = user {
                self.add_user(u);
            }
        }
    }

    fn add_user(&mut self, u: &tl::types::User) {
        let profile = UserProfile {
            id: u.id,
            username: u.username.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
        };
        if let (Some(session), Some(info)) = (&self.session, user_peer_info(u)) {
            session.cache_peer(&info);
        }
        let access_hash = u
            .access_hash
            .or_else(|| self.users.get(&u.id).map(|(hash, _)| *hash))
            .or_else(|| self.stored_access_hash(u.id))
            .unwrap_or(0);
        self.users.insert(u.id, (access_hash, profile));
    }

    /// Access hash the session remembers for a user, from this run or an
    /// earlier one.
    fn stored_access_hash(&self, user_id: UserId) -> Option<i64> {
        match self.session.as_ref()?.peer(PeerId::user(user_id))? {
            PeerInfo::User {
                auth: Some(auth), ..
            } => Some(auth.hash()),
            _ => None,
        }
    }

    fn add_chats(&mut self, chats: &[tl::enums::Chat]) {
        for chat in chats {
            match chat {
                tl::enums::Chat::Channel(c) => {
                    let entry = ChannelEntry {
                        access_hash: c.access_hash.unwrap_or(0),
                        username: c.username.clone(),
                        participants_count: c.participants_count,
                        broadcast: c.broadcast,
                    };
                    self.channels.insert(c.id, entry);
                }
                tl::enums::Chat::ChannelForbidden(c) => {
                    self.channels.insert(
                        c.id,
                        ChannelEntry {
                            access_hash: c.access_hash,
                            username: None,
                            participants_count: None,
                            broadcast: c.broadcast,
                        },
                    );
                }
                _ => {}
            }
        }
    }

    /// Build the chat record for a dialog peer, if its entity is known.
    fn dialog_chat(
        &self,
        peer: &tl::enums::Peer,
        order: i64,
        chats: &[tl::enums::Chat],
    ) -> Option<Chat> {
        match peer {
            tl::enums::Peer::User(p) => {
                let (_, profile) = self.users.get(&p.user_id)?;
                Some(Chat {
                    id: p.user_id,
                    title: profile.display_name(),
                    kind: ChatKind::Private { user_id: p.user_id },
                    order,
                })
            }
            tl::enums::Peer::Chat(p) => {
                let title = chats.iter().find_map(|chat| match chat {
                    tl::enums::Chat::Chat(c) if c.id == p.chat_id => Some(c.title.clone()),
                    tl::enums::Chat::Forbidden(c) if c.id == p.chat_id => Some(c.title.clone()),
                    _ => None,
                })?;
                Some(Chat {
                    id: basic_group_chat_id(p.chat_id),
                    title,
                    kind: ChatKind::BasicGroup { group_id: p.chat_id },
                    order,
                })
            }
            tl::enums::Peer::Channel(p) => {
                let title = chats.iter().find_map(|chat| match chat {
                    tl::enums::Chat::Channel(c) if c.id == p.channel_id => Some(c.title.clone()),
                    tl::enums::Chat::ChannelForbidden(c) if c.id == p.channel_id => {
                        Some(c.title.clone())
                    }
                    _ => None,
                })?;
                Some(Chat {
                    id: supergroup_chat_id(p.channel_id),
                    title,
                    kind: ChatKind::Supergroup {
                        supergroup_id: p.channel_id,
                    },
                    order,
                })
            }
        }
    }

    fn input_peer(&self, chat: &Chat) -> tl::enums::InputPeer {
        match chat.kind {
            ChatKind::Private { user_id } => {
                let access_hash = self.users.get(&user_id).map_or(0, |(hash, _)| *hash);
                tl::enums::InputPeer::User(tl::types::InputPeerUser {
                    user_id,
                    access_hash,
                })
            }
            ChatKind::BasicGroup { group_id } => {
                tl::enums::InputPeer::Chat(tl::types::InputPeerChat { chat_id: group_id })
            }
            ChatKind::Supergroup { supergroup_id } => {
                let access_hash = self
                    .channels
                    .get(&supergroup_id)
                    .map_or(0, |entry| entry.access_hash);
                tl::enums::InputPeer::Channel(tl::types::InputPeerChannel {
                    channel_id: supergroup_id,
                    access_hash,
                })
            }
        }
    }

    fn input_channel(&self, supergroup_id: i64) -> Result<tl::enums::InputChannel> {
        let entry = self
            .channels
            .get(&supergroup_id)
            .ok_or(Error::ChatNotFound(supergroup_chat_id(supergroup_id)))?;
        Ok(tl::enums::InputChannel::Channel(tl::types::InputChannel {
            channel_id: supergroup_id,
            access_hash: entry.access_hash,
        }))
    }
}

fn participant_user_id(participant: &tl::enums::ChannelParticipant) -> Option<UserId> {
    match participant {
        tl::enums::ChannelParticipant::Participant(p) => Some(p.user_id),
        tl::enums::ChannelParticipant::ParticipantSelf(p) => Some(p.user_id),
        tl::enums::ChannelParticipant::Creator(p) => Some(p.user_id),
        tl::enums::ChannelParticipant::Admin(p) => Some(p.user_id),
        tl::enums::ChannelParticipant::Banned(p) => match &p.peer {
            tl::enums::Peer::User(u) => Some(u.user_id),
            _ => None,
        },
        tl::enums::ChannelParticipant::Left(p) => match &p.peer {
            tl::enums::Peer::User(u) => Some(u.user_id),
            _ => None,
        },
    }
}

fn message_date(messages: &[tl::enums::Message], peer: &tl::enums::Peer, id: i32) -> i32 {
    messages
        .iter()
        .find_map(|message| match message {
            tl::enums::Message::Message(m) if m.id == id && &m.peer_id == peer => Some(m.date),
            tl::enums::Message::Service(m) if m.id == id && &m.peer_id == peer => Some(m.date),
            _ => None,
        })
        .unwrap_or(0)
}

/// [`ChatBackend`] backed by a connected grammers client.
pub struct GrammersBackend {
    client: Client,
    cache: Mutex<PeerCache>,
}

impl GrammersBackend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: Mutex::new(PeerCache::default()),
        }
    }

    /// Persist user access hashes into the client session and consult it
    /// for users not seen in this run.
    pub fn with_session(self, session: Arc<dyn Session>) -> Self {
        self.cache().session = Some(session);
        self
    }

    fn cache(&self) -> MutexGuard<'_, PeerCache> {
        // Entries are inserted whole, so a poisoned cache is still usable.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remember the sender of a live update so its profile resolves later.
    pub fn remember_user(&self, user: &tl::enums::User) {
        if let tl::enums::User::User(u) = user {
            self.cache().add_user(u);
        }
    }

    async fn participants(
        &self,
        supergroup_id: i64,
        filter: tl::enums::ChannelParticipantsFilter,
        offset: i32,
        limit: i32,
    ) -> Result<MemberPage> {
        let channel = self.cache().input_channel(supergroup_id)?;
        let response = self
            .client
            .invoke(&tl::functions::channels::GetParticipants {
                channel,
                filter,
                offset,
                limit,
                hash: 0,
            })
            .await?;

        match response {
            tl::enums::channels::ChannelParticipants::Participants(p) => {
                self.cache().add_users(&p.users);
                Ok(MemberPage {
                    total_count: p.count,
                    members: p.participants.iter().filter_map(participant_user_id).collect(),
                })
            }
            tl::enums::channels::ChannelParticipants::NotModified => Ok(MemberPage::default()),
        }
    }
}

#[async_trait]
impl ChatBackend for GrammersBackend {
    async fn chat_page(&self, cursor: ChatCursor, limit: usize) -> Result<Vec<ChatId>> {
        let (offset_date, offset_id, offset_peer) = if cursor.is_start() {
            (0, 0, tl::enums::InputPeer::Empty)
        } else {
            let cache = self.cache();
            let chat = cache
                .chats
                .get(&cursor.chat_id)
                .ok_or(Error::ChatNotFound(cursor.chat_id))?;
            let (date, id) = split_order(cursor.order);
            (date, id, cache.input_peer(chat))
        };

        let response = self
            .client
            .invoke(&tl::functions::messages::GetDialogs {
                exclude_pinned: false,
                folder_id: None,
                offset_date,
                offset_id,
                offset_peer,
                limit: limit.min(MAX_DIALOG_PAGE) as i32,
                hash: 0,
            })
            .await?;

        let (dialogs, messages, chats, users) = match response {
            tl::enums::messages::Dialogs::Dialogs(d) => (d.dialogs, d.messages, d.chats, d.users),
            tl::enums::messages::Dialogs::Slice(d) => (d.dialogs, d.messages, d.chats, d.users),
            tl::enums::messages::Dialogs::NotModified(_) => return Ok(Vec::new()),
        };

        let mut cache = self.cache();
        cache.add_users(&users);
        cache.add_chats(&chats);

        let mut ids = Vec::with_capacity(dialogs.len());
        for dialog in &dialogs {
            let tl::enums::Dialog::Dialog(d) = dialog else {
                continue;
            };
            let order = dialog_order(message_date(&messages, &d.peer, d.top_message), d.top_message);
            match cache.dialog_chat(&d.peer, order, &chats) {
                Some(chat) if chat.id == cursor.chat_id => {}
                Some(chat) => {
                    ids.push(chat.id);
                    cache.chats.insert(chat.id, chat);
                }
                None => debug!(peer = ?d.peer, "Dialog peer missing from response"),
            }
        }

        Ok(ids)
    }

    async fn chat(&self, chat_id: ChatId) -> Result<Chat> {
        self.cache()
            .chats
            .get(&chat_id)
            .cloned()
            .ok_or(Error::ChatNotFound(chat_id))
    }

    async fn supergroup(&self, supergroup_id: i64) -> Result<Supergroup> {
        let cache = self.cache();
        let entry = cache
            .channels
            .get(&supergroup_id)
            .ok_or(Error::ChatNotFound(supergroup_chat_id(supergroup_id)))?;
        Ok(Supergroup {
            id: supergroup_id,
            username: entry.username.clone(),
            member_count: entry.participants_count.unwrap_or(0),
            is_channel: entry.broadcast,
        })
    }

    async fn supergroup_full_info(&self, supergroup_id: i64) -> Result<SupergroupFullInfo> {
        let channel = self.cache().input_channel(supergroup_id)?;
        let tl::enums::messages::ChatFull::Full(full) = self
            .client
            .invoke(&tl::functions::channels::GetFullChannel { channel })
            .await?;

        self.cache().add_users(&full.users);
        match full.full_chat {
            tl::enums::ChatFull::ChannelFull(cf) => Ok(SupergroupFullInfo {
                member_count: cf.participants_count.unwrap_or(0),
                can_get_members: cf.can_view_participants,
            }),
            tl::enums::ChatFull::Full(_) => Err(Error::TelegramError(format!(
                "Channel {} returned basic group info",
                supergroup_id
            ))),
        }
    }

    async fn basic_group_members(&self, group_id: i64) -> Result<Vec<UserId>> {
        let tl::enums::messages::ChatFull::Full(full) = self
            .client
            .invoke(&tl::functions::messages::GetFullChat { chat_id: group_id })
            .await?;

        self.cache().add_users(&full.users);
        let tl::enums::ChatFull::Full(chat_full) = full.full_chat else {
            return Err(Error::TelegramError(format!(
                "Group {} returned channel info",
                group_id
            )));
        };

        match chat_full.participants {
            tl::enums::ChatParticipants::Participants(p) => Ok(p
                .participants
                .iter()
                .map(|participant| match participant {
                    tl::enums::ChatParticipant::Participant(p) => p.user_id,
                    tl::enums::ChatParticipant::Creator(p) => p.user_id,
                    tl::enums::ChatParticipant::Admin(p) => p.user_id,
                })
                .collect()),
            tl::enums::ChatParticipants::Forbidden(_) => Err(Error::TelegramError(format!(
                "Member list of group {} is forbidden",
                group_id
            ))),
        }
    }

    async fn supergroup_members(
        &self,
        supergroup_id: i64,
        offset: i32,
        limit: i32,
    ) -> Result<MemberPage> {
        self.participants(
            supergroup_id,
            tl::enums::ChannelParticipantsFilter::ChannelParticipantsRecent,
            offset,
            limit,
        )
        .await
    }

    async fn search_chat_members(
        &self,
        chat_id: ChatId,
        query: &str,
        limit: i32,
    ) -> Result<MemberPage> {
        let supergroup_id = supergroup_id_of(chat_id).ok_or(Error::ChatNotFound(chat_id))?;
        let filter = tl::enums::ChannelParticipantsFilter::ChannelParticipantsSearch(
            tl::types::ChannelParticipantsSearch {
                q: query.to_string(),
            },
        );
        self.participants(supergroup_id, filter, 0, limit).await
    }

    async fn user(&self, user_id: UserId) -> Result<UserProfile> {
        let (cached, stored_hash) = {
            let cache = self.cache();
            (
                cache.users.get(&user_id).map(|(_, profile)| profile.clone()),
                cache.stored_access_hash(user_id),
            )
        };
        if let Some(profile) = cached {
            return Ok(profile);
        }

        let access_hash = stored_hash.unwrap_or_else(|| {
            debug!(user_id, "No stored access hash, resolving with ambient authority");
            0
        });
        let users = self
            .client
            .invoke(&tl::functions::users::GetUsers {
                id: vec![tl::enums::InputUser::User(tl::types::InputUser {
                    user_id,
                    access_hash,
                })],
            })
            .await?;

        let mut cache = self.cache();
        cache.add_users(&users);
        cache
            .users
            .get(&user_id)
            .map(|(_, profile)| profile.clone())
            .ok_or(Error::UserNotFound(user_id))
    }
}

/// Convert one grammers update into a `{"@type": ...}` record.
fn update_record(update: &Update, backend: &GrammersBackend) -> Value {
    match update {
        Update::NewMessage(message) => match message.sender() {
            Some(Peer::User(user)) => {
                backend.remember_user(&user.raw);
                json!({
                    "@type": "updateNewMessage",
                    "content": {"sender_user_id": user.raw.id()},
                })
            }
            _ => json!({"@type": "updateNewMessage", "content": {}}),
        },
        // Raw updates arrive without their user entities; the profile is
        // resolved later through the session's stored access hash.
        Update::Raw(raw) => match &raw.raw {
            tl::enums::Update::UserStatus(status) => json!({
                "@type": "updateUserStatus",
                "user_id": status.user_id,
            }),
            _ => json!({"@type": "updateOther"}),
        },
        _ => json!({"@type": "updateOther"}),
    }
}

/// Stream updates from the sender pool into loosely-typed records.
///
/// The returned channel closes when the grammers update stream ends.
pub fn spawn_update_feed(
    client: Client,
    updates: mpsc::UnboundedReceiver<UpdatesLike>,
    backend: Arc<GrammersBackend>,
) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut stream = client.stream_updates(
            updates,
            UpdatesConfiguration {
                catch_up: true,
                ..Default::default()
            },
        );

        loop {
            match stream.next().await {
                Ok(update) => {
                    if tx.send(update_record(&update, &backend)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("Update stream ended: {}", err);
                    break;
                }
            }
        }
    });

    rx
}
