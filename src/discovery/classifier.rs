//! Routing of accumulated chats to member harvesting strategies.

use std::sync::Arc;

use tracing::{info, warn};

use crate::chat::{Chat, ChatBackend, ChatId, ChatKind};
use crate::config::LARGE_GROUP_THRESHOLD;
use crate::metrics;

/// Mode flags and threshold that decide which strategies run for a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestPolicy {
    /// Never page the member listing.
    pub search_only: bool,
    /// Only page groups above the large-group threshold.
    pub large_group_only: bool,
    pub large_group_threshold: i32,
}

impl Default for HarvestPolicy {
    fn default() -> Self {
        Self {
            search_only: false,
            large_group_only: false,
            large_group_threshold: LARGE_GROUP_THRESHOLD,
        }
    }
}

/// Strategies selected for one chat. Search runs before paging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Strategies {
    pub search: bool,
    pub paging: bool,
}

impl Strategies {
    pub fn any(&self) -> bool {
        self.search || self.paging
    }
}

impl HarvestPolicy {
    pub fn strategies(&self, member_count: i32) -> Strategies {
        let large = member_count > self.large_group_threshold;
        Strategies {
            search: large,
            paging: !self.search_only && (large || !self.large_group_only),
        }
    }
}

/// Identifier pair of a distinguished chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatRef {
    pub chat_id: ChatId,
    pub group_id: i64,
}

/// The two chats recognized by the title marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistinguishedChats {
    /// Broadcast channel.
    pub channel: Option<ChatRef>,
    /// Megagroup or basic group.
    pub group: Option<ChatRef>,
}

impl DistinguishedChats {
    fn slot(&mut self, is_channel: bool) -> &mut Option<ChatRef> {
        if is_channel {
            &mut self.channel
        } else {
            &mut self.group
        }
    }
}

/// Outcome of classifying one chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Title carries the marker; never harvested.
    Distinguished,
    /// Full info says the member list is not available to this account.
    CannotListMembers,
    /// Summary or full info could not be fetched.
    MetadataUnavailable,
    Harvest {
        supergroup_id: i64,
        chat_id: ChatId,
        strategies: Strategies,
    },
    BasicGroup {
        group_id: i64,
    },
    /// Private chat, or no strategy applies under the current policy.
    Ignored,
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Distinguished => "distinguished",
            Decision::CannotListMembers => "cannot_list_members",
            Decision::MetadataUnavailable => "metadata_unavailable",
            Decision::Harvest { .. } => "harvest",
            Decision::BasicGroup { .. } => "basic_group",
            Decision::Ignored => "ignored",
        }
    }
}

pub struct ChatClassifier {
    backend: Arc<dyn ChatBackend>,
    policy: HarvestPolicy,
    marker_prefix: String,
    distinguished: DistinguishedChats,
}

impl ChatClassifier {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        policy: HarvestPolicy,
        marker_prefix: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            policy,
            marker_prefix: marker_prefix.into(),
            distinguished: DistinguishedChats::default(),
        }
    }

    pub fn distinguished(&self) -> DistinguishedChats {
        self.distinguished
    }

    pub async fn classify(&mut self, chat: &Chat) -> Decision {
        let decision = self.decide(chat).await;
        metrics::record_chat_decision(decision.label());
        decision
    }

    async fn decide(&mut self, chat: &Chat) -> Decision {
        match chat.kind {
            ChatKind::Private { .. } => Decision::Ignored,
            ChatKind::BasicGroup { group_id } => {
                if self.is_marked(chat) {
                    self.remember(chat, group_id, false);
                    return Decision::Distinguished;
                }
                info!(chat_id = chat.id, group_id, title = %chat.title, "Basic group");
                Decision::BasicGroup { group_id }
            }
            ChatKind::Supergroup { supergroup_id } => {
                self.classify_supergroup(chat, supergroup_id).await
            }
        }
    }

    async fn classify_supergroup(&mut self, chat: &Chat, supergroup_id: i64) -> Decision {
        let summary = match self.backend.supergroup(supergroup_id).await {
            Ok(summary) => summary,
            Err(err) => {
                warn!(chat_id = chat.id, supergroup_id, "Can't get supergroup: {}", err);
                if self.is_marked(chat) {
                    // Channel or megagroup is unknown without the summary.
                    self.remember(chat, supergroup_id, false);
                    return Decision::Distinguished;
                }
                return Decision::MetadataUnavailable;
            }
        };

        if self.is_marked(chat) {
            self.remember(chat, supergroup_id, summary.is_channel);
            return Decision::Distinguished;
        }

        let full_info = match self.backend.supergroup_full_info(supergroup_id).await {
            Ok(full_info) => full_info,
            Err(err) => {
                warn!(
                    chat_id = chat.id,
                    supergroup_id,
                    "Can't get supergroup full info: {}",
                    err
                );
                return Decision::MetadataUnavailable;
            }
        };

        info!(
            chat_id = chat.id,
            title = %chat.title,
            username = summary.username.as_deref().unwrap_or(""),
            is_channel = summary.is_channel,
            member_count = full_info.member_count,
            "Supergroup"
        );

        if !full_info.can_get_members {
            warn!(chat_id = chat.id, title = %chat.title, "Can't get members");
            return Decision::CannotListMembers;
        }

        let strategies = self.policy.strategies(full_info.member_count);
        if !strategies.any() {
            return Decision::Ignored;
        }

        Decision::Harvest {
            supergroup_id,
            chat_id: chat.id,
            strategies,
        }
    }

    fn is_marked(&self, chat: &Chat) -> bool {
        !self.marker_prefix.is_empty() && chat.title.starts_with(&self.marker_prefix)
    }

    fn remember(&mut self, chat: &Chat, group_id: i64, is_channel: bool) {
        let slot = self.distinguished.slot(is_channel);
        match *slot {
            Some(existing) => warn!(
                chat_id = chat.id,
                kept = existing.chat_id,
                "Marker chat already recorded"
            ),
            None => {
                *slot = Some(ChatRef {
                    chat_id: chat.id,
                    group_id,
                });
                info!(chat_id = chat.id, group_id, is_channel, "Found marker chat");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{basic_group_chat_id, supergroup_chat_id};
    use crate::discovery::testing::{Call, ScriptedBackend};

    const MARK: &str = "mark-";

    fn classifier(backend: ScriptedBackend, policy: HarvestPolicy) -> (ChatClassifier, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        (ChatClassifier::new(backend.clone(), policy, MARK), backend)
    }

    fn last_chat(backend: &ScriptedBackend) -> Chat {
        backend.chats.last().cloned().unwrap()
    }

    #[test]
    fn default_policy_runs_both_for_large_groups() {
        let policy = HarvestPolicy::default();
        assert_eq!(
            policy.strategies(10_001),
            Strategies {
                search: true,
                paging: true
            }
        );
        assert_eq!(
            policy.strategies(10_000),
            Strategies {
                search: false,
                paging: true
            }
        );
    }

    #[test]
    fn search_only_never_pages() {
        let policy = HarvestPolicy {
            search_only: true,
            ..Default::default()
        };
        assert!(!policy.strategies(50_000).paging);
        assert!(policy.strategies(50_000).search);
        assert!(!policy.strategies(10).any());
    }

    #[test]
    fn large_group_only_skips_small_groups() {
        let policy = HarvestPolicy {
            large_group_only: true,
            ..Default::default()
        };
        assert!(!policy.strategies(9_999).any());
        assert!(policy.strategies(20_000).paging);
    }

    #[tokio::test]
    async fn marker_chat_is_never_harvested() {
        let mut backend = ScriptedBackend::default();
        backend.add_supergroup(1, "mark-news", true, 1_000_000, true, vec![]);
        let chat = last_chat(&backend);
        let (mut classifier, backend) = classifier(backend, HarvestPolicy::default());

        assert_eq!(classifier.classify(&chat).await, Decision::Distinguished);
        assert_eq!(
            classifier.distinguished().channel,
            Some(ChatRef {
                chat_id: supergroup_chat_id(1),
                group_id: 1
            })
        );
        assert!(classifier.distinguished().group.is_none());
        assert!(!backend.calls().contains(&Call::FullInfo(1)));
    }

    #[tokio::test]
    async fn marker_fills_group_slot_once() {
        let mut backend = ScriptedBackend::default();
        backend.add_supergroup(2, "mark-talk", false, 5, true, vec![]);
        backend.add_basic_group(3, "mark-family", vec![]);
        let chats = backend.chats.clone();
        let (mut classifier, _backend) = classifier(backend, HarvestPolicy::default());

        for chat in &chats {
            assert_eq!(classifier.classify(chat).await, Decision::Distinguished);
        }

        assert_eq!(
            classifier.distinguished().group,
            Some(ChatRef {
                chat_id: supergroup_chat_id(2),
                group_id: 2
            })
        );
    }

    #[tokio::test]
    async fn basic_group_marker_uses_group_slot() {
        let mut backend = ScriptedBackend::default();
        backend.add_basic_group(9, "mark-home", vec![1]);
        let chat = last_chat(&backend);
        let (mut classifier, _backend) = classifier(backend, HarvestPolicy::default());

        assert_eq!(classifier.classify(&chat).await, Decision::Distinguished);
        assert_eq!(
            classifier.distinguished().group,
            Some(ChatRef {
                chat_id: basic_group_chat_id(9),
                group_id: 9
            })
        );
    }

    #[tokio::test]
    async fn marker_without_summary_falls_back_to_group_slot() {
        let mut backend = ScriptedBackend::default();
        backend.add_supergroup(6, "mark-news", true, 1_000, true, vec![]);
        backend.supergroups.remove(&6);
        let chat = last_chat(&backend);
        let (mut classifier, backend) = classifier(backend, HarvestPolicy::default());

        assert_eq!(classifier.classify(&chat).await, Decision::Distinguished);
        assert_eq!(
            classifier.distinguished().group,
            Some(ChatRef {
                chat_id: supergroup_chat_id(6),
                group_id: 6
            })
        );
        assert!(classifier.distinguished().channel.is_none());
        assert!(!backend.calls().contains(&Call::FullInfo(6)));
    }

    #[tokio::test]
    async fn members_hidden_means_skip() {
        let mut backend = ScriptedBackend::default();
        backend.add_supergroup(4, "closed", false, 50_000, false, vec![]);
        let chat = last_chat(&backend);
        let (mut classifier, _backend) = classifier(backend, HarvestPolicy::default());

        assert_eq!(classifier.classify(&chat).await, Decision::CannotListMembers);
    }

    #[tokio::test]
    async fn metadata_failure_skips_chat() {
        let mut backend = ScriptedBackend::default();
        backend.add_supergroup(5, "flaky", false, 50_000, true, vec![]);
        backend.failing_full_info.insert(5);
        let chat = last_chat(&backend);
        let (mut classifier, _backend) = classifier(backend, HarvestPolicy::default());

        assert_eq!(classifier.classify(&chat).await, Decision::MetadataUnavailable);
    }

    #[tokio::test]
    async fn large_supergroup_gets_both_strategies() {
        let mut backend = ScriptedBackend::default();
        backend.add_supergroup(6, "crowd", false, 10_001, true, vec![]);
        let chat = last_chat(&backend);
        let (mut classifier, _backend) = classifier(backend, HarvestPolicy::default());

        assert_eq!(
            classifier.classify(&chat).await,
            Decision::Harvest {
                supergroup_id: 6,
                chat_id: supergroup_chat_id(6),
                strategies: Strategies {
                    search: true,
                    paging: true
                },
            }
        );
    }

    #[tokio::test]
    async fn small_supergroup_ignored_in_large_group_only_mode() {
        let mut backend = ScriptedBackend::default();
        backend.add_supergroup(7, "club", false, 300, true, vec![]);
        let chat = last_chat(&backend);
        let policy = HarvestPolicy {
            large_group_only: true,
            ..Default::default()
        };
        let (mut classifier, _backend) = classifier(backend, policy);

        assert_eq!(classifier.classify(&chat).await, Decision::Ignored);
    }

    #[tokio::test]
    async fn private_and_basic_chats_route_without_metadata() {
        let mut backend = ScriptedBackend::default();
        backend.add_private_chat(11);
        backend.add_basic_group(12, "friends", vec![1, 2]);
        let chats = backend.chats.clone();
        let (mut classifier, backend) = classifier(backend, HarvestPolicy::default());

        assert_eq!(classifier.classify(&chats[0]).await, Decision::Ignored);
        assert_eq!(
            classifier.classify(&chats[1]).await,
            Decision::BasicGroup { group_id: 12 }
        );
        assert!(backend.calls().is_empty());
    }
}
