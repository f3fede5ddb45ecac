//! Chat discovery and member enumeration pipeline.
//!
//! The accumulator builds the chat list, the classifier routes each chat and
//! the harvester streams members into the identity store. Everything runs
//! sequentially, chat by chat and strategy by strategy.

pub mod accumulator;
pub mod classifier;
pub mod harvester;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

pub use accumulator::ChatAccumulator;
pub use classifier::{
    ChatClassifier, ChatRef, Decision, DistinguishedChats, HarvestPolicy, Strategies,
};
pub use harvester::{pacing_delay, HarvestStats, MemberHarvester, SEARCH_ALPHABET};

use crate::chat::ChatBackend;
use crate::config::{Config, MEMBER_PAGE_SIZE, MIN_PACE_SECONDS};
use crate::error::Result;
use crate::recorder::UserRecorder;

/// Tunables for one discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub chat_limit: usize,
    pub policy: HarvestPolicy,
    pub marker_prefix: String,
    pub page_size: i32,
    pub pace_unit: Duration,
}

impl DiscoveryOptions {
    pub fn from_config(config: &Config, search_only: bool, large_group_only: bool) -> Self {
        Self {
            chat_limit: config.chat_limit,
            policy: HarvestPolicy {
                search_only,
                large_group_only,
                large_group_threshold: config.large_group_threshold,
            },
            marker_prefix: config.marker_prefix.clone(),
            page_size: config.member_page_size,
            pace_unit: Duration::from_secs(config.pace_seconds.max(MIN_PACE_SECONDS)),
        }
    }
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            chat_limit: crate::config::DEFAULT_CHAT_LIMIT,
            policy: HarvestPolicy::default(),
            marker_prefix: crate::config::DISTINGUISHED_TITLE_PREFIX.to_string(),
            page_size: MEMBER_PAGE_SIZE,
            pace_unit: Duration::from_secs(1),
        }
    }
}

/// Summary of a finished discovery run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub chats: usize,
    pub harvested_chats: usize,
    pub skipped_chats: usize,
    pub members: HarvestStats,
    pub distinguished: DistinguishedChats,
}

/// Accumulate the chat list and harvest every chat the policy selects.
///
/// Only accumulation failures are returned; everything past that point is
/// logged and skipped per chat.
pub async fn run_discovery(
    backend: Arc<dyn ChatBackend>,
    recorder: UserRecorder,
    options: &DiscoveryOptions,
) -> Result<DiscoveryReport> {
    let mut accumulator = ChatAccumulator::new();
    accumulator
        .accumulate(backend.as_ref(), options.chat_limit)
        .await?;

    let chats = accumulator.snapshot();
    info!("Got {} chats", chats.len());

    let mut classifier =
        ChatClassifier::new(backend.clone(), options.policy, options.marker_prefix.clone());
    let harvester = MemberHarvester::new(backend, recorder)
        .with_page_size(options.page_size)
        .with_pace_unit(options.pace_unit);

    let mut report = DiscoveryReport {
        chats: chats.len(),
        ..Default::default()
    };

    for chat in chats {
        match classifier.classify(chat).await {
            Decision::Harvest {
                supergroup_id,
                chat_id,
                strategies,
            } => {
                report.harvested_chats += 1;
                if strategies.search {
                    report
                        .members
                        .merge(harvester.harvest_by_search(chat_id).await);
                }
                if strategies.paging {
                    report
                        .members
                        .merge(harvester.harvest_paged(supergroup_id).await);
                }
            }
            Decision::BasicGroup { group_id } => {
                report.harvested_chats += 1;
                report
                    .members
                    .merge(harvester.harvest_basic_group(group_id, &chat.title).await);
            }
            _ => report.skipped_chats += 1,
        }
    }

    report.distinguished = classifier.distinguished();
    info!(
        chats = report.chats,
        harvested = report.harvested_chats,
        skipped = report.skipped_chats,
        inserted = report.members.inserted,
        known = report.members.known,
        failed = report.members.failed,
        "Discovery finished"
    );
    Ok(report)
}
