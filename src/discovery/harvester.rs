//! Member enumeration for groups and channels.
//!
//! Two strategies feed the same insert-if-new path:
//! - direct paging walks the recent-members listing by numeric offset;
//! - prefix search queries every seed of [`SEARCH_ALPHABET`], which reaches
//!   members the plain listing stops returning after its first windows.
//!
//! Every fetched window is followed by a pacing sleep of
//! `members / 60 + 1` time units.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::chat::{ChatBackend, ChatId, MemberPage};
use crate::config::MEMBER_PAGE_SIZE;
use crate::metrics;
use crate::recorder::{Recorded, Source, UserRecorder};

/// Seeds used for prefix search.
pub const SEARCH_ALPHABET: &str = "0123456789abcdefghijklmnopqrstuvwxyz";

/// Members per pacing unit.
const MEMBERS_PER_UNIT: usize = 60;

/// Pacing delay after a window of `members` members.
pub fn pacing_delay(members: usize, unit: Duration) -> Duration {
    unit * (members / MEMBERS_PER_UNIT + 1) as u32
}

/// Counters for one strategy run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HarvestStats {
    pub batches: usize,
    pub seen: usize,
    pub inserted: usize,
    pub known: usize,
    pub failed: usize,
}

impl HarvestStats {
    pub fn merge(&mut self, other: HarvestStats) {
        self.batches += other.batches;
        self.seen += other.seen;
        self.inserted += other.inserted;
        self.known += other.known;
        self.failed += other.failed;
    }
}

pub struct MemberHarvester {
    backend: Arc<dyn ChatBackend>,
    recorder: UserRecorder,
    page_size: i32,
    pace_unit: Duration,
}

impl MemberHarvester {
    pub fn new(backend: Arc<dyn ChatBackend>, recorder: UserRecorder) -> Self {
        Self {
            backend,
            recorder,
            page_size: MEMBER_PAGE_SIZE,
            pace_unit: Duration::from_secs(1),
        }
    }

    /// Window size for listing and search calls.
    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Length of one pacing unit.
    pub fn with_pace_unit(mut self, pace_unit: Duration) -> Self {
        self.pace_unit = pace_unit;
        self
    }

    /// Page the recent-members listing until a window comes back empty.
    /// A fetch error ends the walk for this supergroup.
    pub async fn harvest_paged(&self, supergroup_id: i64) -> HarvestStats {
        let mut stats = HarvestStats::default();
        let mut offset = 0;

        loop {
            let page = match self
                .backend
                .supergroup_members(supergroup_id, offset, self.page_size)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    warn!(supergroup_id, offset, "Getting supergroup members failed: {}", err);
                    break;
                }
            };
            metrics::record_member_batch(Source::Paged.as_str());

            if page.is_empty() {
                info!(supergroup_id, offset, "Got 0 members, paging finished");
                break;
            }

            stats.merge(self.add_members(&page, Source::Paged).await);
            self.pace(page.members.len()).await;
            offset += self.page_size;
        }

        stats
    }

    /// Query every seed of the search alphabet. A failing seed is skipped.
    pub async fn harvest_by_search(&self, chat_id: ChatId) -> HarvestStats {
        let mut stats = HarvestStats::default();
        let mut buf = [0u8; 4];

        for seed in SEARCH_ALPHABET.chars() {
            let query: &str = seed.encode_utf8(&mut buf);
            let page = match self
                .backend
                .search_chat_members(chat_id, query, self.page_size)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    warn!(chat_id, query, "Searching chat members failed: {}", err);
                    continue;
                }
            };
            metrics::record_member_batch(Source::Search.as_str());

            if page.is_empty() {
                info!(chat_id, query, "Got 0 members");
            } else {
                stats.merge(self.add_members(&page, Source::Search).await);
            }
            self.pace(page.members.len()).await;
        }

        stats
    }

    /// Record every member of a basic group.
    pub async fn harvest_basic_group(&self, group_id: i64, title: &str) -> HarvestStats {
        let members = match self.backend.basic_group_members(group_id).await {
            Ok(members) => members,
            Err(err) => {
                warn!(group_id, title, "Can't get basic group members: {}", err);
                return HarvestStats::default();
            }
        };
        metrics::record_member_batch(Source::BasicGroup.as_str());

        let page = MemberPage {
            total_count: members.len() as i32,
            members,
        };
        if page.is_empty() {
            info!(group_id, title, "Got 0 members");
            return HarvestStats::default();
        }

        self.add_members(&page, Source::BasicGroup).await
    }

    /// Push one window through the recorder; failures only skip that member.
    async fn add_members(&self, page: &MemberPage, source: Source) -> HarvestStats {
        info!(
            total_count = page.total_count,
            got = page.members.len(),
            strategy = source.as_str(),
            "Adding members"
        );

        let mut stats = HarvestStats {
            batches: 1,
            ..Default::default()
        };
        for &user_id in &page.members {
            stats.seen += 1;
            match self.recorder.record(user_id, source).await {
                Ok(Recorded::Inserted) => stats.inserted += 1,
                Ok(Recorded::AlreadyKnown) => stats.known += 1,
                Err(err) => {
                    stats.failed += 1;
                    warn!(user_id, "Can't record member: {}", err);
                }
            }
        }
        stats
    }

    async fn pace(&self, members: usize) {
        let delay = pacing_delay(members, self.pace_unit);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
