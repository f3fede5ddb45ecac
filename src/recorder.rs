//! Insert-if-new path shared by member harvesting and the live update drain

use std::sync::Arc;

use tracing::debug;

use crate::chat::{ChatBackend, UserId};
use crate::error::Result;
use crate::metrics;
use crate::store::{CreateOutcome, IdentityStore};

/// Where an observed user came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Paged,
    Search,
    BasicGroup,
    LiveUpdate,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Paged => "paged",
            Source::Search => "search",
            Source::BasicGroup => "basic_group",
            Source::LiveUpdate => "live_update",
        }
    }
}

/// What happened to an observed user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Inserted,
    AlreadyKnown,
}

/// Records users into the identity store exactly once.
#[derive(Clone)]
pub struct UserRecorder {
    backend: Arc<dyn ChatBackend>,
    store: Arc<dyn IdentityStore>,
}

impl UserRecorder {
    pub fn new(backend: Arc<dyn ChatBackend>, store: Arc<dyn IdentityStore>) -> Self {
        Self { backend, store }
    }

    /// Fetch the user's profile and create the identity unless it exists.
    ///
    /// Profile and store failures are returned to the caller, which decides
    /// whether to skip the user; a duplicate is never an error.
    pub async fn record(&self, user_id: UserId, source: Source) -> Result<Recorded> {
        let profile = match self.backend.user(user_id).await {
            Ok(profile) => profile,
            Err(err) => {
                metrics::record_user(source.as_str(), "failed");
                return Err(err);
            }
        };

        let outcome = self.insert_if_new(user_id, &profile.display_name()).await;
        let label = match &outcome {
            Ok(Recorded::Inserted) => "inserted",
            Ok(Recorded::AlreadyKnown) => "known",
            Err(_) => "failed",
        };
        metrics::record_user(source.as_str(), label);
        outcome
    }

    async fn insert_if_new(&self, user_id: UserId, user_name: &str) -> Result<Recorded> {
        if self.store.exists(user_id).await? {
            return Ok(Recorded::AlreadyKnown);
        }

        match self.store.create(user_id, user_name).await? {
            CreateOutcome::Created => {
                debug!(user_id, user_name, "Recorded new user");
                Ok(Recorded::Inserted)
            }
            // Lost a race with the other producer; the unique key kept one row.
            CreateOutcome::Duplicate => Ok(Recorded::AlreadyKnown),
        }
    }
}
