//! The poll and vote command service.
//!
//! Commands live in [`crate::poll`] and [`crate::vote`], read-side queries in
//! [`crate::results`]. Each command runs as an independent request: the only
//! cross-request state is whatever the store persists.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use tracing::error;

use crate::error::PollError;
use crate::models::{PollId, UserId};
use crate::ports::{Session, StoreError, ViewCache};

pub const POLLS_PATH: &str = "/polls";

pub fn poll_path(id: &PollId) -> String {
    format!("{POLLS_PATH}/{id}")
}

pub fn results_path(id: &PollId) -> String {
    format!("{POLLS_PATH}/{id}/results")
}

/// Every cached view that shows `id`: the listing, its detail and its results.
pub fn views_of(id: &PollId) -> [String; 3] {
    [POLLS_PATH.to_owned(), poll_path(id), results_path(id)]
}

pub struct PollService<S, C> {
    pub(crate) store: Arc<S>,
    pub(crate) cache: Arc<C>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl<S, C> Clone for PollService<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S, C> PollService<S, C>
where
    C: ViewCache,
{
    pub fn new(store: Arc<S>, cache: Arc<C>, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            store,
            cache,
            clock,
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.utc()
    }

    pub(crate) fn invalidate(&self, path: &str) {
        self.cache.invalidate(path);
    }

    pub(crate) fn invalidate_views_of(&self, id: &PollId) {
        for path in views_of(id) {
            self.cache.invalidate(&path);
        }
    }

    /// Resolve the caller, treating a failed lookup as an unexpected error.
    pub(crate) async fn caller(&self, session: &impl Session) -> Result<Option<UserId>, PollError> {
        session.current_user().await.map_err(|err| {
            error!(error = %err, "session lookup failed");
            PollError::Unexpected
        })
    }

    /// Resolve the caller and insist one exists.
    pub(crate) async fn require_caller(&self, session: &impl Session) -> Result<UserId, PollError> {
        self.caller(session).await?.ok_or(PollError::Unauthorized)
    }
}

/// Map a store failure into the message a command surfaces.
pub(crate) fn store_failure(err: StoreError, fallback: &str) -> PollError {
    error!(error = %err, "store operation failed");
    match err {
        StoreError::Backend { message } | StoreError::UniqueViolation { message } => {
            PollError::backend(message, fallback)
        }
    }
}
