//! Collaborators the command handlers talk to.
//!
//! The handlers never reach for globals: the store, view cache and clock are
//! held by the service, and the caller's [`Session`] is passed in per request.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    NewPoll, NewVote, OptionCount, PollId, PollOwner, PollPatch, PollStats, PollSummary, UserId,
    VoteInsert, VoteTarget,
};

/// Failures reported by a [`PollStore`] adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backend rejected or failed the operation. The message is shown to
    /// callers as-is and may be empty.
    #[error("{message}")]
    Backend { message: String },

    /// A uniqueness constraint rejected the write.
    #[error("unique constraint violated: {message}")]
    UniqueViolation { message: String },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn unique_violation(message: impl Into<String>) -> Self {
        Self::UniqueViolation {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session lookup failed: {message}")]
    Lookup { message: String },
}

/// Identity of whoever is making the current request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Session: Send + Sync {
    /// `None` when the request carries no live session.
    async fn current_user(&self) -> Result<Option<UserId>, SessionError>;
}

/// Polls and votes persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PollStore: Send + Sync {
    async fn find_owner(&self, id: &PollId) -> Result<Option<PollOwner>, StoreError>;

    async fn find_for_vote(&self, id: &PollId) -> Result<Option<VoteTarget>, StoreError>;

    async fn insert_poll(&self, poll: &NewPoll) -> Result<PollSummary, StoreError>;

    /// Returns `None` when no poll with `id` exists anymore.
    async fn update_poll(
        &self,
        id: &PollId,
        patch: &PollPatch,
    ) -> Result<Option<PollSummary>, StoreError>;

    /// Votes go with the poll through the schema's cascade.
    async fn delete_poll(&self, id: &PollId) -> Result<(), StoreError>;

    async fn has_voted(&self, poll_id: &PollId, voter: &UserId) -> Result<bool, StoreError>;

    /// Insert a vote. For attributed votes this is insert-if-absent keyed by
    /// (poll, voter) and reports [`VoteInsert::Conflict`] instead of writing
    /// a second row. Anonymous votes always insert.
    async fn insert_vote(&self, vote: &NewVote) -> Result<VoteInsert, StoreError>;

    async fn vote_counts(&self, poll_id: &PollId) -> Result<Vec<OptionCount>, StoreError>;

    async fn list_polls(&self) -> Result<Vec<PollStats>, StoreError>;

    async fn find_detail(&self, id: &PollId) -> Result<Option<PollStats>, StoreError>;
}

/// Cached server-rendered views keyed by logical path.
#[cfg_attr(test, mockall::automock)]
pub trait ViewCache: Send + Sync {
    /// Mark the view at `path` stale.
    fn invalidate(&self, path: &str);
}

/// Fixed session, for callers that already know who is asking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaticSession(pub Option<UserId>);

#[async_trait]
impl Session for StaticSession {
    async fn current_user(&self) -> Result<Option<UserId>, SessionError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_session_reports_its_user() {
        let user = UserId::random();
        assert_eq!(StaticSession(Some(user)).current_user().await, Ok(Some(user)));
        assert_eq!(StaticSession::default().current_user().await, Ok(None));
    }

    #[test]
    fn backend_error_displays_message_verbatim() {
        assert_eq!(
            StoreError::backend("relation \"polls\" does not exist").to_string(),
            "relation \"polls\" does not exist"
        );
    }
}
