//! Poll and vote records shared by the commands, the store and the HTTP
//! layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque poll identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct PollId(Uuid);

impl PollId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PollId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of an authenticated user, owned by the external auth system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(Uuid);

impl UserId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub options: Vec<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Poll {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }
}

/// Poll row joined with its vote count.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PollStats {
    #[sqlx(flatten)]
    pub poll: Poll,
    pub vote_count: i64,
}

/// Poll as shown on the listing and detail views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollView {
    #[serde(flatten)]
    pub poll: Poll,
    pub vote_count: i64,
    pub is_expired: bool,
}

impl PollView {
    pub fn new(stats: PollStats, now: DateTime<Utc>) -> Self {
        let is_expired = stats.poll.is_expired(now);
        Self {
            poll: stats.poll,
            vote_count: stats.vote_count,
            is_expired,
        }
    }

    /// When `is_expired` flips on its own, if it still can.
    pub fn stale_at(&self) -> Option<DateTime<Utc>> {
        if self.is_expired {
            None
        } else {
            self.poll.expires_at
        }
    }
}

/// Raw create/update payload as submitted by a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollInput {
    pub question: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// Validated poll fields. Options still carry the caller's spelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollDraft {
    pub question: String,
    pub options: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPoll {
    pub question: String,
    pub options: Vec<String>,
    pub created_by: UserId,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPatch {
    pub question: String,
    pub options: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// The `{id, question}` pair handed back by create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PollSummary {
    pub id: PollId,
    pub question: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct PollOwner {
    pub id: PollId,
    pub created_by: UserId,
}

/// What a vote needs to know about its poll.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct VoteTarget {
    pub id: PollId,
    pub options: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewVote {
    pub poll_id: PollId,
    pub option_index: i32,
    pub voter_id: Option<UserId>,
}

/// Outcome of an insert-if-absent vote write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteInsert {
    Inserted,
    /// A vote by the same voter already existed; nothing was written.
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct OptionCount {
    pub option_index: i32,
    pub vote_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub option_index: i64,
}
