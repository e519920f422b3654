//! PostgreSQL adapters for the poll store, session lookup and the vote
//! change feed.

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tracing::{debug, error, warn};

use crate::models::{
    NewPoll, NewVote, OptionCount, PollId, PollOwner, PollPatch, PollStats, PollSummary, UserId,
    VoteInsert, VoteTarget,
};
use crate::ports::{PollStore, Session, SessionError, StoreError};
use crate::results::VoteFeed;

pub const VOTE_CHANNEL: &str = "vote_changes";

const POLL_STATS: &str = r#"
    SELECT p.id, p.question, p.options, p.created_by, p.created_at, p.expires_at,
           COUNT(v.id) AS vote_count
    FROM polls p
    LEFT JOIN votes v ON v.poll_id = p.id
"#;

/// Translate a sqlx failure, keeping the database's own message.
pub fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::unique_violation(db.message())
        }
        sqlx::Error::Database(db) => StoreError::backend(db.message()),
        _ => StoreError::backend(err.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct PgPollStore {
    pool: PgPool,
}

impl PgPollStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PollStore for PgPollStore {
    async fn find_owner(&self, id: &PollId) -> Result<Option<PollOwner>, StoreError> {
        sqlx::query_as::<_, PollOwner>("SELECT id, created_by FROM polls WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn find_for_vote(&self, id: &PollId) -> Result<Option<VoteTarget>, StoreError> {
        sqlx::query_as::<_, VoteTarget>("SELECT id, options, expires_at FROM polls WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn insert_poll(&self, poll: &NewPoll) -> Result<PollSummary, StoreError> {
        sqlx::query_as::<_, PollSummary>(
            r#"
            INSERT INTO polls (question, options, created_by, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, question
            "#,
        )
        .bind(&poll.question)
        .bind(&poll.options)
        .bind(poll.created_by)
        .bind(poll.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn update_poll(
        &self,
        id: &PollId,
        patch: &PollPatch,
    ) -> Result<Option<PollSummary>, StoreError> {
        sqlx::query_as::<_, PollSummary>(
            r#"
            UPDATE polls
            SET question = $2, options = $3, expires_at = $4
            WHERE id = $1
            RETURNING id, question
            "#,
        )
        .bind(id)
        .bind(&patch.question)
        .bind(&patch.options)
        .bind(patch.expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn delete_poll(&self, id: &PollId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM polls WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn has_voted(&self, poll_id: &PollId, voter: &UserId) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM votes WHERE poll_id = $1 AND voter_id = $2)",
        )
        .bind(poll_id)
        .bind(voter)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn insert_vote(&self, vote: &NewVote) -> Result<VoteInsert, StoreError> {
        // The conflict target matches the partial unique index, so only
        // attributed votes can conflict.
        let result = sqlx::query(
            r#"
            INSERT INTO votes (poll_id, option_index, voter_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (poll_id, voter_id) WHERE voter_id IS NOT NULL DO NOTHING
            "#,
        )
        .bind(vote.poll_id)
        .bind(vote.option_index)
        .bind(vote.voter_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(if result.rows_affected() == 0 {
            VoteInsert::Conflict
        } else {
            VoteInsert::Inserted
        })
    }

    async fn vote_counts(&self, poll_id: &PollId) -> Result<Vec<OptionCount>, StoreError> {
        sqlx::query_as::<_, OptionCount>(
            r#"
            SELECT option_index, COUNT(*) AS vote_count
            FROM votes
            WHERE poll_id = $1
            GROUP BY option_index
            ORDER BY option_index
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn list_polls(&self) -> Result<Vec<PollStats>, StoreError> {
        let sql = format!("{POLL_STATS} GROUP BY p.id ORDER BY p.created_at DESC");
        sqlx::query_as::<_, PollStats>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn find_detail(&self, id: &PollId) -> Result<Option<PollStats>, StoreError> {
        let sql = format!("{POLL_STATS} WHERE p.id = $1 GROUP BY p.id");
        sqlx::query_as::<_, PollStats>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

/// Session backed by the `sessions` table, resolved from a bearer token.
#[derive(Debug, Clone)]
pub struct PgSession {
    pool: PgPool,
    token: Option<String>,
}

impl PgSession {
    pub fn new(pool: PgPool, token: Option<String>) -> Self {
        Self { pool, token }
    }
}

#[async_trait]
impl Session for PgSession {
    async fn current_user(&self) -> Result<Option<UserId>, SessionError> {
        let Some(token) = self.token.as_deref() else {
            return Ok(None);
        };
        sqlx::query_scalar::<_, UserId>(
            "SELECT user_id FROM sessions WHERE token = $1 AND expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| SessionError::Lookup {
            message: err.to_string(),
        })
    }
}

/// Forward `vote_changes` notifications into `feed` until the listener fails.
pub async fn forward_vote_changes(pool: PgPool, feed: VoteFeed) -> Result<(), sqlx::Error> {
    let mut listener = PgListener::connect_with(&pool).await?;
    listener.listen(VOTE_CHANNEL).await?;
    debug!(channel = VOTE_CHANNEL, "listening for vote changes");

    loop {
        let notification = listener.recv().await.inspect_err(|err| {
            error!(error = %err, "vote change listener failed");
        })?;
        match notification.payload().parse::<PollId>() {
            Ok(poll_id) => feed.publish(poll_id),
            Err(err) => warn!(payload = notification.payload(), error = %err, "ignoring malformed vote notification"),
        }
    }
}
