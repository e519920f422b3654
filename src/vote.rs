//! Vote submission.
//!
//! Checks run in a fixed order: the poll must exist, must not have expired,
//! and the option index must be in range. Only then is the caller resolved,
//! and anonymous callers are allowed through.
//!
//! The existence check for authenticated voters is a fast path only. Two
//! concurrent requests can both pass it; the store's insert-if-absent keyed by
//! (poll, voter) decides which one wins, and the loser gets the same
//! already-voted message. Anonymous votes are never deduplicated.

use tracing::{debug, info, warn};

use crate::error::{ActionResult, PollError};
use crate::models::{NewVote, PollId, VoteInsert};
use crate::ports::{PollStore, Session, StoreError, ViewCache};
use crate::service::{store_failure, PollService};

const FALLBACK: &str = "Failed to submit vote";

impl<S, C> PollService<S, C>
where
    S: PollStore,
    C: ViewCache,
{
    pub async fn submit_vote(
        &self,
        session: &impl Session,
        poll_id: &PollId,
        option_index: i64,
    ) -> ActionResult {
        let result = self.try_vote(session, poll_id, option_index).await;
        if let Err(err) = &result {
            warn!(poll_id = %poll_id, option_index, error = %err, "vote rejected");
        }
        result.into()
    }

    async fn try_vote(
        &self,
        session: &impl Session,
        poll_id: &PollId,
        option_index: i64,
    ) -> Result<(), PollError> {
        let poll = self
            .store
            .find_for_vote(poll_id)
            .await
            .map_err(|err| store_failure(err, FALLBACK))?
            .ok_or(PollError::NotFound)?;

        if poll.expires_at.is_some_and(|at| at < self.now()) {
            return Err(PollError::Expired);
        }

        let option_index = usize::try_from(option_index)
            .ok()
            .filter(|index| *index < poll.options.len())
            .and_then(|index| i32::try_from(index).ok())
            .ok_or(PollError::InvalidOption)?;

        let voter = self.caller(session).await?;
        if let Some(voter) = &voter {
            let voted = self
                .store
                .has_voted(poll_id, voter)
                .await
                .map_err(|err| store_failure(err, FALLBACK))?;
            if voted {
                return Err(PollError::AlreadyVoted);
            }
        }

        let vote = NewVote {
            poll_id: *poll_id,
            option_index,
            voter_id: voter,
        };
        match self.store.insert_vote(&vote).await {
            Ok(VoteInsert::Inserted) => {}
            Ok(VoteInsert::Conflict) | Err(StoreError::UniqueViolation { .. }) => {
                debug!(poll_id = %poll_id, "duplicate vote lost the insert race");
                return Err(PollError::AlreadyVoted);
            }
            Err(err) => return Err(store_failure(err, FALLBACK)),
        }

        self.invalidate_views_of(poll_id);
        info!(poll_id = %poll_id, option_index, anonymous = voter.is_none(), "vote recorded");
        Ok(())
    }
}

#[cfg(test)]
#[path = "vote_tests.rs"]
mod tests;
