//! Poll lifecycle commands.
//!
//! Update and delete take the target as `Option<PollId>`. An id that could not
//! be parsed is reported as a missing poll once validation and the session
//! check have passed.

use tracing::{info, warn};

use crate::error::{ActionResult, Navigation, PollError};
use crate::models::{NewPoll, PollId, PollInput, PollPatch, PollSummary, UserId};
use crate::ports::{PollStore, Session, ViewCache};
use crate::service::{store_failure, PollService, POLLS_PATH};
use crate::validation::{normalize_options, validate_poll};

pub const CREATED_LOCATION: &str = "/polls?created=true";
pub const UPDATED_LOCATION: &str = "/polls?updated=true";
pub const DELETED_LOCATION: &str = "/polls?deleted=true";

impl<S, C> PollService<S, C>
where
    S: PollStore,
    C: ViewCache,
{
    pub async fn create_poll(
        &self,
        session: &impl Session,
        input: &PollInput,
    ) -> ActionResult<PollSummary> {
        let result = self.try_create(session, input).await;
        if let Err(err) = &result {
            warn!(error = %err, "create poll rejected");
        }
        result.into()
    }

    /// Create, then navigate to the listing on success.
    pub async fn create_poll_and_redirect(
        &self,
        session: &impl Session,
        input: &PollInput,
    ) -> Navigation<PollSummary> {
        Navigation::after(self.create_poll(session, input).await, CREATED_LOCATION)
    }

    pub async fn update_poll(
        &self,
        session: &impl Session,
        id: Option<PollId>,
        input: &PollInput,
    ) -> ActionResult<PollSummary> {
        let result = self.try_update(session, id, input).await;
        if let Err(err) = &result {
            warn!(poll_id = ?id, error = %err, "update poll rejected");
        }
        result.into()
    }

    pub async fn update_poll_and_redirect(
        &self,
        session: &impl Session,
        id: Option<PollId>,
        input: &PollInput,
    ) -> Navigation<PollSummary> {
        Navigation::after(self.update_poll(session, id, input).await, UPDATED_LOCATION)
    }

    pub async fn delete_poll(&self, session: &impl Session, id: Option<PollId>) -> ActionResult {
        let result = self.try_delete(session, id).await;
        if let Err(err) = &result {
            warn!(poll_id = ?id, error = %err, "delete poll rejected");
        }
        result.into()
    }

    pub async fn delete_poll_and_redirect(
        &self,
        session: &impl Session,
        id: Option<PollId>,
    ) -> Navigation {
        Navigation::after(self.delete_poll(session, id).await, DELETED_LOCATION)
    }

    async fn try_create(
        &self,
        session: &impl Session,
        input: &PollInput,
    ) -> Result<PollSummary, PollError> {
        let draft = validate_poll(input, self.now())?;
        let creator = self.require_caller(session).await?;

        let poll = NewPoll {
            question: draft.question,
            options: normalize_options(&draft.options),
            created_by: creator,
            expires_at: draft.expires_at,
        };
        let created = self
            .store
            .insert_poll(&poll)
            .await
            .map_err(|err| store_failure(err, "Failed to create poll"))?;

        self.invalidate(POLLS_PATH);
        info!(poll_id = %created.id, user_id = %creator, "poll created");
        Ok(created)
    }

    async fn try_update(
        &self,
        session: &impl Session,
        id: Option<PollId>,
        input: &PollInput,
    ) -> Result<PollSummary, PollError> {
        let draft = validate_poll(input, self.now())?;
        let caller = self.require_caller(session).await?;
        let id = self
            .ensure_owner(id, &caller, PollError::EDIT_FORBIDDEN, "Failed to update poll")
            .await?;

        let patch = PollPatch {
            question: draft.question,
            options: normalize_options(&draft.options),
            expires_at: draft.expires_at,
        };
        let updated = self
            .store
            .update_poll(&id, &patch)
            .await
            .map_err(|err| store_failure(err, "Failed to update poll"))?
            .ok_or(PollError::NotFound)?;

        self.invalidate_views_of(&id);
        info!(poll_id = %id, user_id = %caller, "poll updated");
        Ok(updated)
    }

    async fn try_delete(&self, session: &impl Session, id: Option<PollId>) -> Result<(), PollError> {
        let caller = self.require_caller(session).await?;
        let id = self
            .ensure_owner(id, &caller, PollError::DELETE_FORBIDDEN, "Failed to delete poll")
            .await?;

        self.store
            .delete_poll(&id)
            .await
            .map_err(|err| store_failure(err, "Failed to delete poll"))?;

        self.invalidate_views_of(&id);
        info!(poll_id = %id, user_id = %caller, "poll deleted");
        Ok(())
    }

    /// Resolve the target and check `caller` created it.
    async fn ensure_owner(
        &self,
        id: Option<PollId>,
        caller: &UserId,
        forbidden: &'static str,
        fallback: &str,
    ) -> Result<PollId, PollError> {
        let id = id.ok_or(PollError::NotFound)?;
        let owner = self
            .store
            .find_owner(&id)
            .await
            .map_err(|err| store_failure(err, fallback))?
            .ok_or(PollError::NotFound)?;
        if owner.created_by != *caller {
            return Err(PollError::Forbidden(forbidden));
        }
        Ok(id)
    }
}

#[cfg(test)]
#[path = "poll_tests.rs"]
mod tests;
