//! Command failures and the uniform result envelope returned to callers.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Every way a poll or vote command can fail. `Display` is the message shown
/// to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("{0}")]
    Invalid(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Poll not found")]
    NotFound,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("This poll has expired")]
    Expired,

    #[error("Invalid option selected")]
    InvalidOption,

    #[error("You have already voted on this poll")]
    AlreadyVoted,

    #[error("{0}")]
    Backend(String),

    #[error("Unexpected error")]
    Unexpected,
}

impl PollError {
    pub const EDIT_FORBIDDEN: &'static str = "You can only edit your own polls";
    pub const DELETE_FORBIDDEN: &'static str = "You can only delete your own polls";

    /// Backend failure carrying the store's message, or `fallback` when the
    /// store had nothing to say.
    pub fn backend(message: impl Into<String>, fallback: &str) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            Self::Backend(fallback.to_owned())
        } else {
            Self::Backend(message)
        }
    }
}

/// `{ok: true, data?}` or `{ok: false, error}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult<T = ()> {
    Ok(T),
    Err(String),
}

impl<T> ActionResult<T> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Err(message.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Ok(_) => None,
            Self::Err(message) => Some(message),
        }
    }
}

impl<T> From<Result<T, PollError>> for ActionResult<T> {
    fn from(result: Result<T, PollError>) -> Self {
        match result {
            Ok(data) => Self::Ok(data),
            Err(err) => Self::Err(err.to_string()),
        }
    }
}

/// Payloads that are omitted from the envelope entirely.
pub trait Payload {
    fn is_empty(&self) -> bool {
        false
    }
}

impl Payload for () {
    fn is_empty(&self) -> bool {
        true
    }
}

impl Payload for crate::models::PollSummary {}

impl<T: Serialize + Payload> Serialize for ActionResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Ok(data) if data.is_empty() => {
                let mut state = serializer.serialize_struct("ActionResult", 1)?;
                state.serialize_field("ok", &true)?;
                state.end()
            }
            Self::Ok(data) => {
                let mut state = serializer.serialize_struct("ActionResult", 2)?;
                state.serialize_field("ok", &true)?;
                state.serialize_field("data", data)?;
                state.end()
            }
            Self::Err(error) => {
                let mut state = serializer.serialize_struct("ActionResult", 2)?;
                state.serialize_field("ok", &false)?;
                state.serialize_field("error", error)?;
                state.end()
            }
        }
    }
}

/// Outcome of the redirect-flavoured commands: navigate on success, otherwise
/// hand the failure back for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation<T = ()> {
    Redirect(String),
    Stay(ActionResult<T>),
}

impl<T> Navigation<T> {
    pub(crate) fn after(result: ActionResult<T>, location: &str) -> Self {
        if result.is_ok() {
            Self::Redirect(location.to_owned())
        } else {
            Self::Stay(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PollId, PollSummary};
    use serde_json::json;

    #[test]
    fn unit_success_omits_data() {
        let value = serde_json::to_value(ActionResult::Ok(())).expect("serialize");
        assert_eq!(value, json!({ "ok": true }));
    }

    #[test]
    fn success_with_data_includes_it() {
        let id = PollId::random();
        let result = ActionResult::Ok(PollSummary {
            id,
            question: "Which editor do you use?".to_owned(),
        });
        let value = serde_json::to_value(result).expect("serialize");
        assert_eq!(
            value,
            json!({ "ok": true, "data": { "id": id.to_string(), "question": "Which editor do you use?" } })
        );
    }

    #[test]
    fn failure_carries_message() {
        let result: ActionResult = Err(PollError::Expired).into();
        let value = serde_json::to_value(result).expect("serialize");
        assert_eq!(value, json!({ "ok": false, "error": "This poll has expired" }));
    }

    #[test]
    fn backend_falls_back_on_blank_message() {
        assert_eq!(
            PollError::backend("  ", "Failed to create poll"),
            PollError::Backend("Failed to create poll".to_owned())
        );
        assert_eq!(
            PollError::backend("connection reset", "Failed to create poll").to_string(),
            "connection reset"
        );
    }

    #[test]
    fn navigation_only_redirects_on_success() {
        let ok: Navigation = Navigation::after(ActionResult::Ok(()), "/polls?deleted=true");
        assert_eq!(ok, Navigation::Redirect("/polls?deleted=true".to_owned()));

        let failed: Navigation =
            Navigation::after(ActionResult::failure("Unauthorized"), "/polls?deleted=true");
        assert_eq!(failed, Navigation::Stay(ActionResult::failure("Unauthorized")));
    }
}
