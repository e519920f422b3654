//! Poll input validation and option normalization.
//!
//! Validation reports the first violation against what the caller typed;
//! normalization then produces the canonical option list that is persisted.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::PollError;
use crate::models::{PollDraft, PollInput};

pub const QUESTION_MIN: usize = 10;
pub const QUESTION_MAX: usize = 280;
pub const OPTIONS_MIN: usize = 2;
pub const OPTIONS_MAX: usize = 10;
pub const OPTION_MAX: usize = 80;

/// Formats accepted from `<input type="datetime-local">`, read as UTC.
const LOCAL_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];

/// Check a create/update payload and return the typed draft.
pub fn validate_poll(input: &PollInput, now: DateTime<Utc>) -> Result<PollDraft, PollError> {
    let question = input.question.trim();
    let length = question.chars().count();
    if length < QUESTION_MIN {
        return Err(invalid("Question must be at least 10 characters"));
    }
    if length > QUESTION_MAX {
        return Err(invalid("Question must be less than 280 characters"));
    }

    if input.options.len() < OPTIONS_MIN {
        return Err(invalid("Must have at least 2 options"));
    }
    if input.options.len() > OPTIONS_MAX {
        return Err(invalid("Cannot have more than 10 options"));
    }

    let mut seen = HashSet::with_capacity(input.options.len());
    if !input.options.iter().all(|opt| seen.insert(fold(opt))) {
        return Err(invalid("Options must be unique (case-insensitive)"));
    }

    for option in &input.options {
        let option = option.trim();
        if option.is_empty() {
            return Err(invalid("Option cannot be empty"));
        }
        if option.chars().count() > OPTION_MAX {
            return Err(invalid("Option must be less than 80 characters"));
        }
    }

    let expires_at = match input.expires_at.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => {
            let at = parse_expiration(raw).ok_or_else(|| invalid("Invalid expiration date"))?;
            if at <= now {
                return Err(invalid("Expiration date must be in the future"));
            }
            Some(at)
        }
    };

    Ok(PollDraft {
        question: question.to_owned(),
        options: input.options.clone(),
        expires_at,
    })
}

/// Trim every option and drop later case-insensitive repeats.
pub fn normalize_options(options: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(options.len());
    options
        .iter()
        .map(|opt| opt.trim())
        .filter(|opt| seen.insert(opt.to_lowercase()))
        .map(str::to_owned)
        .collect()
}

pub fn parse_expiration(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn fold(option: &str) -> String {
    option.trim().to_lowercase()
}

fn invalid(message: &str) -> PollError {
    PollError::Invalid(message.to_owned())
}
