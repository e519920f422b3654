//! Shared fixtures for service unit tests.

use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone, Utc};
use mockable::Clock;

use crate::models::{PollInput, PollOwner, PollId, UserId};
use crate::ports::{MockPollStore, MockViewCache};
use crate::service::PollService;

pub(crate) const QUESTION: &str = "What is your favorite programming language?";

pub(crate) fn fixture_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .expect("valid fixture timestamp")
}

struct FixtureClock {
    utc_now: DateTime<Utc>,
}

impl Clock for FixtureClock {
    fn local(&self) -> DateTime<Local> {
        self.utc_now.with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        self.utc_now
    }
}

pub(crate) fn fixture_clock() -> Arc<dyn Clock + Send + Sync> {
    Arc::new(FixtureClock {
        utc_now: fixture_now(),
    })
}

pub(crate) fn make_service(
    store: MockPollStore,
    cache: MockViewCache,
) -> PollService<MockPollStore, MockViewCache> {
    PollService::new(Arc::new(store), Arc::new(cache), fixture_clock())
}

pub(crate) fn valid_input() -> PollInput {
    PollInput {
        question: QUESTION.to_owned(),
        options: vec![
            "JavaScript".to_owned(),
            "TypeScript".to_owned(),
            "Python".to_owned(),
            "Rust".to_owned(),
        ],
        expires_at: None,
    }
}

pub(crate) fn owned_by(id: PollId, owner: UserId) -> PollOwner {
    PollOwner {
        id,
        created_by: owner,
    }
}

/// A cache that expects no invalidation at all.
pub(crate) fn untouched_cache() -> MockViewCache {
    let mut cache = MockViewCache::new();
    cache.expect_invalidate().times(0);
    cache
}

/// A cache that expects exactly one invalidation of each path, in any order.
pub(crate) fn cache_expecting(paths: &[String]) -> MockViewCache {
    let mut cache = MockViewCache::new();
    for path in paths {
        let expected = path.clone();
        cache
            .expect_invalidate()
            .withf(move |p: &str| p == expected)
            .times(1)
            .return_const(());
    }
    cache
}
