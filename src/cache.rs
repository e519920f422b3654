//! In-process cache of rendered read views.
//!
//! A render that starts before an invalidation must not land after it. Every
//! read takes an [`Epoch`] before rendering, and [`MemoryViewCache::put`] drops
//! the render if any invalidation happened in between.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::models::PollId;
use crate::ports::ViewCache;
use crate::service::views_of;

/// Invalidation counter observed when a render started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Epoch(u64);

#[derive(Debug)]
struct Entry {
    view: Value,
    stale_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Views {
    entries: HashMap<String, Entry>,
    epoch: u64,
}

impl Views {
    fn bump(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }
}

/// Rendered JSON views keyed by logical path (`/polls`, `/polls/{id}`, ...).
#[derive(Debug, Default)]
pub struct MemoryViewCache {
    views: RwLock<Views>,
}

impl MemoryViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The view at `path`, unless it is missing or went stale before `now`.
    pub fn get(&self, path: &str, now: DateTime<Utc>) -> Option<Value> {
        let views = self.views.read().unwrap_or_else(PoisonError::into_inner);
        let entry = views.entries.get(path)?;
        if entry.stale_at.is_some_and(|at| at < now) {
            return None;
        }
        Some(entry.view.clone())
    }

    pub fn epoch(&self) -> Epoch {
        Epoch(self.views.read().unwrap_or_else(PoisonError::into_inner).epoch)
    }

    /// Store a view rendered since `epoch`. Returns `false` and stores nothing
    /// when something was invalidated in the meantime.
    pub fn put(
        &self,
        path: impl Into<String>,
        epoch: Epoch,
        view: Value,
        stale_at: Option<DateTime<Utc>>,
    ) -> bool {
        let mut views = self.views.write().unwrap_or_else(PoisonError::into_inner);
        if views.epoch != epoch.0 {
            return false;
        }
        views.entries.insert(path.into(), Entry { view, stale_at });
        true
    }

    pub fn clear(&self) {
        let mut views = self.views.write().unwrap_or_else(PoisonError::into_inner);
        views.entries.clear();
        views.bump();
    }
}

impl ViewCache for MemoryViewCache {
    fn invalidate(&self, path: &str) {
        let mut views = self.views.write().unwrap_or_else(PoisonError::into_inner);
        let removed = views.entries.remove(path).is_some();
        views.bump();
        debug!(path, removed, "view invalidated");
    }
}

/// Drop the cached views of every poll announced on `changes`. Runs until the
/// feed closes.
pub async fn evict_changed_polls(
    views: Arc<MemoryViewCache>,
    mut changes: broadcast::Receiver<PollId>,
) {
    loop {
        match changes.recv().await {
            Ok(poll_id) => {
                for path in views_of(&poll_id) {
                    views.invalidate(&path);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "vote changes missed, clearing every view");
                views.clear();
            }
            Err(RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{poll_path, results_path, POLLS_PATH};
    use crate::test_support::fixture_now;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn invalidate_drops_only_that_path() {
        let cache = MemoryViewCache::new();
        cache.put("/polls", cache.epoch(), json!([]), None);
        cache.put("/polls/abc", cache.epoch(), json!({ "id": "abc" }), None);

        cache.invalidate("/polls");

        let now = fixture_now();
        assert_eq!(cache.get("/polls", now), None);
        assert_eq!(cache.get("/polls/abc", now), Some(json!({ "id": "abc" })));
    }

    #[test]
    fn invalidating_unknown_path_is_harmless() {
        let cache = MemoryViewCache::new();
        cache.invalidate("/polls/missing");
        assert_eq!(cache.get("/polls/missing", fixture_now()), None);
    }

    #[test]
    fn render_started_before_an_invalidation_is_discarded() {
        let cache = MemoryViewCache::new();
        let epoch = cache.epoch();

        cache.invalidate("/polls");

        assert!(!cache.put("/polls", epoch, json!([{ "vote_count": 0 }]), None));
        assert_eq!(cache.get("/polls", fixture_now()), None);
        assert!(cache.put("/polls", cache.epoch(), json!([{ "vote_count": 1 }]), None));
    }

    #[test]
    fn view_goes_stale_once_its_deadline_passes() {
        let cache = MemoryViewCache::new();
        let deadline = fixture_now() + Duration::hours(1);
        cache.put("/polls/abc", cache.epoch(), json!({ "is_expired": false }), Some(deadline));

        assert!(cache.get("/polls/abc", deadline).is_some());
        assert_eq!(cache.get("/polls/abc", deadline + Duration::seconds(1)), None);
    }

    #[tokio::test]
    async fn vote_changes_evict_every_view_of_the_poll() {
        let cache = Arc::new(MemoryViewCache::new());
        let changed = PollId::random();
        let other = PollId::random();
        let paths = [
            POLLS_PATH.to_owned(),
            poll_path(&changed),
            results_path(&changed),
            poll_path(&other),
        ];
        for path in paths {
            cache.put(path, cache.epoch(), json!({}), None);
        }

        let (sender, receiver) = broadcast::channel(4);
        let evictor = tokio::spawn(evict_changed_polls(Arc::clone(&cache), receiver));
        sender.send(changed).expect("evictor is subscribed");
        drop(sender);
        evictor.await.expect("evictor finishes when the feed closes");

        let now = fixture_now();
        assert_eq!(cache.get(POLLS_PATH, now), None);
        assert_eq!(cache.get(&poll_path(&changed), now), None);
        assert_eq!(cache.get(&results_path(&changed), now), None);
        assert!(cache.get(&poll_path(&other), now).is_some());
    }
}
