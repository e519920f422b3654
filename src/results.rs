//! Read side: poll listings, poll detail and live vote tallies.

use futures_util::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::error::PollError;
use crate::models::{OptionCount, PollId, PollView};
use crate::ports::{PollStore, ViewCache};
use crate::service::{store_failure, PollService};

const FALLBACK: &str = "Failed to load results";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionResult {
    pub option_index: usize,
    pub option_text: String,
    pub vote_count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollResults {
    pub poll_id: PollId,
    pub results: Vec<OptionResult>,
    pub total_votes: i64,
}

/// Fold per-index counts into one row per option, in option order. Counts for
/// indexes the poll does not have are dropped.
pub fn project(poll_id: PollId, options: &[String], counts: &[OptionCount]) -> PollResults {
    let mut tally = vec![0_i64; options.len()];
    for count in counts {
        let Ok(index) = usize::try_from(count.option_index) else {
            continue;
        };
        if let Some(slot) = tally.get_mut(index) {
            *slot += count.vote_count;
        }
    }

    let total_votes: i64 = tally.iter().sum();
    let results = options
        .iter()
        .zip(tally)
        .enumerate()
        .map(|(option_index, (text, vote_count))| OptionResult {
            option_index,
            option_text: text.clone(),
            vote_count,
            percentage: percentage(vote_count, total_votes),
        })
        .collect();

    PollResults {
        poll_id,
        results,
        total_votes,
    }
}

fn percentage(count: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

/// In-process fan-out of vote change notifications, keyed by poll id.
#[derive(Debug, Clone)]
pub struct VoteFeed {
    sender: broadcast::Sender<PollId>,
}

impl VoteFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, poll_id: PollId) {
        // No subscribers is fine; nobody is watching that poll.
        let _ = self.sender.send(poll_id);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PollId> {
        self.sender.subscribe()
    }
}

impl Default for VoteFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

impl<S, C> PollService<S, C>
where
    S: PollStore,
    C: ViewCache,
{
    pub async fn list_polls(&self) -> Result<Vec<PollView>, PollError> {
        let now = self.now();
        let polls = self
            .store
            .list_polls()
            .await
            .map_err(|err| store_failure(err, "Failed to load polls"))?;
        Ok(polls.into_iter().map(|stats| PollView::new(stats, now)).collect())
    }

    pub async fn get_poll(&self, id: &PollId) -> Result<PollView, PollError> {
        let stats = self
            .store
            .find_detail(id)
            .await
            .map_err(|err| store_failure(err, "Failed to load poll"))?
            .ok_or(PollError::NotFound)?;
        Ok(PollView::new(stats, self.now()))
    }

    pub async fn get_results(&self, id: &PollId) -> Result<PollResults, PollError> {
        let poll = self
            .store
            .find_detail(id)
            .await
            .map_err(|err| store_failure(err, FALLBACK))?
            .ok_or(PollError::NotFound)?;
        let counts = self
            .store
            .vote_counts(id)
            .await
            .map_err(|err| store_failure(err, FALLBACK))?;
        Ok(project(*id, &poll.poll.options, &counts))
    }

    /// Current results for `poll_id`, then fresh results after every change
    /// notification for it. Ends when the feed closes or the poll is gone.
    pub fn watch_results(
        &self,
        feed: &VoteFeed,
        poll_id: PollId,
    ) -> impl Stream<Item = PollResults> + Send + 'static
    where
        S: 'static,
        C: 'static,
    {
        let service = self.clone();
        let receiver = feed.subscribe();
        stream::unfold(
            (service, receiver, true),
            move |(service, mut receiver, first)| async move {
                if !first {
                    loop {
                        match receiver.recv().await {
                            Ok(changed) if changed == poll_id => break,
                            Ok(_) => {}
                            Err(RecvError::Lagged(skipped)) => {
                                debug!(%poll_id, skipped, "results watcher lagged");
                                break;
                            }
                            Err(RecvError::Closed) => return None,
                        }
                    }
                }
                match service.get_results(&poll_id).await {
                    Ok(results) => Some((results, (service, receiver, false))),
                    Err(err) => {
                        warn!(%poll_id, error = %err, "results watcher stopped");
                        None
                    }
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Poll, PollStats, UserId};
    use crate::ports::{MockPollStore, MockViewCache};
    use crate::test_support::{fixture_now, make_service, QUESTION};
    use chrono::Duration;
    use futures_util::StreamExt;

    fn options() -> Vec<String> {
        vec!["Rust".to_owned(), "Go".to_owned(), "Zig".to_owned()]
    }

    fn stats(id: PollId, expires_at: Option<chrono::DateTime<chrono::Utc>>) -> PollStats {
        PollStats {
            poll: Poll {
                id,
                question: QUESTION.to_owned(),
                options: options(),
                created_by: UserId::random(),
                created_at: fixture_now() - Duration::days(2),
                expires_at,
            },
            vote_count: 4,
        }
    }

    #[test]
    fn projection_counts_and_percentages() {
        let id = PollId::random();
        let counts = [
            OptionCount {
                option_index: 0,
                vote_count: 3,
            },
            OptionCount {
                option_index: 2,
                vote_count: 1,
            },
        ];
        let results = project(id, &options(), &counts);

        assert_eq!(results.total_votes, 4);
        let tallies: Vec<(i64, f64)> = results
            .results
            .iter()
            .map(|r| (r.vote_count, r.percentage))
            .collect();
        assert_eq!(tallies, vec![(3, 75.0), (0, 0.0), (1, 25.0)]);
        assert_eq!(results.results[1].option_text, "Go");
    }

    #[test]
    fn projection_without_votes_is_all_zero() {
        let results = project(PollId::random(), &options(), &[]);
        assert_eq!(results.total_votes, 0);
        assert!(results.results.iter().all(|r| r.vote_count == 0 && r.percentage == 0.0));
        assert_eq!(results.results.len(), 3);
    }

    #[test]
    fn projection_ignores_out_of_range_indexes() {
        let counts = [
            OptionCount {
                option_index: -1,
                vote_count: 5,
            },
            OptionCount {
                option_index: 3,
                vote_count: 5,
            },
            OptionCount {
                option_index: 1,
                vote_count: 2,
            },
        ];
        let results = project(PollId::random(), &options(), &counts);
        assert_eq!(results.total_votes, 2);
        assert_eq!(results.results[1].percentage, 100.0);
    }

    #[tokio::test]
    async fn list_marks_expired_polls() {
        let open = PollId::random();
        let closed = PollId::random();
        let mut store = MockPollStore::new();
        store.expect_list_polls().times(1).return_once(move || {
            Ok(vec![
                stats(open, None),
                stats(closed, Some(fixture_now() - Duration::hours(1))),
            ])
        });

        let service = make_service(store, MockViewCache::new());
        let polls = service.list_polls().await.expect("listing loads");
        let flags: Vec<(PollId, bool)> = polls.iter().map(|p| (p.poll.id, p.is_expired)).collect();
        assert_eq!(flags, vec![(open, false), (closed, true)]);
    }

    #[tokio::test]
    async fn results_for_missing_poll_is_not_found() {
        let mut store = MockPollStore::new();
        store.expect_find_detail().times(1).return_once(|_| Ok(None));
        store.expect_vote_counts().times(0);

        let service = make_service(store, MockViewCache::new());
        let err = service
            .get_results(&PollId::random())
            .await
            .expect_err("missing poll");
        assert_eq!(err, PollError::NotFound);
    }

    #[tokio::test]
    async fn watcher_refreshes_on_matching_notifications_only() {
        let id = PollId::random();
        let mut store = MockPollStore::new();
        store
            .expect_find_detail()
            .times(2)
            .returning(move |_| Ok(Some(stats(id, None))));
        let mut calls = 0;
        store.expect_vote_counts().times(2).returning(move |_| {
            calls += 1;
            Ok(vec![OptionCount {
                option_index: 0,
                vote_count: calls,
            }])
        });

        let service = make_service(store, MockViewCache::new());
        let feed = VoteFeed::new(8);
        let mut watcher = Box::pin(service.watch_results(&feed, id));

        let initial = watcher.next().await.expect("initial results");
        assert_eq!(initial.total_votes, 1);

        feed.publish(PollId::random());
        feed.publish(id);
        let refreshed = watcher.next().await.expect("refreshed results");
        assert_eq!(refreshed.total_votes, 2);

        drop(feed);
        assert!(watcher.next().await.is_none());
    }
}
