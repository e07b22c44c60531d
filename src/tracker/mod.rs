//! Completion tracking for external jobs, driven by the change feed.
//!
//! A [`CompletionTracker`] answers one question for one resource: has the job
//! that was started on it finished? The flag moves from `false` to `true` at
//! most once per [`CompletionTracker::start_watching`] call.

mod rules;
mod session;
mod types;

pub use rules::{CompletionRule, RecordInserted, SubItemGrowth};
pub use types::{WatchSnapshot, WatchStatus};

use crate::config::TrackerSettings;
use crate::events::ChangeFeedClient;
use crate::logging::{log_debug, log_error};
use session::{SessionRunner, Shared, COMPONENT};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub struct CompletionTracker {
    feed: Arc<dyn ChangeFeedClient>,
    rule: Arc<dyn CompletionRule>,
    collection: String,
    settings: TrackerSettings,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CompletionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionTracker")
            .field("feed", &"<change feed>")
            .field("rule", &"<completion rule>")
            .field("collection", &self.collection)
            .field("settings", &self.settings)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl CompletionTracker {
    pub fn new(
        feed: Arc<dyn ChangeFeedClient>,
        collection: impl Into<String>,
        rule: impl CompletionRule,
    ) -> Self {
        Self {
            feed,
            rule: Arc::new(rule),
            collection: collection.into(),
            settings: TrackerSettings::default(),
            shared: Arc::new(Shared::new()),
        }
    }

    pub fn with_settings(mut self, settings: TrackerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Begin a new watch session, superseding any previous one.
    ///
    /// Inert when `trigger_active` is false or `resource_id` is absent: the
    /// previous session is still torn down and the flag stays false. Outside
    /// a Tokio runtime the new session fails immediately.
    pub fn start_watching(&self, resource_id: Option<&str>, trigger_active: bool) {
        let resource_id = resource_id.filter(|id| !id.is_empty());

        let (released, runner) = {
            let mut state = self.shared.lock();
            let released = state.teardown();

            let runner = match resource_id {
                Some(id) if trigger_active => {
                    let cancel = CancellationToken::new();
                    state.cancel = Some(cancel.clone());
                    state.snapshot = WatchSnapshot::initializing(id);

                    Some(SessionRunner {
                        generation: state.generation,
                        resource_id: id.to_string(),
                        collection: self.collection.clone(),
                        kinds: self.rule.kinds(),
                        feed: Arc::clone(&self.feed),
                        rule: Arc::clone(&self.rule),
                        settings: self.settings.clone(),
                        shared: Arc::clone(&self.shared),
                        cancel,
                    })
                }
                _ => None,
            };

            self.shared.publish(&state.snapshot);
            (released, runner)
        };
        drop(released);

        let Some(runner) = runner else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(runner.run());
            }
            Err(e) => {
                let message = format!("No async runtime available: {}", e);
                let mut state = self.shared.lock();
                if state.generation == runner.generation {
                    state.snapshot.status = WatchStatus::Errored;
                    state.snapshot.error = Some(message.clone());
                    state.cancel = None;
                    self.shared.publish(&state.snapshot);
                }
                drop(state);
                log_error(COMPONENT, &message).unwrap_or_default();
            }
        }
    }

    /// Release the subscription and return to idle. Idempotent.
    pub fn stop_watching(&self) {
        let released = {
            let mut state = self.shared.lock();
            let released = state.teardown();
            self.shared.publish(&state.snapshot);
            released
        };

        if let Some(handle) = released {
            log_debug(
                COMPONENT,
                &format!("Releasing subscription {}", handle.id()),
            )
            .unwrap_or_default();
        }
    }

    pub fn completed(&self) -> bool {
        self.shared.lock().snapshot.completed
    }

    pub fn error(&self) -> Option<String> {
        self.shared.lock().snapshot.error.clone()
    }

    pub fn status(&self) -> WatchStatus {
        self.shared.lock().snapshot.status
    }

    pub fn baseline(&self) -> Option<i64> {
        self.shared.lock().snapshot.baseline_metric
    }

    pub fn resource_id(&self) -> Option<String> {
        self.shared.lock().snapshot.resource_id.clone()
    }

    pub fn snapshot(&self) -> WatchSnapshot {
        self.shared.lock().snapshot.clone()
    }

    /// Receive every snapshot change, for UI bindings
    pub fn subscribe(&self) -> watch::Receiver<WatchSnapshot> {
        self.shared.subscribe()
    }
}

impl Drop for CompletionTracker {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryFeed;
    use serde_json::json;
    use tokio::time::{timeout, Duration};

    async fn wait_for(tracker: &CompletionTracker, status: WatchStatus) {
        let mut rx = tracker.subscribe();
        timeout(Duration::from_secs(2), async {
            while rx.borrow_and_update().status != status {
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("tracker never reached expected status");
    }

    async fn wait_for_baseline(tracker: &CompletionTracker) {
        let mut rx = tracker.subscribe();
        timeout(Duration::from_secs(2), async {
            while rx.borrow_and_update().baseline_metric.is_none() {
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("baseline never resolved");
    }

    #[tokio::test]
    async fn test_inert_without_trigger_or_id() {
        let feed = Arc::new(MemoryFeed::new(16));
        let tracker = CompletionTracker::new(feed.clone(), "projects", SubItemGrowth::new("images"));

        tracker.start_watching(Some("42"), false);
        assert_eq!(tracker.status(), WatchStatus::Idle);

        tracker.start_watching(None, true);
        assert_eq!(tracker.status(), WatchStatus::Idle);

        tracker.start_watching(Some(""), true);
        assert_eq!(tracker.status(), WatchStatus::Idle);

        tokio::task::yield_now().await;
        assert_eq!(feed.active_subscriptions(), 0);
        assert!(!tracker.completed());
    }

    #[tokio::test]
    async fn test_growth_completes_once() {
        let feed = Arc::new(MemoryFeed::new(16));
        feed.seed("projects", "42", json!({"images": ["a", "b"]}));

        let tracker = CompletionTracker::new(feed.clone(), "projects", SubItemGrowth::new("images"));
        tracker.start_watching(Some("42"), true);
        wait_for_baseline(&tracker).await;
        assert_eq!(tracker.baseline(), Some(2));
        assert_eq!(tracker.status(), WatchStatus::Watching);

        feed.upsert("projects", "42", json!({"images": ["a", "b", "c"]}));
        wait_for(&tracker, WatchStatus::Completed).await;
        assert!(tracker.completed());
        assert_eq!(feed.active_subscriptions(), 0);

        // A shrink afterwards never reverts the flag
        feed.upsert("projects", "42", json!({"images": []}));
        tokio::task::yield_now().await;
        assert!(tracker.completed());
    }

    #[tokio::test]
    async fn test_stop_watching_is_idempotent_and_releases() {
        let feed = Arc::new(MemoryFeed::new(16));
        let tracker = CompletionTracker::new(feed.clone(), "projects", SubItemGrowth::new("images"));

        tracker.start_watching(Some("42"), true);
        wait_for(&tracker, WatchStatus::Watching).await;
        assert_eq!(feed.active_subscriptions(), 1);

        tracker.stop_watching();
        assert_eq!(feed.active_subscriptions(), 0);
        assert_eq!(tracker.status(), WatchStatus::Idle);

        tracker.stop_watching();
        assert_eq!(tracker.status(), WatchStatus::Idle);
    }

    #[tokio::test]
    async fn test_disconnect_sets_error() {
        let feed = Arc::new(MemoryFeed::new(16));
        let tracker = CompletionTracker::new(feed.clone(), "projects", SubItemGrowth::new("images"));

        tracker.start_watching(Some("42"), true);
        wait_for(&tracker, WatchStatus::Watching).await;

        feed.disconnect_all("socket reset");
        wait_for(&tracker, WatchStatus::Errored).await;

        let error = tracker.error().unwrap();
        assert!(error.contains("socket reset"));
        assert!(!tracker.completed());
        assert_eq!(feed.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_restart_clears_previous_outcome() {
        let feed = Arc::new(MemoryFeed::new(16));
        feed.seed("projects", "42", json!({"images": 1}));
        let tracker = CompletionTracker::new(feed.clone(), "projects", SubItemGrowth::new("images"));

        tracker.start_watching(Some("42"), true);
        wait_for_baseline(&tracker).await;
        feed.upsert("projects", "42", json!({"images": 2}));
        wait_for(&tracker, WatchStatus::Completed).await;

        tracker.start_watching(Some("42"), true);
        assert!(!tracker.completed());
        assert_eq!(tracker.error(), None);
        wait_for_baseline(&tracker).await;
        assert_eq!(tracker.baseline(), Some(2));
    }

    #[test]
    fn test_start_without_runtime_reports_error() {
        let feed = Arc::new(MemoryFeed::new(16));
        let tracker = CompletionTracker::new(feed, "projects", RecordInserted);

        tracker.start_watching(Some("1"), true);
        assert_eq!(tracker.status(), WatchStatus::Errored);
        assert!(tracker.error().unwrap().contains("runtime"));
    }
}
