//! One watch session: subscribe, read the baseline, evaluate notifications.
//!
//! Every state change goes through [`SessionRunner::apply`], which drops the
//! update when the tracker has since moved on to another generation. That is
//! what keeps a released session from touching the tracker's state even if
//! its task has not observed the cancellation yet.

use super::rules::CompletionRule;
use super::types::{WatchSnapshot, WatchStatus};
use crate::config::{PreBaselinePolicy, TrackerSettings};
use crate::error::ContentDeskError;
use crate::events::{
    ChangeEvent, ChangeFeedClient, ChangeKind, FeedError, FeedFilter, SubscriptionHandle,
};
use crate::logging::{log_error, log_info, log_warn};
use futures::StreamExt;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub(super) const COMPONENT: &str = "completion-tracker";

#[derive(Debug, Default)]
pub(super) struct TrackerState {
    pub(super) generation: u64,
    pub(super) snapshot: WatchSnapshot,
    pub(super) handle: Option<SubscriptionHandle>,
    pub(super) cancel: Option<CancellationToken>,
}

impl TrackerState {
    /// End the current session. The returned handle must be dropped by the
    /// caller once the lock is released.
    pub(super) fn teardown(&mut self) -> Option<SubscriptionHandle> {
        self.generation += 1;
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.snapshot = WatchSnapshot::default();
        self.handle.take()
    }
}

#[derive(Debug)]
pub(super) struct Shared {
    state: Mutex<TrackerState>,
    updates: watch::Sender<WatchSnapshot>,
}

impl Shared {
    pub(super) fn new() -> Self {
        let (updates, _) = watch::channel(WatchSnapshot::default());
        Self {
            state: Mutex::new(TrackerState::default()),
            updates,
        }
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn publish(&self, snapshot: &WatchSnapshot) {
        self.updates.send_replace(snapshot.clone());
    }

    pub(super) fn subscribe(&self) -> watch::Receiver<WatchSnapshot> {
        self.updates.subscribe()
    }
}

enum Baseline {
    /// Read outstanding; notifications held here under the buffer policy
    Pending(Vec<ChangeEvent>),
    Known(i64),
    /// Read failed or the row had no usable metric; detection is off
    Unavailable,
}

enum Flow {
    Continue,
    Stop,
}

pub(super) struct SessionRunner {
    pub(super) generation: u64,
    pub(super) resource_id: String,
    pub(super) collection: String,
    pub(super) kinds: Vec<ChangeKind>,
    pub(super) feed: Arc<dyn ChangeFeedClient>,
    pub(super) rule: Arc<dyn CompletionRule>,
    pub(super) settings: TrackerSettings,
    pub(super) shared: Arc<Shared>,
    pub(super) cancel: CancellationToken,
}

impl SessionRunner {
    /// Run `f` against the tracker state only if this session is still current
    fn apply<R>(&self, f: impl FnOnce(&mut TrackerState) -> R) -> Option<R> {
        let mut state = self.shared.lock();
        if state.generation != self.generation {
            return None;
        }
        let result = f(&mut state);
        self.shared.publish(&state.snapshot);
        Some(result)
    }

    pub(super) async fn run(self) {
        let mut filter = FeedFilter::new(self.kinds.clone());
        if self.settings.server_side_id_filter {
            filter = filter.with_resource_id(self.resource_id.as_str());
        }

        let subscription = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = self.feed.subscribe(&self.collection, filter) => result,
        };

        let subscription = match subscription {
            Ok(subscription) => subscription,
            Err(e) => {
                self.fail(&e);
                return;
            }
        };

        let (handle, mut events) = subscription.into_parts();
        let attached = self.apply(move |state| {
            state.handle = Some(handle);
            state.snapshot.status = WatchStatus::Watching;
        });
        // Superseded while subscribing; the handle was dropped with the closure
        if attached.is_none() {
            return;
        }

        log_info(
            COMPONENT,
            &format!(
                "👀 Watching {}/{} for completion",
                self.collection, self.resource_id
            ),
        )
        .unwrap_or_default();

        let feed = Arc::clone(&self.feed);
        let baseline_read = feed.read_one(&self.collection, &self.resource_id);
        tokio::pin!(baseline_read);

        let mut baseline = Baseline::Pending(Vec::new());
        let mut baseline_resolved = false;

        loop {
            let flow = tokio::select! {
                _ = self.cancel.cancelled() => Flow::Stop,
                result = &mut baseline_read, if !baseline_resolved => {
                    baseline_resolved = true;
                    self.on_baseline(result, &mut baseline)
                }
                next = events.next() => match next {
                    Some(Ok(event)) => self.on_notification(event, &mut baseline),
                    Some(Err(e)) => {
                        self.fail(&e);
                        Flow::Stop
                    }
                    None => {
                        if !self.cancel.is_cancelled() {
                            self.fail(&FeedError::Disconnected("change feed closed".to_string()));
                        }
                        Flow::Stop
                    }
                },
            };

            if let Flow::Stop = flow {
                break;
            }
        }
    }

    fn on_baseline(
        &self,
        result: Result<Option<Value>, FeedError>,
        baseline: &mut Baseline,
    ) -> Flow {
        let buffered = match std::mem::replace(baseline, Baseline::Unavailable) {
            Baseline::Pending(buffered) => buffered,
            _ => Vec::new(),
        };

        let record = match result {
            Ok(record) => record,
            Err(e) => {
                let error = ContentDeskError::BaselineRead(format!("{}: {}", self.resource_id, e));
                log_error(
                    COMPONENT,
                    &format!("✗ {}, completion detection disabled", error),
                )
                .unwrap_or_default();
                return Flow::Continue;
            }
        };

        let Some(metric) = self.rule.baseline(record.as_ref()) else {
            log_warn(
                COMPONENT,
                &format!(
                    "⚠ Row {} has no usable metric, completion detection disabled",
                    self.resource_id
                ),
            )
            .unwrap_or_default();
            return Flow::Continue;
        };

        *baseline = Baseline::Known(metric);
        if self
            .apply(|state| state.snapshot.baseline_metric = Some(metric))
            .is_none()
        {
            return Flow::Stop;
        }

        tracing::debug!(
            component = COMPONENT,
            resource_id = %self.resource_id,
            baseline = metric,
            buffered = buffered.len(),
            "baseline resolved"
        );

        for event in buffered {
            if let Flow::Stop = self.evaluate(metric, &event) {
                return Flow::Stop;
            }
        }

        Flow::Continue
    }

    fn on_notification(&self, event: ChangeEvent, baseline: &mut Baseline) -> Flow {
        // Feeds without server-side id filtering deliver the whole collection
        if event.resource_id != self.resource_id || !self.kinds.contains(&event.kind) {
            return Flow::Continue;
        }

        match baseline {
            Baseline::Known(metric) => self.evaluate(*metric, &event),
            Baseline::Pending(buffered) => {
                match self.settings.pre_baseline_policy {
                    PreBaselinePolicy::Buffer => buffered.push(event),
                    PreBaselinePolicy::Drop => tracing::debug!(
                        component = COMPONENT,
                        sequence = event.sequence,
                        "dropping notification received before baseline"
                    ),
                }
                Flow::Continue
            }
            Baseline::Unavailable => Flow::Continue,
        }
    }

    fn evaluate(&self, metric: i64, event: &ChangeEvent) -> Flow {
        if !self
            .rule
            .is_satisfied(metric, event.old.as_ref(), &event.new)
        {
            return Flow::Continue;
        }

        let released = self.apply(|state| {
            if state.snapshot.completed {
                return None;
            }
            state.snapshot.completed = true;
            state.snapshot.status = WatchStatus::Completed;
            state.cancel = None;
            state.handle.take()
        });

        if let Some(Some(handle)) = released {
            drop(handle);
            log_info(
                COMPONENT,
                &format!(
                    "✓ {}/{} completed (event {})",
                    self.collection, self.resource_id, event.sequence
                ),
            )
            .unwrap_or_default();
        }

        Flow::Stop
    }

    fn fail(&self, error: &FeedError) {
        let error = ContentDeskError::Subscription(error.clone());
        let released = self.apply(|state| {
            state.snapshot.status = WatchStatus::Errored;
            state.snapshot.error = Some(error.to_string());
            state.cancel = None;
            state.handle.take()
        });

        if released.is_some() {
            log_error(
                COMPONENT,
                &format!("✗ Watch on {} failed: {}", self.resource_id, error),
            )
            .unwrap_or_default();
        }
    }
}
