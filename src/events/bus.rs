use super::types::{ChangeEvent, ChangeKind, EventSequence, FeedFilter};
use super::{ChangeFeedClient, FeedError, Subscription, SubscriptionHandle};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
enum FeedMessage {
    Change(ChangeEvent),
    Disconnected(String),
}

type RecordKey = (String, String);

/// In-process change feed. Rows written through [`MemoryFeed::upsert`] are
/// stored for `read_one` and broadcast to every matching subscriber.
#[derive(Clone, Debug)]
pub struct MemoryFeed {
    sender: broadcast::Sender<FeedMessage>,
    sequence: Arc<AtomicU64>,
    next_subscription: Arc<AtomicU64>,
    records: Arc<Mutex<HashMap<RecordKey, Value>>>,
    active: Arc<Mutex<HashSet<u64>>>,
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

impl MemoryFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(1)),
            next_subscription: Arc::new(AtomicU64::new(1)),
            records: Arc::new(Mutex::new(HashMap::new())),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Store a row without notifying anyone
    pub fn seed(&self, collection: &str, resource_id: &str, record: Value) {
        if let Ok(mut records) = self.records.lock() {
            records.insert((collection.to_string(), resource_id.to_string()), record);
        }
    }

    /// Write a row and publish an insert or update (returns sequence number)
    pub fn upsert(&self, collection: &str, resource_id: &str, record: Value) -> EventSequence {
        let old = self.records.lock().ok().and_then(|mut records| {
            records.insert(
                (collection.to_string(), resource_id.to_string()),
                record.clone(),
            )
        });

        let kind = if old.is_some() {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };

        self.publish(collection, resource_id, kind, old, record)
    }

    /// Publish a notification without touching stored rows
    pub fn publish(
        &self,
        collection: &str,
        resource_id: &str,
        kind: ChangeKind,
        old: Option<Value>,
        new: Value,
    ) -> EventSequence {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        let event = ChangeEvent {
            sequence,
            timestamp: Utc::now(),
            collection: collection.to_string(),
            kind,
            resource_id: resource_id.to_string(),
            old,
            new,
        };

        // No receivers is fine; nobody is watching
        let _ = self.sender.send(FeedMessage::Change(event));
        sequence
    }

    /// Report a lost connection to every open subscription
    pub fn disconnect_all(&self, reason: &str) {
        let _ = self.sender.send(FeedMessage::Disconnected(reason.to_string()));
    }

    /// Number of subscriptions that have not been released
    pub fn active_subscriptions(&self) -> usize {
        self.active.lock().map(|active| active.len()).unwrap_or(0)
    }

    pub fn current_sequence(&self) -> EventSequence {
        self.sequence.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeFeedClient for MemoryFeed {
    async fn subscribe(
        &self,
        collection: &str,
        filter: FeedFilter,
    ) -> Result<Subscription, FeedError> {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        let open = Arc::new(AtomicBool::new(true));
        let rx = self.sender.subscribe();

        self.active
            .lock()
            .map_err(|e| FeedError::Request(e.to_string()))?
            .insert(id);

        let handle = {
            let open = Arc::clone(&open);
            let active = Arc::clone(&self.active);
            SubscriptionHandle::new(id, move || {
                open.store(false, Ordering::SeqCst);
                if let Ok(mut active) = active.lock() {
                    active.remove(&id);
                }
            })
        };

        let collection = collection.to_string();
        let events = stream::unfold(
            (rx, filter, collection, open),
            |(mut rx, filter, collection, open)| async move {
                loop {
                    if !open.load(Ordering::SeqCst) {
                        return None;
                    }

                    let item = match rx.recv().await {
                        Ok(FeedMessage::Change(event)) => {
                            if event.collection != collection || !filter.matches(&event) {
                                continue;
                            }
                            Ok(event)
                        }
                        Ok(FeedMessage::Disconnected(reason)) => {
                            // Stream ends after reporting the loss
                            open.store(false, Ordering::SeqCst);
                            Err(FeedError::Disconnected(reason))
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => Err(FeedError::Lagged(n)),
                        Err(broadcast::error::RecvError::Closed) => return None,
                    };

                    // Released while waiting
                    if item.is_ok() && !open.load(Ordering::SeqCst) {
                        return None;
                    }

                    return Some((item, (rx, filter, collection, open)));
                }
            },
        );

        Ok(Subscription::new(handle, Box::pin(events)))
    }

    async fn read_one(
        &self,
        collection: &str,
        resource_id: &str,
    ) -> Result<Option<Value>, FeedError> {
        let records = self
            .records
            .lock()
            .map_err(|e| FeedError::Request(e.to_string()))?;
        Ok(records
            .get(&(collection.to_string(), resource_id.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_upsert_publishes_insert_then_update() {
        let feed = MemoryFeed::new(16);
        let mut sub = feed
            .subscribe("projects", FeedFilter::default())
            .await
            .unwrap();

        let seq1 = feed.upsert("projects", "42", json!({"images": []}));
        let seq2 = feed.upsert("projects", "42", json!({"images": ["a.png"]}));
        assert_eq!(seq2, seq1 + 1);

        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.kind, ChangeKind::Insert);
        assert!(first.old.is_none());

        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second.kind, ChangeKind::Update);
        assert_eq!(second.old, Some(json!({"images": []})));
        assert_eq!(second.new, json!({"images": ["a.png"]}));
    }

    #[tokio::test]
    async fn test_subscription_filters_collection_and_id() {
        let feed = MemoryFeed::new(16);
        let filter = FeedFilter::new([ChangeKind::Update]).with_resource_id("42");
        let mut sub = feed.subscribe("projects", filter).await.unwrap();

        feed.seed("projects", "42", json!({"count": 1}));
        feed.upsert("articles", "42", json!({"count": 9}));
        feed.upsert("projects", "7", json!({"count": 9}));
        feed.upsert("projects", "42", json!({"count": 2}));

        let event = sub.next().await.unwrap().unwrap();
        assert_eq!(event.collection, "projects");
        assert_eq!(event.resource_id, "42");
        assert_eq!(event.new, json!({"count": 2}));
    }

    #[tokio::test]
    async fn test_read_one() {
        let feed = MemoryFeed::default();
        assert_eq!(feed.read_one("projects", "1").await.unwrap(), None);

        feed.seed("projects", "1", json!({"title": "Spring launch"}));
        assert_eq!(
            feed.read_one("projects", "1").await.unwrap(),
            Some(json!({"title": "Spring launch"}))
        );
    }

    #[tokio::test]
    async fn test_release_is_immediate() {
        let feed = MemoryFeed::new(16);
        let sub = feed
            .subscribe("projects", FeedFilter::default())
            .await
            .unwrap();
        assert_eq!(feed.active_subscriptions(), 1);

        let (handle, mut events) = sub.into_parts();
        feed.upsert("projects", "1", json!({}));
        handle.unsubscribe();
        assert_eq!(feed.active_subscriptions(), 0);

        // Already-queued notifications are not delivered after release
        let next = timeout(Duration::from_millis(100), events.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream_with_error() {
        let feed = MemoryFeed::new(16);
        let mut sub = feed
            .subscribe("projects", FeedFilter::default())
            .await
            .unwrap();

        feed.disconnect_all("socket closed");

        let err = sub.next().await.unwrap().unwrap_err();
        assert_eq!(err, FeedError::Disconnected("socket closed".to_string()));
        assert!(sub.next().await.is_none());
    }
}
