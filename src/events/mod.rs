//! Change feed capability consumed by the completion tracker.
//!
//! The backend integration layer implements [`ChangeFeedClient`]; [`MemoryFeed`]
//! is the in-process implementation it publishes into.

mod bus;
mod types;

pub use bus::MemoryFeed;
pub use types::{ChangeEvent, ChangeKind, EventSequence, FeedFilter};

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("change feed connection lost: {0}")]
    Disconnected(String),

    #[error("change feed subscriber lagged behind by {0} events")]
    Lagged(u64),

    #[error("change feed request failed: {0}")]
    Request(String),
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<ChangeEvent, FeedError>> + Send>>;

/// Ownership of one live subscription. Dropping it unsubscribes.
pub struct SubscriptionHandle {
    id: u64,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl SubscriptionHandle {
    pub fn new(id: u64, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// A live subscription: the release handle plus the notification stream.
pub struct Subscription {
    handle: SubscriptionHandle,
    events: EventStream,
}

impl Subscription {
    pub fn new(handle: SubscriptionHandle, events: EventStream) -> Self {
        Self { handle, events }
    }

    pub fn id(&self) -> u64 {
        self.handle.id()
    }

    pub async fn next(&mut self) -> Option<Result<ChangeEvent, FeedError>> {
        self.events.next().await
    }

    /// Split so the handle can be released by its owner while another task reads the stream.
    pub fn into_parts(self) -> (SubscriptionHandle, EventStream) {
        (self.handle, self.events)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .field("events", &"<stream>")
            .finish()
    }
}

#[async_trait]
pub trait ChangeFeedClient: Send + Sync {
    /// Open a live subscription to changes in `collection` matching `filter`.
    async fn subscribe(&self, collection: &str, filter: FeedFilter)
        -> Result<Subscription, FeedError>;

    /// Current row for `resource_id`, or `None` when it does not exist.
    async fn read_one(&self, collection: &str, resource_id: &str)
        -> Result<Option<Value>, FeedError>;
}
