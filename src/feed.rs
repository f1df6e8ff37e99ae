//! Change-feed model shared by every transport.
//!
//! A transport implements [`ChangeFeed`]: given a stream (table) name it hands
//! back a [`FeedSubscription`] that yields [`RawChange`]s in delivery order until
//! it is dropped. Dropping the subscription releases it at the transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// Kind of row mutation carried by a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Untyped change as delivered by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChange {
    pub kind: ChangeKind,
    /// New row image (inserts and updates).
    pub record: Value,
    /// Previous row image; for deletes it carries at least the `id`.
    pub old_record: Value,
}

impl RawChange {
    pub fn insert(record: Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            record,
            old_record: Value::Null,
        }
    }

    pub fn update(record: Value) -> Self {
        Self {
            kind: ChangeKind::Update,
            record,
            old_record: Value::Null,
        }
    }

    pub fn delete(id: &str) -> Self {
        Self {
            kind: ChangeKind::Delete,
            record: Value::Null,
            old_record: serde_json::json!({ "id": id }),
        }
    }
}

/// Typed change applied to a live collection.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T> {
    Insert(T),
    Update(T),
    Delete(String),
}

impl<T: DeserializeOwned> ChangeEvent<T> {
    /// Decode a raw change into a typed event.
    pub fn decode(raw: RawChange) -> Result<Self> {
        match raw.kind {
            ChangeKind::Insert => Ok(Self::Insert(
                serde_json::from_value(raw.record).context("undecodable INSERT record")?,
            )),
            ChangeKind::Update => Ok(Self::Update(
                serde_json::from_value(raw.record).context("undecodable UPDATE record")?,
            )),
            ChangeKind::Delete => {
                let id = match raw.old_record.get("id") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => return Err(anyhow!("DELETE without an id")),
                };
                Ok(Self::Delete(id))
            }
        }
    }
}

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Handle on one stream subscription. Events stop once it is dropped.
pub struct FeedSubscription {
    stream: String,
    rx: mpsc::UnboundedReceiver<RawChange>,
    on_drop: Option<Unsubscribe>,
}

impl FeedSubscription {
    pub fn new(
        stream: impl Into<String>,
        rx: mpsc::UnboundedReceiver<RawChange>,
        on_drop: Option<Unsubscribe>,
    ) -> Self {
        Self {
            stream: stream.into(),
            rx,
            on_drop,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Next change in delivery order; `None` once the transport has gone away.
    pub async fn next(&mut self) -> Option<RawChange> {
        self.rx.recv().await
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(unsubscribe) = self.on_drop.take() {
            unsubscribe();
        }
        debug!("Released change-feed subscription for {}", self.stream);
    }
}

/// Source of per-stream change subscriptions.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self, stream: &str) -> FeedSubscription;
}

/// Feed that never delivers anything. Used when no realtime service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledFeed;

impl ChangeFeed for DisabledFeed {
    fn subscribe(&self, stream: &str) -> FeedSubscription {
        let (_tx, rx) = mpsc::unbounded_channel();
        FeedSubscription::new(stream, rx, None)
    }
}

type Subscribers = HashMap<String, Vec<(u64, mpsc::UnboundedSender<RawChange>)>>;

#[derive(Default)]
struct BroadcastInner {
    next_id: u64,
    subscribers: Subscribers,
}

/// In-process feed: every subscriber of a stream receives every published change.
#[derive(Clone, Default)]
pub struct BroadcastFeed {
    inner: Arc<Mutex<BroadcastInner>>,
}

impl BroadcastFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a change to all current subscribers of `stream`. Returns how many received it.
    pub fn publish(&self, stream: &str, change: RawChange) -> usize {
        let mut inner = lock(&self.inner);
        let Some(subs) = inner.subscribers.get_mut(stream) else {
            return 0;
        };
        subs.retain(|(_, tx)| tx.send(change.clone()).is_ok());
        subs.len()
    }

    pub fn subscriber_count(&self, stream: &str) -> usize {
        lock(&self.inner)
            .subscribers
            .get(stream)
            .map_or(0, |subs| subs.len())
    }
}

impl ChangeFeed for BroadcastFeed {
    fn subscribe(&self, stream: &str) -> FeedSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut inner = lock(&self.inner);
            let id = inner.next_id;
            inner.next_id += 1;
            inner
                .subscribers
                .entry(stream.to_string())
                .or_default()
                .push((id, tx));
            id
        };

        let weak: Weak<Mutex<BroadcastInner>> = Arc::downgrade(&self.inner);
        let key = stream.to_string();
        let unsubscribe: Unsubscribe = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = lock(&inner);
                if let Some(subs) = inner.subscribers.get_mut(&key) {
                    subs.retain(|(sub_id, _)| *sub_id != id);
                    if subs.is_empty() {
                        inner.subscribers.remove(&key);
                    }
                }
            }
        });
        FeedSubscription::new(stream, rx, Some(unsubscribe))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        id: String,
        name: String,
    }

    #[test]
    fn decode_insert_and_update() {
        let raw = RawChange::insert(json!({ "id": "a", "name": "first" }));
        assert_eq!(
            ChangeEvent::<Row>::decode(raw).unwrap(),
            ChangeEvent::Insert(Row {
                id: "a".into(),
                name: "first".into()
            })
        );

        let raw = RawChange::update(json!({ "id": "a", "name": "second" }));
        assert!(matches!(
            ChangeEvent::<Row>::decode(raw).unwrap(),
            ChangeEvent::Update(Row { ref name, .. }) if name == "second"
        ));
    }

    #[test]
    fn decode_delete_reads_old_id() {
        let event = ChangeEvent::<Row>::decode(RawChange::delete("gone")).unwrap();
        assert_eq!(event, ChangeEvent::Delete("gone".into()));

        let numeric = RawChange {
            kind: ChangeKind::Delete,
            record: Value::Null,
            old_record: json!({ "id": 42 }),
        };
        assert_eq!(
            ChangeEvent::<Row>::decode(numeric).unwrap(),
            ChangeEvent::Delete("42".into())
        );
    }

    #[test]
    fn decode_rejects_bad_payloads() {
        assert!(ChangeEvent::<Row>::decode(RawChange::insert(json!({ "id": "a" }))).is_err());
        let no_id = RawChange {
            kind: ChangeKind::Delete,
            record: Value::Null,
            old_record: json!({}),
        };
        assert!(ChangeEvent::<Row>::decode(no_id).is_err());
    }

    #[tokio::test]
    async fn broadcast_fans_out_in_order() {
        let feed = BroadcastFeed::new();
        let mut first = feed.subscribe("markets");
        let mut second = feed.subscribe("markets");
        let mut other = feed.subscribe("traders");

        assert_eq!(feed.publish("markets", RawChange::delete("1")), 2);
        assert_eq!(feed.publish("markets", RawChange::delete("2")), 2);

        for sub in [&mut first, &mut second] {
            assert_eq!(sub.next().await, Some(RawChange::delete("1")));
            assert_eq!(sub.next().await, Some(RawChange::delete("2")));
        }
        assert_eq!(other.stream(), "traders");
        assert!(other.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_subscription_releases_it() {
        let feed = BroadcastFeed::new();
        let first = feed.subscribe("markets");
        let _second = feed.subscribe("markets");
        assert_eq!(feed.subscriber_count("markets"), 2);

        drop(first);
        assert_eq!(feed.subscriber_count("markets"), 1);
        assert_eq!(feed.publish("markets", RawChange::delete("1")), 1);
    }

    #[tokio::test]
    async fn disabled_feed_ends_immediately() {
        let mut sub = DisabledFeed.subscribe("markets");
        assert_eq!(sub.next().await, None);
    }
}
