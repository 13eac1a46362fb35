//! Row-level change feed.
//!
//! Every write performed through [`Database`](crate::db::Database) publishes a
//! [`ChangeEvent`] on a single broadcast channel. Subscribers narrow that
//! stream with a [`Topic`]: one table, a set of event kinds and an optional
//! equality filter on a column of the changed row.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const FEED_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Users,
    Profiles,
    Follows,
    Posts,
    Likes,
    Notifications,
    Messages,
    Stories,
    StoryViews,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Profiles => "profiles",
            Table::Follows => "follows",
            Table::Posts => "posts",
            Table::Likes => "likes",
            Table::Notifications => "notifications",
            Table::Messages => "messages",
            Table::Stories => "stories",
            Table::StoryViews => "story_views",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let table = match name {
            "users" => Table::Users,
            "profiles" => Table::Profiles,
            "follows" => Table::Follows,
            "posts" => Table::Posts,
            "likes" => Table::Likes,
            "notifications" => Table::Notifications,
            "messages" => Table::Messages,
            "stories" => Table::Stories,
            "story_views" => Table::StoryViews,
            _ => return None,
        };
        Some(table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One changed row. `record` is the row after the change (before it, for
/// deletes) serialized as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub record: serde_json::Value,
}

/// `column = value` on the changed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EqFilter {
    pub column: String,
    pub value: String,
}

impl EqFilter {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, record: &serde_json::Value) -> bool {
        match record.get(&self.column) {
            Some(serde_json::Value::String(s)) => *s == self.value,
            Some(serde_json::Value::Number(n)) => n.to_string() == self.value,
            Some(serde_json::Value::Bool(b)) => b.to_string() == self.value,
            _ => false,
        }
    }
}

/// What a subscriber wants to hear about.
#[derive(Debug, Clone)]
pub struct Topic {
    pub table: Table,
    pub kinds: HashSet<ChangeKind>,
    pub filter: Option<EqFilter>,
}

impl Topic {
    pub fn new(table: Table, kinds: &[ChangeKind]) -> Self {
        Self {
            table,
            kinds: kinds.iter().copied().collect(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: EqFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.table == self.table
            && self.kinds.contains(&event.kind)
            && self
                .filter
                .as_ref()
                .map_or(true, |f| f.matches(&event.record))
    }
}

/// What a subscription callback receives.
#[derive(Debug)]
pub enum FeedSignal<'a> {
    Change(&'a ChangeEvent),
    /// The subscriber fell behind and `n` events were dropped; any of them
    /// may have matched.
    Lagged(u64),
}

/// Publisher side of the feed. Cheap to clone.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(FEED_CHANNEL_CAPACITY)
    }
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Returns how many raw receivers were listening.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// A raw receiver of every event, for relays such as the WebSocket handler.
    pub fn receiver(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Subscribe `callback` to events matching `topic`.
    ///
    /// Spawns a listener task, so it must be called inside a tokio runtime.
    /// Once [`Subscription::unsubscribe`] returns (or the handle is dropped)
    /// the callback is never invoked again. The callback runs under the
    /// subscription's lock and must not unsubscribe its own subscription.
    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(FeedSignal<'_>) + Send + Sync + 'static,
    {
        let mut rx = self.tx.subscribe();
        let active = Arc::new(Mutex::new(true));
        let task_active = Arc::clone(&active);

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if !topic.matches(&event) {
                            continue;
                        }
                        let active = task_active.lock();
                        if !*active {
                            break;
                        }
                        callback(FeedSignal::Change(&event));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        crate::dlog!(
                            "feed: subscriber on {} lagged, skipped {n} event(s)",
                            topic.table.as_str()
                        );
                        let active = task_active.lock();
                        if !*active {
                            break;
                        }
                        callback(FeedSignal::Lagged(n));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Subscription {
            active,
            task: Some(task),
        }
    }
}

/// Handle to a live subscription.
pub struct Subscription {
    /// Held by the listener task while the callback runs.
    active: Arc<Mutex<bool>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        *self.active.lock()
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        *self.active.lock() = false;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn event(table: Table, kind: ChangeKind, recipient: &str) -> ChangeEvent {
        ChangeEvent {
            table,
            kind,
            record: serde_json::json!({ "id": 7, "recipient_id": recipient }),
        }
    }

    #[test]
    fn topic_matches_table_kind_and_filter() {
        let topic = Topic::new(Table::Notifications, &[ChangeKind::Insert, ChangeKind::Update])
            .with_filter(EqFilter::new("recipient_id", "me"));

        assert!(topic.matches(&event(Table::Notifications, ChangeKind::Insert, "me")));
        assert!(!topic.matches(&event(Table::Notifications, ChangeKind::Delete, "me")));
        assert!(!topic.matches(&event(Table::Notifications, ChangeKind::Insert, "you")));
        assert!(!topic.matches(&event(Table::Messages, ChangeKind::Insert, "me")));
    }

    #[test]
    fn filter_compares_numbers_as_text() {
        let filter = EqFilter::new("id", "7");
        assert!(filter.matches(&serde_json::json!({ "id": 7 })));
        assert!(!filter.matches(&serde_json::json!({ "other": 7 })));
    }

    #[test]
    fn table_names_round_trip() {
        for table in [Table::Notifications, Table::StoryViews, Table::Profiles] {
            assert_eq!(Table::parse(table.as_str()), Some(table));
        }
        assert_eq!(Table::parse("nope"), None);
    }

    #[tokio::test]
    async fn unsubscribed_callback_is_not_invoked() {
        let feed = ChangeFeed::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sub = feed.subscribe(
            Topic::new(Table::Notifications, &[ChangeKind::Insert]),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        feed.publish(event(Table::Notifications, ChangeKind::Insert, "me"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        feed.publish(event(Table::Notifications, ChangeKind::Insert, "me"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn no_callback_once_unsubscribe_returns_under_load() {
        let feed = ChangeFeed::new(1024);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sub = feed.subscribe(
            Topic::new(Table::Notifications, &[ChangeKind::Insert]),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        let publisher = feed.clone();
        let flood = tokio::spawn(async move {
            for _ in 0..2000 {
                publisher.publish(event(Table::Notifications, ChangeKind::Insert, "me"));
                tokio::task::yield_now().await;
            }
        });

        tokio::time::sleep(Duration::from_millis(2)).await;
        sub.unsubscribe();
        let seen = hits.load(Ordering::SeqCst);
        flood.await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_once() {
        let feed = ChangeFeed::new(2);
        let signals = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&signals);
        let _sub = feed.subscribe(
            Topic::new(Table::Notifications, &[ChangeKind::Insert])
                .with_filter(EqFilter::new("recipient_id", "me")),
            move |signal| {
                sink.lock().push(match signal {
                    FeedSignal::Change(_) => None,
                    FeedSignal::Lagged(n) => Some(n),
                });
            },
        );

        // No await in between: the listener cannot keep up.
        for _ in 0..10 {
            feed.publish(event(Table::Notifications, ChangeKind::Insert, "you"));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(signals.lock().as_slice(), [Some(8)]);
    }
}
