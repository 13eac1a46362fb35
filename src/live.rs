//! Live values: a fetched projection kept fresh by the change feed.
//!
//! A [`LiveValue`] composes three roles:
//!
//! * a [`Fetcher`] that runs a point-in-time query for the current user,
//! * a [`ChangeListener`] that re-runs the fetcher whenever a watched row
//!   changes (it never patches the value from the event payload),
//! * the presenter itself, which holds the last-known value, publishes it on
//!   a `watch` channel, and hands out [`Invalidator`]s so other code can force
//!   a refetch without waiting for the feed.
//!
//! Every fetch is tagged with a sequence number and its result is applied
//! only if no newer fetch was issued meanwhile and the value is still
//! mounted. Fetch failures are logged and leave the last-known value in place.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::FetchError;
use crate::feed::{ChangeFeed, ChangeKind, EqFilter, Subscription, Table, Topic};
use crate::retry::{run_with_retry, RetryConfig, RetryPolicy};

/// Point-in-time query scoped to one user.
///
/// Zero matching rows must produce `Output::default()` (0 or an empty list),
/// not an error.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    type Output: Clone + Default + Send + Sync + 'static;

    async fn fetch(&self, user_id: &str) -> Result<Self::Output, FetchError>;
}

/// Adapter turning an async closure into a [`Fetcher`].
pub struct FnFetcher<F, T> {
    f: F,
    _output: PhantomData<fn() -> T>,
}

pub fn fetch_fn<F, Fut, T>(f: F) -> FnFetcher<F, T>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    T: Clone + Default + Send + Sync + 'static,
{
    FnFetcher {
        f,
        _output: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, T> Fetcher for FnFetcher<F, T>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    T: Clone + Default + Send + Sync + 'static,
{
    type Output = T;

    async fn fetch(&self, user_id: &str) -> Result<T, FetchError> {
        (self.f)(user_id.to_string()).await
    }
}

// ---------------------------------------------------------------------------
// Watch specification and change listener
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct WatchEntry {
    table: Table,
    kinds: Vec<ChangeKind>,
    owner_column: Option<String>,
}

/// Tables a live value watches, with the column that must equal the current
/// user id. Entries without an owner column watch every row of the table.
#[derive(Debug, Clone, Default)]
pub struct WatchSpec {
    entries: Vec<WatchEntry>,
}

impl WatchSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch inserts and updates of rows whose `owner_column` is the user.
    pub fn owned(mut self, table: Table, owner_column: &str) -> Self {
        self.entries.push(WatchEntry {
            table,
            kinds: vec![ChangeKind::Insert, ChangeKind::Update],
            owner_column: Some(owner_column.to_string()),
        });
        self
    }

    /// Watch inserts and updates of every row in `table`.
    pub fn any(mut self, table: Table) -> Self {
        self.entries.push(WatchEntry {
            table,
            kinds: vec![ChangeKind::Insert, ChangeKind::Update],
            owner_column: None,
        });
        self
    }

    pub fn topics(&self, user_id: &str) -> Vec<Topic> {
        self.entries
            .iter()
            .map(|e| {
                let topic = Topic::new(e.table, &e.kinds);
                match &e.owner_column {
                    Some(column) => topic.with_filter(EqFilter::new(column.as_str(), user_id)),
                    None => topic,
                }
            })
            .collect()
    }
}

/// A set of feed subscriptions sharing one zero-argument callback.
pub struct ChangeListener {
    subscriptions: Vec<Subscription>,
}

impl ChangeListener {
    pub fn subscribe<F>(feed: &ChangeFeed, topics: Vec<Topic>, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let subscriptions = topics
            .into_iter()
            .map(|topic| {
                let cb = Arc::clone(&callback);
                feed.subscribe(topic, move |_signal| cb())
            })
            .collect();
        Self { subscriptions }
    }

    pub fn is_active(&self) -> bool {
        self.subscriptions.iter().all(Subscription::is_active)
    }

    pub fn unsubscribe(self) {
        for sub in self.subscriptions {
            sub.unsubscribe();
        }
    }
}

// ---------------------------------------------------------------------------
// Presenter
// ---------------------------------------------------------------------------

/// How a live value is wired up.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Used in log lines only.
    pub name: &'static str,
    pub watch: WatchSpec,
    /// Retry failed fetches; `None` means a failed fetch is just logged.
    pub retry: Option<RetryConfig>,
}

impl LiveConfig {
    pub fn new(name: &'static str, watch: WatchSpec) -> Self {
        Self {
            name,
            watch,
            retry: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }
}

struct LiveInner<T> {
    config: LiveConfig,
    feed: ChangeFeed,
    fetcher: Arc<dyn Fetcher<Output = T>>,
    user_id: Mutex<Option<String>>,
    listener: Mutex<Option<ChangeListener>>,
    issued: AtomicU64,
    applied: AtomicU64,
    mounted: AtomicBool,
    tx: watch::Sender<T>,
}

impl<T> LiveInner<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    fn is_current(&self, seq: u64) -> bool {
        self.mounted.load(Ordering::SeqCst) && self.issued.load(Ordering::SeqCst) == seq
    }

    /// Start a fetch. Its result lands only if it is still the latest one.
    fn trigger(self: &Arc<Self>) {
        if !self.mounted.load(Ordering::SeqCst) {
            return;
        }
        let Some(user_id) = self.user_id.lock().clone() else {
            return;
        };
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(self);

        tokio::spawn(async move {
            let name = inner.config.name;
            let result = match inner.config.retry {
                Some(retry) => {
                    let mut policy = RetryPolicy::new(retry);
                    let label = format!("live[{name}]");
                    run_with_retry(
                        &mut policy,
                        &label,
                        || inner.fetcher.fetch(&user_id),
                        || inner.is_current(seq),
                    )
                    .await
                }
                None => inner.fetcher.fetch(&user_id).await,
            };

            match result {
                Ok(value) => {
                    if inner.is_current(seq) {
                        inner.applied.store(seq, Ordering::SeqCst);
                        inner.tx.send_replace(value);
                    } else {
                        crate::dlog!("live[{name}]: dropped stale fetch #{seq}");
                    }
                }
                Err(e) => {
                    if inner.config.retry.is_none() {
                        crate::dlog!(
                            "live[{name}]: fetch #{seq} for {} failed: {e}",
                            crate::logging::user_id(&user_id)
                        );
                    }
                }
            }
        });
    }

    fn subscribe_for(self: &Arc<Self>, user_id: &str) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let listener = ChangeListener::subscribe(
            &self.feed,
            self.config.watch.topics(user_id),
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.trigger();
                }
            },
        );
        if let Some(old) = self.listener.lock().replace(listener) {
            old.unsubscribe();
        }
    }

    fn teardown(&self) {
        self.mounted.store(false, Ordering::SeqCst);
        if let Some(listener) = self.listener.lock().take() {
            listener.unsubscribe();
        }
    }
}

/// Presenter for one live projection. Dropping it unmounts it.
pub struct LiveValue<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    inner: Arc<LiveInner<T>>,
}

impl<T> LiveValue<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    /// Mount: subscribe to the change feed, then fetch once.
    ///
    /// Must be called inside a tokio runtime.
    pub fn mount<F>(feed: &ChangeFeed, fetcher: F, config: LiveConfig, user_id: &str) -> Self
    where
        F: Fetcher<Output = T>,
    {
        let (tx, _) = watch::channel(T::default());
        let inner = Arc::new(LiveInner {
            config,
            feed: feed.clone(),
            fetcher: Arc::new(fetcher),
            user_id: Mutex::new(Some(user_id.to_string())),
            listener: Mutex::new(None),
            issued: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            mounted: AtomicBool::new(true),
            tx,
        });
        // Listen before the first fetch so a write landing between the two
        // still triggers a refetch.
        inner.subscribe_for(user_id);
        inner.trigger();
        Self { inner }
    }

    /// Last-known value.
    pub fn get(&self) -> T {
        self.inner.tx.borrow().clone()
    }

    /// Receiver that wakes on every applied fetch.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.inner.tx.subscribe()
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.user_id.lock().clone()
    }

    /// Sequence number of the fetch currently shown (0 before the first one).
    pub fn applied_seq(&self) -> u64 {
        self.inner.applied.load(Ordering::SeqCst)
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.inner
            .listener
            .lock()
            .as_ref()
            .is_some_and(ChangeListener::is_active)
    }

    /// Force a refetch now.
    pub fn refresh(&self) {
        self.inner.trigger();
    }

    pub fn invalidator(&self) -> Invalidator {
        let weak: Weak<LiveInner<T>> = Arc::downgrade(&self.inner);
        Invalidator {
            trigger: Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.trigger();
                }
            }),
        }
    }

    /// Switch to another identity: the old subscription is torn down, the
    /// value resets to its default and everything is fetched from scratch.
    pub fn set_user(&self, user_id: &str) {
        if !self.is_mounted() {
            return;
        }
        if let Some(old) = self.inner.listener.lock().take() {
            old.unsubscribe();
        }
        *self.inner.user_id.lock() = Some(user_id.to_string());
        // Bumping the sequence discards anything still in flight for the old user.
        self.inner.issued.fetch_add(1, Ordering::SeqCst);
        self.inner.tx.send_replace(T::default());
        self.inner.subscribe_for(user_id);
        self.inner.trigger();
    }

    pub fn unmount(self) {
        self.inner.teardown();
    }
}

impl<T> Drop for LiveValue<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

/// Cloneable handle that forces a refetch of one live value. Does nothing
/// once the value is unmounted.
#[derive(Clone)]
pub struct Invalidator {
    trigger: Arc<dyn Fn() + Send + Sync>,
}

impl Invalidator {
    pub fn invalidate(&self) {
        (self.trigger)();
    }
}

impl std::fmt::Debug for Invalidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Invalidator")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use crate::feed::ChangeEvent;

    async fn next_value<T: Clone>(rx: &mut watch::Receiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .expect("value published in time")
            .expect("sender alive");
        rx.borrow_and_update().clone()
    }

    fn counting_fetcher(calls: Arc<AtomicU32>) -> impl Fetcher<Output = u32> {
        fetch_fn(move |_user: String| {
            let calls = Arc::clone(&calls);
            async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) }
        })
    }

    fn notification_event(recipient: &str) -> ChangeEvent {
        ChangeEvent {
            table: Table::Notifications,
            kind: ChangeKind::Insert,
            record: serde_json::json!({ "recipient_id": recipient }),
        }
    }

    #[tokio::test]
    async fn refetches_on_matching_event_only() {
        let feed = ChangeFeed::default();
        let calls = Arc::new(AtomicU32::new(0));
        let config = LiveConfig::new(
            "test",
            WatchSpec::new().owned(Table::Notifications, "recipient_id"),
        );
        let live = LiveValue::mount(&feed, counting_fetcher(Arc::clone(&calls)), config, "me");
        let mut rx = live.subscribe();
        assert_eq!(next_value(&mut rx).await, 1);

        feed.publish(notification_event("someone-else"));
        feed.publish(notification_event("me"));
        assert_eq!(next_value(&mut rx).await, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidator_forces_refetch_until_unmount() {
        let feed = ChangeFeed::default();
        let calls = Arc::new(AtomicU32::new(0));
        let live = LiveValue::mount(
            &feed,
            counting_fetcher(Arc::clone(&calls)),
            LiveConfig::new("test", WatchSpec::new()),
            "me",
        );
        let mut rx = live.subscribe();
        next_value(&mut rx).await;

        let invalidator = live.invalidator();
        invalidator.invalidate();
        assert_eq!(next_value(&mut rx).await, 2);

        live.unmount();
        invalidator.invalidate();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_stale_fetch_does_not_overwrite_newer_value() {
        let feed = ChangeFeed::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        // First call is slow and returns 100; later calls are fast.
        let fetcher = fetch_fn(move |_user: String| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(100u32)
                } else {
                    Ok(n)
                }
            }
        });
        let live = LiveValue::mount(&feed, fetcher, LiveConfig::new("test", WatchSpec::new()), "me");
        let mut rx = live.subscribe();
        live.refresh();

        assert_eq!(next_value(&mut rx).await, 1);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(live.get(), 1);
        assert_eq!(live.applied_seq(), 2);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_last_known_value() {
        let feed = ChangeFeed::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let fetcher = fetch_fn(move |_user: String| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(5u32)
                } else {
                    Err(FetchError::FetchFailed("offline".to_string()))
                }
            }
        });
        let live = LiveValue::mount(&feed, fetcher, LiveConfig::new("test", WatchSpec::new()), "me");
        let mut rx = live.subscribe();
        assert_eq!(next_value(&mut rx).await, 5);

        live.refresh();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(live.get(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn identity_change_resubscribes_with_new_filter() {
        let feed = ChangeFeed::default();
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let log = Arc::clone(&seen);
        let fetcher = fetch_fn(move |user: String| {
            log.lock().push(user.clone());
            async move { Ok(user) }
        });
        let config = LiveConfig::new(
            "test",
            WatchSpec::new().owned(Table::Notifications, "recipient_id"),
        );
        let live = LiveValue::mount(&feed, fetcher, config, "alice");
        let mut rx = live.subscribe();
        assert_eq!(next_value(&mut rx).await, "alice");

        live.set_user("bob");
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|v| v == "bob"))
            .await
            .expect("bob fetched in time")
            .expect("sender alive");
        assert!(live.is_listening());
        assert_eq!(live.user_id().as_deref(), Some("bob"));

        // Events for the old identity no longer trigger anything.
        feed.publish(notification_event("alice"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.lock().as_slice(), ["alice", "bob"]);

        feed.publish(notification_event("bob"));
        next_value(&mut rx).await;
        assert_eq!(seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn lagged_listener_refetches_exactly_once() {
        let feed = ChangeFeed::new(2);
        let calls = Arc::new(AtomicU32::new(0));
        let config = LiveConfig::new(
            "test",
            WatchSpec::new().owned(Table::Notifications, "recipient_id"),
        );
        let live = LiveValue::mount(&feed, counting_fetcher(Arc::clone(&calls)), config, "me");
        let mut rx = live.subscribe();
        assert_eq!(next_value(&mut rx).await, 1);

        // None of these match, but the overflow hides that from the listener.
        for _ in 0..10 {
            feed.publish(notification_event("someone-else"));
        }
        assert_eq!(next_value(&mut rx).await, 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(live.get(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn write_during_first_fetch_is_not_missed() {
        let feed = ChangeFeed::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let writer = feed.clone();
        // The first query "sees" nothing, then a matching row is written
        // before the fetch returns.
        let fetcher = fetch_fn(move |_user: String| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                writer.publish(notification_event("me"));
            }
            async move { Ok(n) }
        });
        let config = LiveConfig::new(
            "test",
            WatchSpec::new().owned(Table::Notifications, "recipient_id"),
        );
        let live = LiveValue::mount(&feed, fetcher, config, "me");
        let mut rx = live.subscribe();
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|n| *n == 2))
            .await
            .expect("second fetch in time")
            .expect("sender alive");
    }
}
