//! Live collections: a full fetch merged with a stream of row changes.
//!
//! A [`LiveTable`] owns one ordered collection for one stream. It is replaced
//! wholesale by every refresh and patched in place by change events between
//! refreshes. Observers read a [`TableState`] snapshot or await changes through
//! a `watch` receiver.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::feed::{ChangeEvent, ChangeFeed, FeedSubscription};

/// Anything with a stable unique identifier.
pub trait Identified {
    fn id(&self) -> &str;
}

/// No-argument operation returning the complete current contents of a stream.
pub type FetchAll<T> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Vec<T>>> + Send + Sync>;

/// Wrap an async closure as a [`FetchAll`].
pub fn fetcher<T, F, Fut>(f: F) -> FetchAll<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<T>>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Observable state of a live table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableState<T> {
    pub items: Vec<T>,
    pub is_loading: bool,
    pub last_error: Option<String>,
}

impl<T> Default for TableState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            is_loading: false,
            last_error: None,
        }
    }
}

impl<T: Identified> TableState<T> {
    /// Apply one change event. Returns `true` if `items` changed.
    ///
    /// - Insert of a known id replaces it in place, otherwise prepends.
    /// - Update of an unknown id is dropped.
    /// - Delete of an unknown id is a no-op.
    pub fn apply(&mut self, event: ChangeEvent<T>) -> bool {
        match event {
            ChangeEvent::Insert(item) => {
                match self.position(item.id()) {
                    Some(idx) => self.items[idx] = item,
                    None => self.items.insert(0, item),
                }
                true
            }
            ChangeEvent::Update(item) => match self.position(item.id()) {
                Some(idx) => {
                    self.items[idx] = item;
                    true
                }
                None => false,
            },
            ChangeEvent::Delete(id) => match self.position(&id) {
                Some(idx) => {
                    self.items.remove(idx);
                    true
                }
                None => false,
            },
        }
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }
}

/// How a completed refresh is reconciled with change events applied meanwhile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Consistency {
    /// Every successful refresh replaces the collection when it lands, even if
    /// a newer refresh or a change event landed first.
    #[default]
    LastWriterWins,
    /// A refresh is discarded if a newer refresh already applied, or if any
    /// change event was applied after it started.
    Fenced,
}

/// What happened to a refresh once its fetch settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Collection replaced with this many items.
    Applied(usize),
    /// Fetch succeeded but the result was older than the current state.
    Discarded,
    /// The table was closed before the fetch settled.
    Closed,
}

#[derive(Debug, Default)]
struct Fence {
    closed: bool,
    events_applied: u64,
    last_generation: u64,
    applied_generation: u64,
}

struct Shared<T> {
    stream: String,
    consistency: Consistency,
    fetch_all: FetchAll<T>,
    fence: Mutex<Fence>,
    state: watch::Sender<TableState<T>>,
}

impl<T> Shared<T>
where
    T: Identified + Clone + Send + Sync + 'static,
{
    fn apply_event(&self, event: ChangeEvent<T>) {
        let mut fence = lock(&self.fence);
        if fence.closed {
            return;
        }
        fence.events_applied += 1;
        self.state.send_if_modified(|state| state.apply(event));
    }

    async fn refresh(&self) -> Result<RefreshOutcome, String> {
        let (generation, events_at_start) = {
            let mut fence = lock(&self.fence);
            if fence.closed {
                return Ok(RefreshOutcome::Closed);
            }
            fence.last_generation += 1;
            self.state.send_modify(|state| state.is_loading = true);
            (fence.last_generation, fence.events_applied)
        };

        let mut guard = LoadingGuard {
            shared: self,
            armed: true,
        };
        let result = (self.fetch_all)().await;
        guard.armed = false;

        let mut fence = lock(&self.fence);
        if fence.closed {
            return Ok(RefreshOutcome::Closed);
        }
        match result {
            Ok(items) => {
                let stale = self.consistency == Consistency::Fenced
                    && (generation < fence.applied_generation
                        || fence.events_applied > events_at_start);
                if stale {
                    debug!(
                        "[{}] Discarding refresh #{generation}: newer state already applied",
                        self.stream
                    );
                    self.state.send_modify(|state| state.is_loading = false);
                    return Ok(RefreshOutcome::Discarded);
                }
                fence.applied_generation = generation;
                let count = items.len();
                self.state.send_modify(|state| {
                    state.items = items;
                    state.last_error = None;
                    state.is_loading = false;
                });
                debug!("[{}] Refreshed {count} items", self.stream);
                Ok(RefreshOutcome::Applied(count))
            }
            Err(e) => {
                let message = format!("{e:#}");
                warn!("[{}] Refresh failed: {message}", self.stream);
                self.state.send_modify(|state| {
                    state.last_error = Some(message.clone());
                    state.is_loading = false;
                });
                Err(message)
            }
        }
    }
}

/// Clears `is_loading` if a refresh is dropped before its fetch settles.
struct LoadingGuard<'a, T> {
    shared: &'a Shared<T>,
    armed: bool,
}

impl<T> Drop for LoadingGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed || lock(&self.shared.fence).closed {
            return;
        }
        debug!("[{}] Refresh abandoned", self.shared.stream);
        self.shared.state.send_modify(|state| state.is_loading = false);
    }
}

/// A collection kept in sync with a backend stream.
///
/// Dropping the table (or calling [`LiveTable::close`]) releases the change-feed
/// subscription; nothing mutates the state afterwards.
pub struct LiveTable<T> {
    shared: Arc<Shared<T>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T> LiveTable<T>
where
    T: Identified + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Open the stream subscription and start the initial refresh.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(
        stream: impl Into<String>,
        fetch_all: FetchAll<T>,
        feed: &dyn ChangeFeed,
    ) -> Self {
        Self::subscribe_with(stream, fetch_all, feed, Consistency::default())
    }

    pub fn subscribe_with(
        stream: impl Into<String>,
        fetch_all: FetchAll<T>,
        feed: &dyn ChangeFeed,
        consistency: Consistency,
    ) -> Self {
        let stream = stream.into();
        let (state, _) = watch::channel(TableState {
            is_loading: true,
            ..TableState::default()
        });
        let shared = Arc::new(Shared {
            stream: stream.clone(),
            consistency,
            fetch_all,
            fence: Mutex::new(Fence::default()),
            state,
        });

        let subscription = feed.subscribe(&stream);
        let events = tokio::spawn(apply_events(Arc::clone(&shared), subscription));
        info!("[{stream}] Live table subscribed");

        let table = Self {
            shared,
            tasks: Mutex::new(vec![events]),
        };
        table.refresh_in_background();
        table
    }

    /// Run one full refresh and wait for it to settle.
    ///
    /// On failure the previous items are kept and the error is both returned
    /// and recorded in `last_error`. Overlapping calls are not deduplicated.
    pub async fn refresh(&self) -> Result<RefreshOutcome, String> {
        self.shared.refresh().await
    }

    /// Start a refresh without waiting for it.
    pub fn refresh_in_background(&self) {
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let _ = shared.refresh().await;
        });
        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

impl<T> LiveTable<T> {
    pub fn stream(&self) -> &str {
        &self.shared.stream
    }

    /// Current snapshot.
    pub fn state(&self) -> TableState<T>
    where
        T: Clone,
    {
        self.shared.state.borrow().clone()
    }

    pub fn items(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.shared.state.borrow().items.clone()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<TableState<T>> {
        self.shared.state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.fence).closed
    }

    /// Stop applying events and release the change-feed subscription.
    pub fn close(&self) {
        {
            let mut fence = lock(&self.shared.fence);
            if fence.closed {
                return;
            }
            fence.closed = true;
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        info!("[{}] Live table closed", self.shared.stream);
    }
}

impl<T> Drop for LiveTable<T> {
    fn drop(&mut self) {
        self.close();
    }
}

async fn apply_events<T>(shared: Arc<Shared<T>>, mut subscription: FeedSubscription)
where
    T: Identified + DeserializeOwned + Clone + Send + Sync + 'static,
{
    while let Some(raw) = subscription.next().await {
        match ChangeEvent::<T>::decode(raw) {
            Ok(event) => shared.apply_event(event),
            Err(e) => warn!("[{}] Skipping change: {e:#}", shared.stream),
        }
    }
    debug!("[{}] Change feed ended", subscription.stream());
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
