//! In-Memory Cache Store
//!
//! A reference implementation of [`QueryEndpoint`] and [`MutationEndpoint`]
//! that keeps entries in memory and never performs I/O. Fetches are recorded
//! as pending; the owner settles them with `fulfill` / `reject`. Hosts use it
//! for tests, previews and demos.
//!
//! # Fetch Policy
//!
//! - Uninitialized and rejected entries are fetched on `initiate`.
//! - Pending entries are never fetched twice.
//! - Fulfilled entries are refetched only when the request's
//!   [`RefetchOnMount`] policy says so.
//!
//! Every store-visible change is appended to an event log
//! ([`StoreEvent`]) and, when a [`Runtime`] is attached, notifies it.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{
    now_millis, CacheEntry, CacheKey, InitiateOptions, MutationEndpoint, MutationHandle,
    PrefetchOptions, QueryEndpoint, QueryHandle, QueryStatus, RefetchOnMount, RequestId,
    SubscriptionLink, SubscriptionOptions,
};
use crate::error::Result;
use crate::reactive::{EvalContext, Runtime, Stable};

/// Something the store did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A request registered interest in an entry.
    Subscribe {
        key: CacheKey,
        request_id: RequestId,
        force_refetch: RefetchOnMount,
    },
    /// An entry moved to pending.
    Fetch { key: CacheKey, request_id: RequestId },
    /// A request released its interest.
    Unsubscribe { request_id: RequestId },
    /// A request replaced its subscription options.
    UpdateOptions {
        request_id: RequestId,
        options: SubscriptionOptions,
    },
    /// A request asked for its entry to be refetched.
    Refetch { request_id: RequestId },
    /// A prefetch was evaluated; `fetched` tells whether it started a fetch.
    Prefetch { key: CacheKey, fetched: bool },
    /// A mutation request started.
    Mutate { request_id: RequestId },
}

/// Shared state and notification target of one in-memory endpoint.
struct Shared<S> {
    table: Mutex<S>,
    runtime: RwLock<Option<Runtime>>,
}

impl<S> Shared<S> {
    fn new(table: S) -> Self {
        Self {
            table: Mutex::new(table),
            runtime: RwLock::new(None),
        }
    }

    fn notify(&self) {
        let runtime = self.runtime.read().clone();
        if let Some(runtime) = runtime {
            runtime.notify();
        }
    }
}

// ----------------------------------------------------------------------------
// Queries
// ----------------------------------------------------------------------------

struct SubscriptionRecord {
    key: CacheKey,
    options: SubscriptionOptions,
}

struct QueryTable<T, E> {
    entries: IndexMap<CacheKey, Arc<CacheEntry<T, E>>>,
    subscriptions: IndexMap<RequestId, SubscriptionRecord>,
    events: Vec<StoreEvent>,
}

impl<T: Clone, E: Clone> QueryTable<T, E> {
    fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.subscriptions
            .values()
            .filter(|record| &record.key == key)
            .count()
    }

    /// Replace the entry for `key` with an edited copy.
    fn write(&mut self, key: &CacheKey, edit: impl FnOnce(&mut CacheEntry<T, E>)) {
        let mut entry = self
            .entries
            .get(key)
            .map(|entry| CacheEntry::clone(entry))
            .unwrap_or_default();
        edit(&mut entry);
        entry.subscriber_count = self.subscriber_count(key);
        self.entries.insert(key.clone(), Arc::new(entry));
    }

    /// Move `key` to pending unless a fetch is already running.
    fn start_fetch(&mut self, key: &CacheKey, request_id: RequestId) -> bool {
        let pending = self.entries.get(key).map(|entry| entry.is_pending()).unwrap_or(false);
        if pending {
            return false;
        }
        self.write(key, |entry| {
            entry.status = QueryStatus::Pending;
            entry.request_id = Some(request_id);
        });
        self.events.push(StoreEvent::Fetch {
            key: key.clone(),
            request_id,
        });
        true
    }

    fn needs_fetch(&self, key: &CacheKey, force: RefetchOnMount, now: u64) -> bool {
        match self.entries.get(key) {
            None => true,
            Some(entry) => match entry.status {
                QueryStatus::Uninitialized | QueryStatus::Rejected => true,
                QueryStatus::Pending => false,
                QueryStatus::Fulfilled => force.requires_fetch(entry.fulfilled_timestamp, now),
            },
        }
    }
}

struct QueryLink<T, E> {
    shared: Shared<QueryTable<T, E>>,
}

impl<T, E> SubscriptionLink for QueryLink<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn refetch(&self, request_id: RequestId) {
        let started = {
            let mut table = self.shared.table.lock();
            table.events.push(StoreEvent::Refetch { request_id });
            match table.subscriptions.get(&request_id) {
                Some(record) => {
                    let key = record.key.clone();
                    table.start_fetch(&key, request_id)
                }
                None => false,
            }
        };
        if started {
            self.shared.notify();
        }
    }

    fn unsubscribe(&self, request_id: RequestId) {
        {
            let mut table = self.shared.table.lock();
            table.events.push(StoreEvent::Unsubscribe { request_id });
            if let Some(record) = table.subscriptions.shift_remove(&request_id) {
                if table.entries.contains_key(&record.key) {
                    table.write(&record.key, |_| {});
                }
            }
        }
        self.shared.notify();
    }

    fn update_subscription_options(&self, request_id: RequestId, options: &SubscriptionOptions) {
        let mut table = self.shared.table.lock();
        table.events.push(StoreEvent::UpdateOptions {
            request_id,
            options: options.clone(),
        });
        if let Some(record) = table.subscriptions.get_mut(&request_id) {
            record.options = options.clone();
        }
    }
}

/// In-memory store backing one query endpoint.
pub struct MemoryQuery<A, T, E> {
    name: Arc<str>,
    link: Arc<QueryLink<T, E>>,
    /// Shared skip/miss entry so repeated reads keep one identity.
    uninitialized: Arc<CacheEntry<T, E>>,
    _arg: PhantomData<fn(&A)>,
}

impl<A, T, E> MemoryQuery<A, T, E>
where
    A: Serialize + PartialEq + fmt::Debug + Send + Sync + 'static,
    T: Clone + PartialEq + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            link: Arc::new(QueryLink {
                shared: Shared::new(QueryTable {
                    entries: IndexMap::new(),
                    subscriptions: IndexMap::new(),
                    events: Vec::new(),
                }),
            }),
            uninitialized: Arc::new(CacheEntry::uninitialized()),
            _arg: PhantomData,
        }
    }

    /// Notify `runtime` on every store-visible change.
    pub fn with_runtime(self, runtime: &Runtime) -> Self {
        *self.link.shared.runtime.write() = Some(runtime.clone());
        self
    }

    /// Settle the entry for `arg` successfully, stamped now.
    pub fn fulfill(&self, arg: &A, data: T) -> Result<()> {
        self.fulfill_at(arg, data, now_millis())
    }

    /// Settle the entry for `arg` successfully with an explicit timestamp.
    pub fn fulfill_at(&self, arg: &A, data: T, timestamp: u64) -> Result<()> {
        let key = CacheKey::new(&self.name, arg)?;
        self.link.shared.table.lock().write(&key, |entry| {
            entry.status = QueryStatus::Fulfilled;
            entry.data = Some(data);
            entry.error = None;
            entry.fulfilled_timestamp = Some(timestamp);
        });
        self.link.shared.notify();
        Ok(())
    }

    /// Settle the entry for `arg` with an error. Previous data is kept.
    pub fn reject(&self, arg: &A, error: E) -> Result<()> {
        let key = CacheKey::new(&self.name, arg)?;
        self.link.shared.table.lock().write(&key, |entry| {
            entry.status = QueryStatus::Rejected;
            entry.error = Some(error);
        });
        self.link.shared.notify();
        Ok(())
    }

    /// Number of active subscriptions on the entry for `arg`.
    pub fn subscriber_count(&self, arg: &A) -> Result<usize> {
        let key = CacheKey::new(&self.name, arg)?;
        Ok(self.link.shared.table.lock().subscriber_count(&key))
    }

    /// Number of active subscriptions across all entries.
    pub fn active_subscriptions(&self) -> usize {
        self.link.shared.table.lock().subscriptions.len()
    }

    /// Options currently recorded for `request_id`.
    pub fn subscription_options(&self, request_id: RequestId) -> Option<SubscriptionOptions> {
        self.link
            .shared
            .table
            .lock()
            .subscriptions
            .get(&request_id)
            .map(|record| record.options.clone())
    }

    /// Snapshot of the event log.
    pub fn events(&self) -> Vec<StoreEvent> {
        self.link.shared.table.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.link.shared.table.lock().events.clear();
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.link
            .shared
            .table
            .lock()
            .events
            .iter()
            .filter(|event| matches!(event, StoreEvent::Fetch { .. }))
            .count()
    }
}

impl<A, T, E> QueryEndpoint for MemoryQuery<A, T, E>
where
    A: Serialize + PartialEq + fmt::Debug + Send + Sync + 'static,
    T: Clone + PartialEq + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
{
    type Arg = A;
    type Data = T;
    type Error = E;

    fn name(&self) -> &str {
        &self.name
    }

    fn initiate(&self, arg: Stable<A>, options: InitiateOptions) -> Result<QueryHandle<A>> {
        debug_assert!(!EvalContext::is_active(), "initiate during an evaluation pass");
        let key = CacheKey::new(&self.name, &*arg)?;
        let request_id = RequestId::next();
        let now = now_millis();

        {
            let mut table = self.link.shared.table.lock();
            table.events.push(StoreEvent::Subscribe {
                key: key.clone(),
                request_id,
                force_refetch: options.force_refetch,
            });
            table.subscriptions.insert(
                request_id,
                SubscriptionRecord {
                    key: key.clone(),
                    options: (*options.subscription_options).clone(),
                },
            );

            if table.needs_fetch(&key, options.force_refetch, now) {
                table.start_fetch(&key, request_id);
            } else {
                // Refresh the subscriber count only.
                table.write(&key, |_| {});
            }
        }

        debug!(endpoint = %self.name, %key, %request_id, "memory store subscribed");
        self.link.shared.notify();

        Ok(QueryHandle::new(
            arg,
            request_id,
            options.subscription_options,
            self.link.clone(),
        ))
    }

    fn select(&self, arg: Option<&A>) -> Arc<CacheEntry<T, E>> {
        let Some(arg) = arg else {
            return self.uninitialized.clone();
        };
        match CacheKey::new(&self.name, arg) {
            Ok(key) => self
                .link
                .shared
                .table
                .lock()
                .entries
                .get(&key)
                .cloned()
                .unwrap_or_else(|| self.uninitialized.clone()),
            Err(err) => {
                warn!(endpoint = %self.name, error = %err, "select with unserializable argument");
                self.uninitialized.clone()
            }
        }
    }

    fn prefetch(&self, arg: &A, options: &PrefetchOptions) {
        let key = match CacheKey::new(&self.name, arg) {
            Ok(key) => key,
            Err(err) => {
                warn!(endpoint = %self.name, error = %err, "prefetch with unserializable argument");
                return;
            }
        };

        let force = if options.force == Some(true) {
            RefetchOnMount::Always
        } else if let Some(seconds) = options.if_older_than {
            RefetchOnMount::OlderThan(seconds)
        } else {
            RefetchOnMount::Never
        };

        let fetched = {
            let mut table = self.link.shared.table.lock();
            let fetched = table.needs_fetch(&key, force, now_millis())
                && table.start_fetch(&key, RequestId::next());
            table.events.push(StoreEvent::Prefetch {
                key: key.clone(),
                fetched,
            });
            fetched
        };

        if fetched {
            self.link.shared.notify();
        }
    }
}

impl<A, T, E> fmt::Debug for MemoryQuery<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.link.shared.table.lock();
        f.debug_struct("MemoryQuery")
            .field("name", &self.name)
            .field("entries", &table.entries.len())
            .field("subscriptions", &table.subscriptions.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Mutations
// ----------------------------------------------------------------------------

struct MutationTable<A, T, E> {
    entries: IndexMap<RequestId, Arc<CacheEntry<T, E>>>,
    args: IndexMap<RequestId, A>,
    settle: HashMap<RequestId, oneshot::Sender<std::result::Result<T, E>>>,
    events: Vec<StoreEvent>,
}

struct MutationLink<A, T, E> {
    shared: Shared<MutationTable<A, T, E>>,
}

impl<A, T, E> SubscriptionLink for MutationLink<A, T, E>
where
    A: Send + 'static,
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn refetch(&self, _request_id: RequestId) {}

    fn unsubscribe(&self, request_id: RequestId) {
        {
            let mut table = self.shared.table.lock();
            table.events.push(StoreEvent::Unsubscribe { request_id });
            table.entries.shift_remove(&request_id);
        }
        self.shared.notify();
    }

    fn update_subscription_options(&self, _request_id: RequestId, _options: &SubscriptionOptions) {}
}

/// In-memory store backing one mutation endpoint.
pub struct MemoryMutation<A, T, E> {
    name: Arc<str>,
    link: Arc<MutationLink<A, T, E>>,
    uninitialized: Arc<CacheEntry<T, E>>,
}

impl<A, T, E> MemoryMutation<A, T, E>
where
    A: Clone + Send + 'static,
    T: Clone + PartialEq + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            link: Arc::new(MutationLink {
                shared: Shared::new(MutationTable {
                    entries: IndexMap::new(),
                    args: IndexMap::new(),
                    settle: HashMap::new(),
                    events: Vec::new(),
                }),
            }),
            uninitialized: Arc::new(CacheEntry::uninitialized()),
        }
    }

    /// Notify `runtime` on every store-visible change.
    pub fn with_runtime(self, runtime: &Runtime) -> Self {
        *self.link.shared.runtime.write() = Some(runtime.clone());
        self
    }

    /// Settle `request_id` successfully.
    pub fn fulfill(&self, request_id: RequestId, data: T) {
        self.settle(request_id, Ok(data));
    }

    /// Settle `request_id` with an error.
    pub fn reject(&self, request_id: RequestId, error: E) {
        self.settle(request_id, Err(error));
    }

    /// Drop `request_id` without settling; awaiting callers see
    /// `MutationError::Abandoned`.
    pub fn abandon(&self, request_id: RequestId) {
        self.link.shared.table.lock().settle.remove(&request_id);
    }

    fn settle(&self, request_id: RequestId, outcome: std::result::Result<T, E>) {
        let sender = {
            let mut table = self.link.shared.table.lock();
            // A released request keeps no entry, but its caller may still
            // be awaiting the outcome.
            if let Some(current) = table.entries.get(&request_id) {
                let mut entry = CacheEntry::clone(current);
                match &outcome {
                    Ok(data) => {
                        entry.status = QueryStatus::Fulfilled;
                        entry.data = Some(data.clone());
                        entry.error = None;
                        entry.fulfilled_timestamp = Some(now_millis());
                    }
                    Err(error) => {
                        entry.status = QueryStatus::Rejected;
                        entry.error = Some(error.clone());
                    }
                }
                table.entries.insert(request_id, Arc::new(entry));
            }
            table.settle.remove(&request_id)
        };

        if let Some(sender) = sender {
            // The caller may have dropped the handle; nothing to report then.
            let _ = sender.send(outcome);
        }
        self.link.shared.notify();
    }

    /// Argument `request_id` was started with.
    pub fn arg_of(&self, request_id: RequestId) -> Option<A> {
        self.link.shared.table.lock().args.get(&request_id).cloned()
    }

    /// Snapshot of the event log.
    pub fn events(&self) -> Vec<StoreEvent> {
        self.link.shared.table.lock().events.clone()
    }
}

impl<A, T, E> MutationEndpoint for MemoryMutation<A, T, E>
where
    A: Clone + Send + Sync + 'static,
    T: Clone + PartialEq + Send + Sync + 'static,
    E: Clone + PartialEq + Send + Sync + 'static,
{
    type Arg = A;
    type Data = T;
    type Error = E;

    fn name(&self) -> &str {
        &self.name
    }

    fn initiate(&self, arg: A) -> MutationHandle<T, E> {
        let request_id = RequestId::next();
        let (sender, receiver) = oneshot::channel();

        {
            let mut table = self.link.shared.table.lock();
            table.events.push(StoreEvent::Mutate { request_id });
            table.entries.insert(
                request_id,
                Arc::new(CacheEntry {
                    status: QueryStatus::Pending,
                    request_id: Some(request_id),
                    subscriber_count: 1,
                    ..CacheEntry::uninitialized()
                }),
            );
            table.args.insert(request_id, arg);
            table.settle.insert(request_id, sender);
        }

        debug!(endpoint = %self.name, %request_id, "memory store mutation started");
        self.link.shared.notify();

        MutationHandle::new(request_id, self.link.clone(), receiver)
    }

    fn select(&self, request_id: Option<RequestId>) -> Arc<CacheEntry<T, E>> {
        request_id
            .and_then(|id| self.link.shared.table.lock().entries.get(&id).cloned())
            .unwrap_or_else(|| self.uninitialized.clone())
    }
}

impl<A, T, E> fmt::Debug for MemoryMutation<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.link.shared.table.lock();
        f.debug_struct("MemoryMutation")
            .field("name", &self.name)
            .field("entries", &table.entries.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    type Posts = MemoryQuery<u32, String, String>;

    fn initiate(store: &Posts, arg: u32, force: RefetchOnMount) -> QueryHandle<u32> {
        store
            .initiate(
                Stable::new(arg),
                InitiateOptions {
                    subscription_options: Stable::new(SubscriptionOptions::default()),
                    force_refetch: force,
                },
            )
            .unwrap()
    }

    #[test]
    fn initiate_fetches_once_and_counts_subscribers() {
        let store = Posts::new("getPost");

        let first = initiate(&store, 1, RefetchOnMount::Never);
        let second = initiate(&store, 1, RefetchOnMount::Always);

        // The second request finds the entry pending and does not refetch.
        assert_eq!(store.fetch_count(), 1);
        assert_eq!(store.subscriber_count(&1).unwrap(), 2);
        assert!(store.select(Some(&1)).is_pending());

        first.unsubscribe();
        assert_eq!(store.subscriber_count(&1).unwrap(), 1);
        assert_eq!(store.select(Some(&1)).subscriber_count, 1);
        second.unsubscribe();
        assert_eq!(store.active_subscriptions(), 0);
    }

    #[test]
    fn fulfilled_entry_is_reused_unless_forced() {
        let store = Posts::new("getPost");
        let _first = initiate(&store, 1, RefetchOnMount::Never);
        store.fulfill(&1, "post".to_string()).unwrap();

        let _reuse = initiate(&store, 1, RefetchOnMount::Never);
        assert_eq!(store.fetch_count(), 1);

        let _forced = initiate(&store, 1, RefetchOnMount::Always);
        assert_eq!(store.fetch_count(), 2);

        let entry = store.select(Some(&1));
        assert!(entry.is_pending());
        assert_eq!(entry.data.as_deref(), Some("post"));
    }

    #[test]
    fn older_than_policy_uses_fulfilled_timestamp() {
        let store = Posts::new("getPost");
        store.fulfill_at(&1, "stale".to_string(), 0).unwrap();
        store.fulfill(&2, "fresh".to_string()).unwrap();

        let _stale = initiate(&store, 1, RefetchOnMount::OlderThan(60));
        let _fresh = initiate(&store, 2, RefetchOnMount::OlderThan(60));

        assert_eq!(store.fetch_count(), 1);
        assert!(store.select(Some(&1)).is_pending());
        assert!(store.select(Some(&2)).is_fulfilled());
    }

    #[test]
    fn skip_key_is_uninitialized_and_stable() {
        let store = Posts::new("getPost");
        let a = store.select(None);
        let b = store.select(None);
        assert!(a.is_uninitialized());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &store.select(Some(&99))));
    }

    #[test]
    fn rejected_entry_keeps_data_and_is_refetched() {
        let store = Posts::new("getPost");
        store.fulfill(&1, "old".to_string()).unwrap();
        store.reject(&1, "timeout".to_string()).unwrap();

        let entry = store.select(Some(&1));
        assert!(entry.is_rejected());
        assert_eq!(entry.data.as_deref(), Some("old"));
        assert_eq!(entry.error.as_deref(), Some("timeout"));

        let _handle = initiate(&store, 1, RefetchOnMount::Never);
        assert_eq!(store.fetch_count(), 1);
    }

    #[test]
    fn prefetch_does_not_subscribe() {
        let store = Posts::new("getPost");

        store.prefetch(&1, &PrefetchOptions::default());
        assert_eq!(store.fetch_count(), 1);
        assert_eq!(store.active_subscriptions(), 0);

        store.fulfill(&1, "post".to_string()).unwrap();
        store.prefetch(&1, &PrefetchOptions::default());
        assert_eq!(store.fetch_count(), 1);

        store.prefetch(
            &1,
            &PrefetchOptions {
                force: Some(true),
                ..Default::default()
            },
        );
        assert_eq!(store.fetch_count(), 2);
        assert!(matches!(
            store.events().last(),
            Some(StoreEvent::Prefetch { fetched: true, .. })
        ));
    }

    #[test]
    fn refetch_and_option_updates_are_recorded() {
        let store = Posts::new("getPost");
        let handle = initiate(&store, 1, RefetchOnMount::Never);
        store.fulfill(&1, "post".to_string()).unwrap();

        handle.refetch();
        assert_eq!(store.fetch_count(), 2);

        let options = SubscriptionOptions {
            polling_interval: 1000,
            ..Default::default()
        };
        handle.update_subscription_options(Stable::new(options.clone()));
        assert_eq!(store.subscription_options(handle.request_id()), Some(options));
    }

    #[test]
    fn store_writes_notify_attached_runtime() {
        let runtime = Runtime::new();
        let store = Posts::new("getPost").with_runtime(&runtime);

        let handle = initiate(&store, 1, RefetchOnMount::Never);
        store.fulfill(&1, "post".to_string()).unwrap();
        handle.unsubscribe();

        assert_eq!(runtime.notification_count(), 3);
    }

    #[tokio::test]
    async fn mutation_lifecycle() {
        let store: MemoryMutation<String, u32, String> = MemoryMutation::new("addPost");

        let handle = store.initiate("hello".to_string());
        let id = handle.request_id();
        assert!(store.select(Some(id)).is_pending());
        assert!(store.select(None).is_uninitialized());
        assert_eq!(store.arg_of(id).as_deref(), Some("hello"));

        store.fulfill(id, 5);
        assert_eq!(store.select(Some(id)).data, Some(5));
        assert_eq!(handle.unwrap().await, Ok(5));
    }

    #[tokio::test]
    async fn unsubscribed_mutation_still_settles_its_caller() {
        let store: MemoryMutation<(), u32, String> = MemoryMutation::new("addPost");

        let handle = store.initiate(());
        let id = handle.request_id();
        handle.unsubscribe();
        assert!(store.select(Some(id)).is_uninitialized());

        store.reject(id, "denied".to_string());
        assert!(store.select(Some(id)).is_uninitialized());
        assert_eq!(
            handle.unwrap().await,
            Err(crate::error::MutationError::Rejected("denied".to_string()))
        );
    }
}
