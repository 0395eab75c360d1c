//! Mutation Controller
//!
//! Starts mutations and follows the most recent one. Each trigger gets a
//! fresh request id; the previous request's subscription is released first,
//! so the view never mixes results of different requests. Callers that need
//! the outcome of one specific request await its [`MutationHandle`].
//!
//! The view is the entry of the followed request passed through a
//! [`MutationSelector`], memoized on the request id, the entry snapshot and
//! the selector identity.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::outside_pass;
use super::status::{DerivedStatus, MutationSelector};
use crate::reactive::{
    ConsumerId, EvalContext, Pass, Runtime, SelectorMemo, Stable, StableValue, StateCell,
};
use crate::store::{CacheEntry, MutationEndpoint, MutationHandle, MutationSubscription, RequestId};

type Status<M> = DerivedStatus<<M as MutationEndpoint>::Data, <M as MutationEndpoint>::Error>;
type Entry<M> = CacheEntry<<M as MutationEndpoint>::Data, <M as MutationEndpoint>::Error>;
type Selector<M> = MutationSelector<<M as MutationEndpoint>::Data, <M as MutationEndpoint>::Error>;

/// Per-pass options of a [`Mutation`].
pub struct MutationOptions<T, E> {
    pub selector: MutationSelector<T, E>,
}

impl<T, E> MutationOptions<T, E> {
    pub fn with_selector(selector: MutationSelector<T, E>) -> Self {
        Self { selector }
    }
}

impl<T, E> Default for MutationOptions<T, E> {
    fn default() -> Self {
        Self {
            selector: MutationSelector::Default,
        }
    }
}

impl<T, E> Clone for MutationOptions<T, E> {
    fn clone(&self) -> Self {
        Self {
            selector: self.selector.clone(),
        }
    }
}

impl<T, E> fmt::Debug for MutationOptions<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationOptions")
            .field("selector", &self.selector)
            .finish()
    }
}

/// Mutation controller for one consumer.
pub struct Mutation<M: MutationEndpoint> {
    consumer: ConsumerId,
    endpoint: Arc<M>,
    runtime: Runtime,
    current: Arc<Mutex<Option<MutationSubscription>>>,
    request_id: StateCell<Option<RequestId>>,
    memo: SelectorMemo<(Option<RequestId>, Stable<Entry<M>>, Selector<M>), Stable<Status<M>>>,
    output: StableValue<Status<M>>,
}

impl<M: MutationEndpoint> Mutation<M> {
    pub fn new(endpoint: Arc<M>, runtime: &Runtime) -> Self {
        Self {
            consumer: ConsumerId::new(),
            endpoint,
            runtime: runtime.clone(),
            current: Arc::new(Mutex::new(None)),
            request_id: StateCell::new(runtime, None),
            memo: SelectorMemo::new(),
            output: StableValue::new(),
        }
    }

    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    /// Start a mutation for `arg`.
    ///
    /// The returned handle settles independently of this controller; its
    /// subscription is also held here until the next trigger, a reset or
    /// drop.
    ///
    /// Triggers belong outside evaluation passes. Called from inside one,
    /// the store is still written immediately because the handle must be
    /// returned, and a warning is logged. The previous subscription is
    /// released before the new request starts in both cases.
    pub fn trigger(&self, arg: M::Arg) -> MutationHandle<M::Data, M::Error> {
        if EvalContext::is_active() {
            warn!(
                consumer = %self.consumer,
                endpoint = self.endpoint.name(),
                "mutation triggered during an evaluation pass"
            );
        }

        self.runtime.batch(|| {
            let previous = self.current.lock().take();
            if let Some(previous) = previous {
                previous.unsubscribe();
            }

            let handle = self.endpoint.initiate(arg);
            debug!(
                consumer = %self.consumer,
                endpoint = self.endpoint.name(),
                request_id = %handle.request_id(),
                "mutation trigger"
            );
            *self.current.lock() = Some(handle.subscription());
            self.request_id.set(Some(handle.request_id()));
            handle
        })
    }

    /// Evaluate for one pass.
    pub fn evaluate(
        &mut self,
        _pass: &mut Pass<'_>,
        options: &MutationOptions<M::Data, M::Error>,
    ) -> Stable<Status<M>> {
        let request_id = self.request_id.get();
        let entry = Stable::from_arc(self.endpoint.select(request_id));
        let selector = options.selector.clone();

        let output = &mut self.output;
        self.memo.get_or_compute((request_id, entry.clone(), selector), || {
            output.stabilize(options.selector.select(&*entry))
        })
    }

    /// Number of times the selection has run.
    pub fn selections(&self) -> u64 {
        self.memo.computations()
    }

    /// Release the current request and return the view to uninitialized.
    pub fn reset(&self) {
        self.runtime.batch(|| {
            self.release_current();
            self.request_id.set(None);
        });
    }

    /// Request id the view follows.
    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id.get()
    }

    fn release_current(&self) {
        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            outside_pass(&self.runtime, "mutation release", move || previous.unsubscribe());
        }
    }
}

impl<M: MutationEndpoint> Drop for Mutation<M> {
    fn drop(&mut self) {
        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            self.runtime.defer(Box::new(move || previous.unsubscribe()));
        }
    }
}

impl<M: MutationEndpoint> fmt::Debug for Mutation<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("consumer", &self.consumer)
            .field("endpoint", &self.endpoint.name())
            .field("request_id", &self.request_id())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MutationError;
    use crate::store::memory::{MemoryMutation, StoreEvent};

    type AddPost = MemoryMutation<String, u32, String>;

    fn setup() -> (Runtime, Arc<AddPost>, Mutation<AddPost>) {
        let runtime = Runtime::new();
        let store = Arc::new(AddPost::new("addPost").with_runtime(&runtime));
        let mutation = Mutation::new(store.clone(), &runtime);
        (runtime, store, mutation)
    }

    fn read(runtime: &Runtime, mutation: &mut Mutation<AddPost>) -> Stable<DerivedStatus<u32, String>> {
        runtime.pass(|pass| mutation.evaluate(pass, &MutationOptions::default()))
    }

    #[test]
    fn idle_view_is_uninitialized() {
        let (runtime, _store, mut mutation) = setup();
        let status = read(&runtime, &mut mutation);
        assert!(status.is_uninitialized);
        assert_eq!(read(&runtime, &mut mutation), status);
    }

    #[tokio::test]
    async fn trigger_follows_the_request_to_completion() {
        let (runtime, store, mut mutation) = setup();

        let handle = mutation.trigger("hello".to_string());
        let request_id = handle.request_id();
        let pending = read(&runtime, &mut mutation);
        assert!(pending.is_loading);
        assert_eq!(pending.request_id, Some(request_id));

        store.fulfill(request_id, 1);
        let done = read(&runtime, &mut mutation);
        assert!(done.is_success);
        assert_eq!(done.data, Some(1));

        assert_eq!(handle.unwrap().await, Ok(1));
    }

    #[tokio::test]
    async fn second_trigger_closes_exactly_the_first() {
        let (runtime, store, mut mutation) = setup();

        let first = mutation.trigger("a".to_string());
        let second = mutation.trigger("b".to_string());
        let (first_id, second_id) = (first.request_id(), second.request_id());
        assert_ne!(first_id, second_id);

        let unsubscribed: Vec<_> = store
            .events()
            .into_iter()
            .filter_map(|event| match event {
                StoreEvent::Unsubscribe { request_id } => Some(request_id),
                _ => None,
            })
            .collect();
        assert_eq!(unsubscribed, vec![first_id]);

        // Settling the first request does not leak into the view.
        store.reject(first_id, "conflict".to_string());
        let status = read(&runtime, &mut mutation);
        assert_eq!(status.request_id, Some(second_id));
        assert!(status.is_loading);
        assert!(status.error.is_none());

        assert_eq!(
            first.unwrap().await,
            Err(MutationError::Rejected("conflict".to_string()))
        );
    }

    #[test]
    fn trigger_notifies_once() {
        let (runtime, _store, mutation) = setup();
        mutation.trigger("a".to_string());

        let before = runtime.notification_count();
        mutation.trigger("b".to_string());
        assert_eq!(runtime.notification_count(), before + 1);
    }

    #[test]
    fn reset_returns_to_uninitialized() {
        let (runtime, store, mut mutation) = setup();
        let handle = mutation.trigger("a".to_string());

        mutation.reset();
        assert_eq!(mutation.request_id(), None);
        assert!(read(&runtime, &mut mutation).is_uninitialized);
        assert!(store
            .events()
            .contains(&StoreEvent::Unsubscribe { request_id: handle.request_id() }));
    }

    #[test]
    fn custom_selector_is_applied_and_memoized() {
        let (runtime, store, mut mutation) = setup();
        let selector = MutationSelector::<u32, String>::custom(|entry, default| {
            let mut derived = default(entry);
            derived.data = derived.data.map(|id| id * 100);
            derived
        });
        let options = MutationOptions::with_selector(selector);

        let handle = mutation.trigger("a".to_string());
        store.fulfill(handle.request_id(), 7);

        let first = runtime.pass(|pass| mutation.evaluate(pass, &options));
        assert_eq!(first.data, Some(700));
        assert!(first.is_success);

        // Same selector, same entry: the cached view is returned.
        let again = runtime.pass(|pass| mutation.evaluate(pass, &options.clone()));
        assert!(Stable::same(&first, &again));
        assert_eq!(mutation.selections(), 1);

        // A different selector identity selects again.
        let plain = read(&runtime, &mut mutation);
        assert_eq!(plain.data, Some(7));
        assert_eq!(mutation.selections(), 2);
    }

    #[test]
    fn trigger_inside_pass_releases_before_initiating() {
        let (runtime, store, mutation) = setup();

        let (first, second) = runtime.pass(|_| {
            let first = mutation.trigger("a".to_string());
            let second = mutation.trigger("b".to_string());
            (first.request_id(), second.request_id())
        });

        let events = store.events();
        let released = events
            .iter()
            .position(|event| *event == StoreEvent::Unsubscribe { request_id: first })
            .unwrap();
        let started = events
            .iter()
            .position(|event| *event == StoreEvent::Mutate { request_id: second })
            .unwrap();
        assert!(released < started);
        assert_eq!(runtime.pending_effects(), 0);
    }

    #[test]
    fn drop_releases_at_next_flush() {
        let (runtime, store, mutation) = setup();
        let handle = mutation.trigger("a".to_string());

        drop(mutation);
        assert!(store.select(Some(handle.request_id())).is_pending());

        runtime.flush().unwrap();
        assert!(store.select(Some(handle.request_id())).is_uninitialized());
    }
}
