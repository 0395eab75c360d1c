//! Lazy Query Subscription Controller
//!
//! Subscribes only when the consumer calls the trigger, typically from an
//! event handler. The last triggered argument is consumer state: setting it
//! re-evaluates the consumer, which then reads the argument's entry.
//!
//! # Triggering
//!
//! A trigger releases the current handle, initiates for the new argument and
//! records the argument, all inside one [`Runtime::batch`], so the consumer
//! sees one update. Unless the caller prefers cached data the initiate always
//! refetches.
//!
//! # Recovery
//!
//! When a teardown released the handle but the consumer survived (see
//! [`LazyQuerySubscription::remount`]), the recovery effect finds an argument
//! without a handle and triggers it again, preferring cached data.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use super::outside_pass;
use super::subscription::{release_slot, HandleSlot};
use crate::reactive::{Cleanup, ConsumerId, Effect, Pass, Runtime, Stable, StableValue, StateCell};
use crate::store::{InitiateOptions, QueryEndpoint, RefetchOnMount, SubscriptionOptions};

/// The last triggered argument of a lazy query.
pub enum LazyArg<A> {
    /// Never triggered. Distinct from every argument value.
    Uninitialized,
    Arg(Stable<A>),
}

impl<A> LazyArg<A> {
    pub fn is_uninitialized(&self) -> bool {
        matches!(self, LazyArg::Uninitialized)
    }

    /// The argument, if one was triggered.
    pub fn get(&self) -> Option<&A> {
        match self {
            LazyArg::Uninitialized => None,
            LazyArg::Arg(arg) => Some(&**arg),
        }
    }

    pub fn stable(&self) -> Option<&Stable<A>> {
        match self {
            LazyArg::Uninitialized => None,
            LazyArg::Arg(arg) => Some(arg),
        }
    }
}

impl<A> Clone for LazyArg<A> {
    fn clone(&self) -> Self {
        match self {
            LazyArg::Uninitialized => LazyArg::Uninitialized,
            LazyArg::Arg(arg) => LazyArg::Arg(arg.clone()),
        }
    }
}

/// Identity comparison: two triggers with equal arguments differ.
impl<A> PartialEq for LazyArg<A> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LazyArg::Uninitialized, LazyArg::Uninitialized) => true,
            (LazyArg::Arg(a), LazyArg::Arg(b)) => a == b,
            _ => false,
        }
    }
}

impl<A> Default for LazyArg<A> {
    fn default() -> Self {
        LazyArg::Uninitialized
    }
}

impl<A: fmt::Debug> fmt::Debug for LazyArg<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LazyArg::Uninitialized => f.write_str("Uninitialized"),
            LazyArg::Arg(arg) => f.debug_tuple("Arg").field(&**arg).finish(),
        }
    }
}

/// State shared by the controller, its triggers and its effects.
struct LazyShared<Q: QueryEndpoint> {
    consumer: ConsumerId,
    endpoint: Arc<Q>,
    runtime: Runtime,
    slot: HandleSlot<Q::Arg>,
    /// Options the next trigger subscribes with.
    options: Mutex<Option<Stable<SubscriptionOptions>>>,
    arg: StateCell<LazyArg<Q::Arg>>,
}

impl<Q: QueryEndpoint> LazyShared<Q> {
    fn start(&self, arg: Stable<Q::Arg>, prefer_cache_value: bool) {
        let force_refetch = RefetchOnMount::from(!prefer_cache_value);
        let subscription_options = self
            .options
            .lock()
            .clone()
            .unwrap_or_else(|| Stable::new(SubscriptionOptions::default()));

        self.runtime.batch(|| {
            release_slot(&self.slot);

            debug!(
                consumer = %self.consumer,
                endpoint = self.endpoint.name(),
                ?arg,
                prefer_cache_value,
                "lazy trigger"
            );
            let initiated = self.endpoint.initiate(
                arg.clone(),
                InitiateOptions {
                    subscription_options,
                    force_refetch,
                },
            );
            match initiated {
                Ok(handle) => *self.slot.lock() = Some(Arc::new(handle)),
                Err(err) => error!(
                    consumer = %self.consumer,
                    endpoint = self.endpoint.name(),
                    error = %err,
                    "initiate failed"
                ),
            }

            self.arg.set(LazyArg::Arg(arg));
        });
    }
}

/// Trigger of a lazy query. Clones trigger the same controller.
pub struct LazyTrigger<Q: QueryEndpoint> {
    shared: Arc<LazyShared<Q>>,
}

impl<Q: QueryEndpoint> LazyTrigger<Q> {
    /// Subscribe to `arg`, always refetching.
    pub fn trigger(&self, arg: Q::Arg) {
        self.trigger_with(arg, false);
    }

    /// Subscribe to `arg`. With `prefer_cache_value` cached data is reused
    /// when the store considers it fresh.
    pub fn trigger_with(&self, arg: Q::Arg, prefer_cache_value: bool) {
        let shared = Arc::clone(&self.shared);
        let arg = Stable::new(arg);
        outside_pass(&self.shared.runtime, "lazy trigger", move || {
            shared.start(arg, prefer_cache_value)
        });
    }
}

impl<Q: QueryEndpoint> Clone for LazyTrigger<Q> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<Q: QueryEndpoint> fmt::Debug for LazyTrigger<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyTrigger")
            .field("consumer", &self.shared.consumer)
            .field("endpoint", &self.shared.endpoint.name())
            .finish()
    }
}

/// Lazy subscription controller for one consumer.
pub struct LazyQuerySubscription<Q: QueryEndpoint> {
    shared: Arc<LazyShared<Q>>,
    options: StableValue<SubscriptionOptions>,
    sync_options: Effect<Stable<SubscriptionOptions>>,
    mount: Effect<()>,
    recover: Effect<LazyArg<Q::Arg>>,
}

impl<Q: QueryEndpoint> LazyQuerySubscription<Q> {
    pub fn new(endpoint: Arc<Q>, runtime: &Runtime) -> Self {
        Self {
            shared: Arc::new(LazyShared {
                consumer: ConsumerId::new(),
                endpoint,
                runtime: runtime.clone(),
                slot: Arc::new(Mutex::new(None)),
                options: Mutex::new(None),
                arg: StateCell::new(runtime, LazyArg::Uninitialized),
            }),
            options: StableValue::new(),
            sync_options: Effect::new(),
            mount: Effect::new(),
            recover: Effect::new(),
        }
    }

    pub fn consumer(&self) -> ConsumerId {
        self.shared.consumer
    }

    /// Evaluate for one pass. Returns the trigger and the last triggered
    /// argument.
    pub fn evaluate(
        &mut self,
        pass: &mut Pass<'_>,
        options: &SubscriptionOptions,
    ) -> (LazyTrigger<Q>, LazyArg<Q::Arg>) {
        let options = self.options.stabilize(options.clone());
        {
            // The first pass seeds the options so a trigger fired before the
            // first flush uses them.
            let mut mirror = self.shared.options.lock();
            if mirror.is_none() {
                *mirror = Some(options.clone());
            }
        }

        let shared = Arc::clone(&self.shared);
        let synced = options.clone();
        self.sync_options.schedule(pass, options, move || {
            let handle = shared.slot.lock().clone();
            if let Some(handle) = handle {
                if handle.subscription_options() != synced {
                    handle.update_subscription_options(synced.clone());
                }
            }
            *shared.options.lock() = Some(synced);
            None
        });

        let shared = Arc::clone(&self.shared);
        self.mount.schedule(pass, (), move || {
            Some(Box::new(move || release_slot(&shared.slot)) as Cleanup)
        });

        let arg = self.shared.arg.get();
        let shared = Arc::clone(&self.shared);
        let pending = arg.clone();
        self.recover.schedule(pass, arg.clone(), move || {
            if let LazyArg::Arg(arg) = pending {
                let detached = shared.slot.lock().is_none();
                if detached {
                    debug!(consumer = %shared.consumer, ?arg, "resuming lazy query");
                    shared.start(arg, true);
                }
            }
            None
        });

        (self.trigger(), arg)
    }

    pub fn trigger(&self) -> LazyTrigger<Q> {
        LazyTrigger {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The last triggered argument.
    pub fn last_arg(&self) -> LazyArg<Q::Arg> {
        self.shared.arg.get()
    }

    /// Request id of the open subscription, if any.
    pub fn request_id(&self) -> Option<crate::store::RequestId> {
        self.shared.slot.lock().as_ref().map(|handle| handle.request_id())
    }

    /// Tear down and re-arm every effect without dropping the controller.
    ///
    /// The next flush releases the handle; the pass after that resumes the
    /// last argument from cache.
    pub fn remount(&self) {
        debug!(consumer = %self.shared.consumer, "remount");
        let runtime = &self.shared.runtime;
        self.sync_options.reset(runtime);
        self.mount.reset(runtime);
        self.recover.reset(runtime);
    }
}

impl<Q: QueryEndpoint> Drop for LazyQuerySubscription<Q> {
    fn drop(&mut self) {
        let runtime = self.shared.runtime.clone();
        self.sync_options.dispose(&runtime);
        self.mount.dispose(&runtime);
        self.recover.dispose(&runtime);

        // A trigger may have opened a handle before the mount effect ran.
        let slot = Arc::clone(&self.shared.slot);
        runtime.defer(Box::new(move || release_slot(&slot)));
    }
}

impl<Q: QueryEndpoint> fmt::Debug for LazyQuerySubscription<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyQuerySubscription")
            .field("consumer", &self.shared.consumer)
            .field("endpoint", &self.shared.endpoint.name())
            .field("last_arg", &self.last_arg())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryQuery, StoreEvent};

    type Search = MemoryQuery<Option<String>, Vec<String>, String>;

    fn setup() -> (Runtime, Arc<Search>, LazyQuerySubscription<Search>) {
        let runtime = Runtime::new();
        let store = Arc::new(Search::new("search").with_runtime(&runtime));
        let lazy = LazyQuerySubscription::new(store.clone(), &runtime);
        (runtime, store, lazy)
    }

    fn mount(
        runtime: &Runtime,
        lazy: &mut LazyQuerySubscription<Search>,
    ) -> (LazyTrigger<Search>, LazyArg<Option<String>>) {
        let output = runtime.pass(|pass| lazy.evaluate(pass, &SubscriptionOptions::default()));
        runtime.flush().unwrap();
        output
    }

    fn subscribes(store: &Search) -> Vec<RefetchOnMount> {
        store
            .events()
            .into_iter()
            .filter_map(|event| match event {
                StoreEvent::Subscribe { force_refetch, .. } => Some(force_refetch),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn nothing_happens_until_triggered() {
        let (runtime, store, mut lazy) = setup();
        let (_, arg) = mount(&runtime, &mut lazy);

        assert!(arg.is_uninitialized());
        assert!(store.events().is_empty());
    }

    #[test]
    fn none_argument_is_not_the_sentinel() {
        let (runtime, _store, mut lazy) = setup();
        let (trigger, _) = mount(&runtime, &mut lazy);

        trigger.trigger(None);
        let (_, arg) = mount(&runtime, &mut lazy);

        assert!(!arg.is_uninitialized());
        assert_eq!(arg.get(), Some(&None));
    }

    #[test]
    fn trigger_notifies_once() {
        let (runtime, store, mut lazy) = setup();
        let (trigger, _) = mount(&runtime, &mut lazy);

        let before = runtime.notification_count();
        trigger.trigger(Some("rust".to_string()));

        assert_eq!(runtime.notification_count(), before + 1);
        assert_eq!(subscribes(&store), vec![RefetchOnMount::Always]);
        assert_eq!(lazy.last_arg().get(), Some(&Some("rust".to_string())));
    }

    #[test]
    fn second_trigger_releases_the_first_handle() {
        let (runtime, store, mut lazy) = setup();
        let (trigger, _) = mount(&runtime, &mut lazy);

        trigger.trigger(Some("a".to_string()));
        let first = lazy.request_id().unwrap();
        trigger.trigger_with(Some("b".to_string()), true);

        assert!(store.events().contains(&StoreEvent::Unsubscribe { request_id: first }));
        assert_eq!(store.active_subscriptions(), 1);
        assert_eq!(subscribes(&store), vec![RefetchOnMount::Always, RefetchOnMount::Never]);
    }

    #[test]
    fn option_change_reaches_open_handle() {
        let (runtime, store, mut lazy) = setup();
        let (trigger, _) = mount(&runtime, &mut lazy);
        trigger.trigger(None);

        let polling = SubscriptionOptions {
            polling_interval: 300,
            ..Default::default()
        };
        runtime.pass(|pass| lazy.evaluate(pass, &polling));
        runtime.flush().unwrap();

        let request_id = lazy.request_id().unwrap();
        assert_eq!(store.subscription_options(request_id), Some(polling.clone()));

        // Later triggers subscribe with the new options.
        trigger.trigger(Some("x".to_string()));
        let request_id = lazy.request_id().unwrap();
        assert_eq!(store.subscription_options(request_id), Some(polling));
    }

    #[test]
    fn remount_resumes_from_cache() {
        let (runtime, store, mut lazy) = setup();
        let (trigger, _) = mount(&runtime, &mut lazy);
        trigger.trigger(Some("q".to_string()));
        store.fulfill(&Some("q".to_string()), vec!["hit".to_string()]).unwrap();
        let first = lazy.request_id().unwrap();

        lazy.remount();
        mount(&runtime, &mut lazy);

        let resumed = lazy.request_id().unwrap();
        assert_ne!(resumed, first);
        assert_eq!(subscribes(&store), vec![RefetchOnMount::Always, RefetchOnMount::Never]);
        assert_eq!(store.fetch_count(), 1);
        assert_eq!(store.active_subscriptions(), 1);
    }

    #[test]
    fn trigger_during_a_pass_is_deferred() {
        let (runtime, store, mut lazy) = setup();
        let (trigger, _) = mount(&runtime, &mut lazy);

        runtime.pass(|_| trigger.trigger(Some("late".to_string())));
        assert!(store.events().is_empty());

        runtime.flush().unwrap();
        assert_eq!(store.active_subscriptions(), 1);
    }

    #[test]
    fn drop_releases_the_handle() {
        let (runtime, store, mut lazy) = setup();
        let (trigger, _) = mount(&runtime, &mut lazy);
        trigger.trigger(None);

        drop(lazy);
        runtime.flush().unwrap();
        assert_eq!(store.active_subscriptions(), 0);
    }
}
