//! Query Subscription Controller
//!
//! Keeps at most one store subscription open for the consumer's current
//! argument, re-initiating when the argument changes and updating options in
//! place when only the options change.
//!
//! # Lifecycle
//!
//! 1. Each pass stabilizes the argument and the subscription options, then
//!    schedules the subscribe effect with `(skip, arg, options, policy)` as
//!    dependencies.
//!
//! 2. When the effect runs and the held handle was opened for a different
//!    argument, the old handle is released before the new one is initiated.
//!
//! 3. Dropping the controller releases the handle at the next flush.
//!
//! Skipping never closes an open handle; it only stops new initiates.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::outside_pass;
use crate::config::HookConfig;
use crate::reactive::{ConsumerId, Effect, Pass, Runtime, Stable, StableValue};
use crate::store::{InitiateOptions, QueryEndpoint, QueryHandle, RefetchOnMount, SubscriptionOptions};

/// Per-pass options of a [`QuerySubscription`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySubscriptionOptions {
    /// Do not initiate. An already open subscription stays open.
    pub skip: bool,
    pub refetch_on_mount_or_arg_change: RefetchOnMount,
    pub refetch_on_reconnect: Option<bool>,
    pub refetch_on_focus: Option<bool>,
    /// Polling interval in milliseconds, `0` disables polling.
    pub polling_interval: u64,
}

impl QuerySubscriptionOptions {
    /// Options seeded from configured defaults.
    pub fn from_config(config: &HookConfig) -> Self {
        Self {
            skip: false,
            refetch_on_mount_or_arg_change: config.refetch_on_mount_or_arg_change,
            refetch_on_reconnect: config.subscription.refetch_on_reconnect,
            refetch_on_focus: config.subscription.refetch_on_focus,
            polling_interval: config.subscription.polling_interval,
        }
    }

    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    /// The part of the options recorded on the store subscription.
    pub fn subscription_options(&self) -> SubscriptionOptions {
        SubscriptionOptions {
            refetch_on_reconnect: self.refetch_on_reconnect,
            refetch_on_focus: self.refetch_on_focus,
            polling_interval: self.polling_interval,
        }
    }
}

/// The slot holding a controller's current handle.
pub(crate) type HandleSlot<A> = Arc<Mutex<Option<Arc<QueryHandle<A>>>>>;

/// Release and clear whatever handle `slot` holds.
pub(crate) fn release_slot<A>(slot: &HandleSlot<A>) {
    let handle = slot.lock().take();
    if let Some(handle) = handle {
        handle.unsubscribe();
    }
}

/// Refetch view handed to consumers.
///
/// It can only refetch whatever handle the controller holds when called.
pub struct Refetch<A> {
    slot: HandleSlot<A>,
    runtime: Runtime,
}

impl<A> Refetch<A>
where
    A: Send + Sync + 'static,
{
    /// Refetch the current subscription. No-op when none is open.
    pub fn refetch(&self) {
        let slot = Arc::clone(&self.slot);
        outside_pass(&self.runtime, "refetch", move || {
            let handle = slot.lock().clone();
            if let Some(handle) = handle {
                handle.refetch();
            }
        });
    }

    /// Whether a subscription is currently open.
    pub fn is_subscribed(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl<A> Clone for Refetch<A> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            runtime: self.runtime.clone(),
        }
    }
}

impl<A> fmt::Debug for Refetch<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Refetch")
            .field("subscribed", &self.slot.lock().is_some())
            .finish()
    }
}

type SubscribeDeps<A> = (bool, Stable<A>, Stable<SubscriptionOptions>, RefetchOnMount);

/// Subscription controller for one consumer.
pub struct QuerySubscription<Q: QueryEndpoint> {
    consumer: ConsumerId,
    endpoint: Arc<Q>,
    runtime: Runtime,
    arg: StableValue<Q::Arg>,
    options: StableValue<SubscriptionOptions>,
    slot: HandleSlot<Q::Arg>,
    subscribe: Effect<SubscribeDeps<Q::Arg>>,
}

impl<Q: QueryEndpoint> QuerySubscription<Q> {
    pub fn new(endpoint: Arc<Q>, runtime: &Runtime) -> Self {
        Self {
            consumer: ConsumerId::new(),
            endpoint,
            runtime: runtime.clone(),
            arg: StableValue::new(),
            options: StableValue::new(),
            slot: Arc::new(Mutex::new(None)),
            subscribe: Effect::new(),
        }
    }

    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    /// Evaluate for one pass.
    pub fn evaluate(
        &mut self,
        pass: &mut Pass<'_>,
        arg: Q::Arg,
        options: &QuerySubscriptionOptions,
    ) -> Refetch<Q::Arg> {
        let arg = self.arg.stabilize(arg);
        self.evaluate_stable(pass, arg, options)
    }

    /// Evaluate with an argument the caller already stabilized.
    pub(crate) fn evaluate_stable(
        &mut self,
        pass: &mut Pass<'_>,
        arg: Stable<Q::Arg>,
        options: &QuerySubscriptionOptions,
    ) -> Refetch<Q::Arg> {
        let subscription_options = self.options.stabilize(options.subscription_options());
        let skip = options.skip;
        let force_refetch = options.refetch_on_mount_or_arg_change;

        let deps = (skip, arg.clone(), subscription_options.clone(), force_refetch);
        let endpoint = Arc::clone(&self.endpoint);
        let slot = Arc::clone(&self.slot);
        let consumer = self.consumer;

        self.subscribe.schedule(pass, deps, move || {
            if skip {
                return None;
            }
            sync_subscription(
                consumer,
                &*endpoint,
                &slot,
                arg,
                subscription_options,
                force_refetch,
            );
            None
        });

        self.refetch()
    }

    /// The refetch view of this controller.
    pub fn refetch(&self) -> Refetch<Q::Arg> {
        Refetch {
            slot: Arc::clone(&self.slot),
            runtime: self.runtime.clone(),
        }
    }

    /// Request id of the open subscription, if any.
    pub fn request_id(&self) -> Option<crate::store::RequestId> {
        self.slot.lock().as_ref().map(|handle| handle.request_id())
    }
}

/// Bring the handle in `slot` in line with `arg` and `options`.
fn sync_subscription<Q: QueryEndpoint>(
    consumer: ConsumerId,
    endpoint: &Q,
    slot: &HandleSlot<Q::Arg>,
    arg: Stable<Q::Arg>,
    options: Stable<SubscriptionOptions>,
    force_refetch: RefetchOnMount,
) {
    let current = slot.lock().clone();

    if let Some(handle) = &current {
        if *handle.arg() == arg {
            if handle.subscription_options() != options {
                handle.update_subscription_options(options);
            }
            return;
        }
    }

    // The previous argument's subscription closes before the new one opens.
    if current.is_some() {
        release_slot(slot);
    }

    debug!(%consumer, endpoint = endpoint.name(), ?arg, "initiate");
    let initiated = endpoint.initiate(
        arg,
        InitiateOptions {
            subscription_options: options,
            force_refetch,
        },
    );
    match initiated {
        Ok(handle) => *slot.lock() = Some(Arc::new(handle)),
        Err(err) => error!(%consumer, endpoint = endpoint.name(), error = %err, "initiate failed"),
    }
}

impl<Q: QueryEndpoint> Drop for QuerySubscription<Q> {
    fn drop(&mut self) {
        self.subscribe.dispose(&self.runtime);
        let slot = Arc::clone(&self.slot);
        self.runtime.defer(Box::new(move || release_slot(&slot)));
    }
}

impl<Q: QueryEndpoint> fmt::Debug for QuerySubscription<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySubscription")
            .field("consumer", &self.consumer)
            .field("endpoint", &self.endpoint.name())
            .field("request_id", &self.request_id())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
