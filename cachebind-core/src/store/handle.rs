//! Request handles.
//!
//! A handle is the only resource with explicit release semantics. It is
//! returned by an endpoint's `initiate` and owned by exactly one controller
//! until released. Store-specific behavior sits behind [`SubscriptionLink`];
//! the handle itself guarantees that release happens at most once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use super::{RequestId, SubscriptionOptions};
use crate::error::MutationError;
use crate::reactive::{EvalContext, Stable};

/// Store-side operations behind a handle.
pub trait SubscriptionLink: Send + Sync {
    /// Refetch the entry the request subscribed to.
    fn refetch(&self, request_id: RequestId);

    /// Drop the request's interest. Called at most once per request.
    fn unsubscribe(&self, request_id: RequestId);

    /// Replace the options recorded for the request.
    fn update_subscription_options(&self, request_id: RequestId, options: &SubscriptionOptions);
}

/// Release-once registration shared by both handle kinds.
struct Registration {
    request_id: RequestId,
    link: Arc<dyn SubscriptionLink>,
    released: AtomicBool,
}

impl Registration {
    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(request_id = %self.request_id, "unsubscribe");
        self.link.unsubscribe(self.request_id);
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Handle to one query subscription.
pub struct QueryHandle<A> {
    arg: Stable<A>,
    options: Mutex<Stable<SubscriptionOptions>>,
    registration: Registration,
}

impl<A> QueryHandle<A> {
    pub fn new(
        arg: Stable<A>,
        request_id: RequestId,
        options: Stable<SubscriptionOptions>,
        link: Arc<dyn SubscriptionLink>,
    ) -> Self {
        Self {
            arg,
            options: Mutex::new(options),
            registration: Registration {
                request_id,
                link,
                released: AtomicBool::new(false),
            },
        }
    }

    /// The argument the request was initiated with.
    pub fn arg(&self) -> &Stable<A> {
        &self.arg
    }

    pub fn request_id(&self) -> RequestId {
        self.registration.request_id
    }

    /// The options currently recorded on the subscription.
    pub fn subscription_options(&self) -> Stable<SubscriptionOptions> {
        self.options.lock().clone()
    }

    /// Refetch the subscribed entry. No-op once released.
    pub fn refetch(&self) {
        if self.registration.is_released() {
            return;
        }
        debug!(request_id = %self.request_id(), "refetch");
        self.registration.link.refetch(self.request_id());
    }

    /// Release the subscription. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        debug_assert!(
            self.is_released() || !EvalContext::is_active(),
            "unsubscribe of {} during an evaluation pass",
            self.registration.request_id
        );
        self.registration.release();
    }

    /// Replace the subscription options without re-initiating.
    pub fn update_subscription_options(&self, options: Stable<SubscriptionOptions>) {
        if self.registration.is_released() {
            return;
        }
        debug_assert!(!EvalContext::is_active(), "option update during an evaluation pass");
        debug!(request_id = %self.request_id(), ?options, "update subscription options");
        self.registration
            .link
            .update_subscription_options(self.request_id(), &options);
        *self.options.lock() = options;
    }

    pub fn is_released(&self) -> bool {
        self.registration.is_released()
    }
}

impl<A: fmt::Debug> fmt::Debug for QueryHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryHandle")
            .field("request_id", &self.request_id())
            .field("arg", &self.arg)
            .field("released", &self.is_released())
            .finish()
    }
}

/// The releasable half of a mutation handle, kept by the controller.
#[derive(Clone)]
pub struct MutationSubscription {
    registration: Arc<Registration>,
}

impl MutationSubscription {
    pub fn request_id(&self) -> RequestId {
        self.registration.request_id
    }

    /// Release the mutation's entry. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        self.registration.release();
    }

    pub fn is_released(&self) -> bool {
        self.registration.is_released()
    }
}

impl fmt::Debug for MutationSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationSubscription")
            .field("request_id", &self.request_id())
            .field("released", &self.is_released())
            .finish()
    }
}

/// Handle to one mutation request, returned to the caller of a trigger.
pub struct MutationHandle<T, E> {
    subscription: MutationSubscription,
    result: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> MutationHandle<T, E> {
    /// Build a handle. The store settles the request through the sender
    /// paired with `result`.
    pub fn new(
        request_id: RequestId,
        link: Arc<dyn SubscriptionLink>,
        result: oneshot::Receiver<Result<T, E>>,
    ) -> Self {
        Self {
            subscription: MutationSubscription {
                registration: Arc::new(Registration {
                    request_id,
                    link,
                    released: AtomicBool::new(false),
                }),
            },
            result,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.subscription.request_id()
    }

    /// A releasable view sharing this handle's registration.
    pub fn subscription(&self) -> MutationSubscription {
        self.subscription.clone()
    }

    pub fn unsubscribe(&self) {
        self.subscription.unsubscribe();
    }

    /// Wait for the request to settle.
    ///
    /// Resolves independently of any derived status view and of whether the
    /// subscription was released in the meantime.
    pub async fn unwrap(self) -> Result<T, MutationError<E>> {
        match self.result.await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(error)) => Err(MutationError::Rejected(error)),
            Err(_) => Err(MutationError::Abandoned),
        }
    }
}

impl<T, E> fmt::Debug for MutationHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationHandle")
            .field("request_id", &self.request_id())
            .field("released", &self.subscription.is_released())
            .finish()
    }
}
