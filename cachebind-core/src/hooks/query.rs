//! Query Compositions
//!
//! [`Query`] pairs a [`QuerySubscription`] with a [`QueryState`] for the same
//! argument. Unless the consumer skips or brings its own selector, the view
//! uses [`QuerySelector::NoPending`]: the subscribe effect has not run yet on
//! the first pass, but the fetch is certain, so that pass reports a first
//! load instead of "not started".
//!
//! [`LazyQuery`] pairs a [`LazyQuerySubscription`] with a [`QueryState`]
//! reading the last triggered argument, or the skip key before the first
//! trigger.

use std::fmt;
use std::sync::Arc;

use super::lazy::{LazyArg, LazyQuerySubscription, LazyTrigger};
use super::query_state::{QueryState, QueryStateOptions};
use super::status::{DerivedStatus, QuerySelector};
use super::subscription::{QuerySubscription, QuerySubscriptionOptions, Refetch};
use crate::reactive::{Pass, Runtime, Stable, StableValue};
use crate::store::{QueryEndpoint, SubscriptionOptions};

type Status<Q> = DerivedStatus<<Q as QueryEndpoint>::Data, <Q as QueryEndpoint>::Error>;
type Selector<Q> = QuerySelector<<Q as QueryEndpoint>::Data, <Q as QueryEndpoint>::Error>;

/// Per-pass options of a [`Query`].
pub struct QueryOptions<T, E> {
    pub subscription: QuerySubscriptionOptions,
    /// Replaces the default selection.
    pub selector: Option<QuerySelector<T, E>>,
}

impl<T, E> QueryOptions<T, E> {
    pub fn skip(mut self, skip: bool) -> Self {
        self.subscription.skip = skip;
        self
    }

    pub fn selector(mut self, selector: QuerySelector<T, E>) -> Self {
        self.selector = Some(selector);
        self
    }
}

impl<T, E> Default for QueryOptions<T, E> {
    fn default() -> Self {
        Self {
            subscription: QuerySubscriptionOptions::default(),
            selector: None,
        }
    }
}

impl<T, E> From<QuerySubscriptionOptions> for QueryOptions<T, E> {
    fn from(subscription: QuerySubscriptionOptions) -> Self {
        Self {
            subscription,
            selector: None,
        }
    }
}

impl<T, E> Clone for QueryOptions<T, E> {
    fn clone(&self) -> Self {
        Self {
            subscription: self.subscription.clone(),
            selector: self.selector.clone(),
        }
    }
}

impl<T, E> fmt::Debug for QueryOptions<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("subscription", &self.subscription)
            .field("selector", &self.selector)
            .finish()
    }
}

/// Output of one [`Query`] pass.
pub struct QueryResult<A, T, E> {
    pub status: Stable<DerivedStatus<T, E>>,
    pub refetch: Refetch<A>,
}

impl<A, T, E> Clone for QueryResult<A, T, E> {
    fn clone(&self) -> Self {
        Self {
            status: self.status.clone(),
            refetch: self.refetch.clone(),
        }
    }
}

impl<A, T: fmt::Debug, E: fmt::Debug> fmt::Debug for QueryResult<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("status", &self.status)
            .field("refetch", &self.refetch)
            .finish()
    }
}

/// Subscription plus status for one consumer.
pub struct Query<Q: QueryEndpoint> {
    arg: StableValue<Q::Arg>,
    subscription: QuerySubscription<Q>,
    state: QueryState<Q>,
}

impl<Q: QueryEndpoint> Query<Q> {
    pub fn new(endpoint: Arc<Q>, runtime: &Runtime) -> Self {
        Self {
            arg: StableValue::new(),
            subscription: QuerySubscription::new(Arc::clone(&endpoint), runtime),
            state: QueryState::new(endpoint, runtime),
        }
    }

    /// Evaluate for one pass.
    pub fn evaluate(
        &mut self,
        pass: &mut Pass<'_>,
        arg: Q::Arg,
        options: &QueryOptions<Q::Data, Q::Error>,
    ) -> QueryResult<Q::Arg, Q::Data, Q::Error> {
        let arg = self.arg.stabilize(arg);
        let refetch = self
            .subscription
            .evaluate_stable(pass, arg.clone(), &options.subscription);

        let skip = options.subscription.skip;
        let selector: Selector<Q> = match &options.selector {
            Some(selector) => selector.clone(),
            None if skip => QuerySelector::Default,
            None => QuerySelector::NoPending,
        };
        let status = self
            .state
            .evaluate_stable(pass, Some(arg), &QueryStateOptions { skip, selector });

        QueryResult { status, refetch }
    }

    pub fn subscription(&self) -> &QuerySubscription<Q> {
        &self.subscription
    }

    pub fn state(&self) -> &QueryState<Q> {
        &self.state
    }
}

impl<Q: QueryEndpoint> fmt::Debug for Query<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("subscription", &self.subscription)
            .field("state", &self.state)
            .finish()
    }
}

/// Per-pass options of a [`LazyQuery`].
pub struct LazyQueryOptions<T, E> {
    pub subscription: SubscriptionOptions,
    pub selector: Option<QuerySelector<T, E>>,
}

impl<T, E> Default for LazyQueryOptions<T, E> {
    fn default() -> Self {
        Self {
            subscription: SubscriptionOptions::default(),
            selector: None,
        }
    }
}

impl<T, E> Clone for LazyQueryOptions<T, E> {
    fn clone(&self) -> Self {
        Self {
            subscription: self.subscription.clone(),
            selector: self.selector.clone(),
        }
    }
}

impl<T, E> fmt::Debug for LazyQueryOptions<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyQueryOptions")
            .field("subscription", &self.subscription)
            .field("selector", &self.selector)
            .finish()
    }
}

/// Output of one [`LazyQuery`] pass.
pub struct LazyQueryResult<Q: QueryEndpoint> {
    pub trigger: LazyTrigger<Q>,
    pub status: Stable<Status<Q>>,
    pub last_arg: LazyArg<Q::Arg>,
}

impl<Q: QueryEndpoint> Clone for LazyQueryResult<Q> {
    fn clone(&self) -> Self {
        Self {
            trigger: self.trigger.clone(),
            status: self.status.clone(),
            last_arg: self.last_arg.clone(),
        }
    }
}

impl<Q> fmt::Debug for LazyQueryResult<Q>
where
    Q: QueryEndpoint,
    Q::Data: fmt::Debug,
    Q::Error: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyQueryResult")
            .field("trigger", &self.trigger)
            .field("status", &self.status)
            .field("last_arg", &self.last_arg)
            .finish()
    }
}

/// Lazy subscription plus status for one consumer.
pub struct LazyQuery<Q: QueryEndpoint> {
    subscription: LazyQuerySubscription<Q>,
    state: QueryState<Q>,
}

impl<Q: QueryEndpoint> LazyQuery<Q> {
    pub fn new(endpoint: Arc<Q>, runtime: &Runtime) -> Self {
        Self {
            subscription: LazyQuerySubscription::new(Arc::clone(&endpoint), runtime),
            state: QueryState::new(endpoint, runtime),
        }
    }

    /// Evaluate for one pass.
    pub fn evaluate(
        &mut self,
        pass: &mut Pass<'_>,
        options: &LazyQueryOptions<Q::Data, Q::Error>,
    ) -> LazyQueryResult<Q> {
        let (trigger, last_arg) = self.subscription.evaluate(pass, &options.subscription);

        let state_options = QueryStateOptions {
            skip: last_arg.is_uninitialized(),
            selector: options.selector.clone().unwrap_or_default(),
        };
        let status = self
            .state
            .evaluate_stable(pass, last_arg.stable().cloned(), &state_options);

        LazyQueryResult {
            trigger,
            status,
            last_arg,
        }
    }

    pub fn subscription(&self) -> &LazyQuerySubscription<Q> {
        &self.subscription
    }

    pub fn state(&self) -> &QueryState<Q> {
        &self.state
    }
}

impl<Q: QueryEndpoint> fmt::Debug for LazyQuery<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyQuery")
            .field("subscription", &self.subscription)
            .field("state", &self.state)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
