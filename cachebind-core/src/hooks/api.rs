//! Hook Factories
//!
//! [`QueryHooks`] and [`MutationHooks`] bind a typed endpoint and a runtime
//! once, then build controllers for as many consumers as needed. The
//! endpoint's associated types flow into every controller, so a consumer
//! cannot pass the wrong argument type or read the wrong data type.

use std::fmt;
use std::sync::Arc;

use super::lazy::LazyQuerySubscription;
use super::mutation::Mutation;
use super::prefetch::Prefetch;
use super::query::{LazyQuery, Query, QueryOptions};
use super::query_state::QueryState;
use super::subscription::{QuerySubscription, QuerySubscriptionOptions};
use crate::config::HookConfig;
use crate::reactive::Runtime;
use crate::store::{MutationEndpoint, QueryEndpoint};

/// Controller factory for one query endpoint.
pub struct QueryHooks<Q: QueryEndpoint> {
    endpoint: Arc<Q>,
    runtime: Runtime,
    config: Arc<HookConfig>,
}

impl<Q: QueryEndpoint> QueryHooks<Q> {
    pub fn new(endpoint: Arc<Q>, runtime: &Runtime) -> Self {
        Self {
            endpoint,
            runtime: runtime.clone(),
            config: Arc::new(HookConfig::default()),
        }
    }

    /// Replace the configured defaults.
    pub fn with_config(mut self, config: HookConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn endpoint(&self) -> &Arc<Q> {
        &self.endpoint
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn config(&self) -> &HookConfig {
        &self.config
    }

    /// Subscription options seeded from the configuration.
    pub fn subscription_options(&self) -> QuerySubscriptionOptions {
        QuerySubscriptionOptions::from_config(&self.config)
    }

    /// Query options seeded from the configuration.
    pub fn query_options(&self) -> QueryOptions<Q::Data, Q::Error> {
        QueryOptions::from(self.subscription_options())
    }

    pub fn query_subscription(&self) -> QuerySubscription<Q> {
        QuerySubscription::new(Arc::clone(&self.endpoint), &self.runtime)
    }

    pub fn query_state(&self) -> QueryState<Q> {
        QueryState::new(Arc::clone(&self.endpoint), &self.runtime)
    }

    pub fn query(&self) -> Query<Q> {
        Query::new(Arc::clone(&self.endpoint), &self.runtime)
    }

    pub fn lazy_query_subscription(&self) -> LazyQuerySubscription<Q> {
        LazyQuerySubscription::new(Arc::clone(&self.endpoint), &self.runtime)
    }

    pub fn lazy_query(&self) -> LazyQuery<Q> {
        LazyQuery::new(Arc::clone(&self.endpoint), &self.runtime)
    }

    /// A prefetcher using the configured prefetch defaults.
    pub fn prefetch(&self) -> Prefetch<Q> {
        Prefetch::new(Arc::clone(&self.endpoint), self.config.prefetch.clone())
    }
}

impl<Q: QueryEndpoint> Clone for QueryHooks<Q> {
    fn clone(&self) -> Self {
        Self {
            endpoint: Arc::clone(&self.endpoint),
            runtime: self.runtime.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<Q: QueryEndpoint> fmt::Debug for QueryHooks<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryHooks")
            .field("endpoint", &self.endpoint.name())
            .field("config", &self.config)
            .finish()
    }
}

/// Controller factory for one mutation endpoint.
pub struct MutationHooks<M: MutationEndpoint> {
    endpoint: Arc<M>,
    runtime: Runtime,
}

impl<M: MutationEndpoint> MutationHooks<M> {
    pub fn new(endpoint: Arc<M>, runtime: &Runtime) -> Self {
        Self {
            endpoint,
            runtime: runtime.clone(),
        }
    }

    pub fn endpoint(&self) -> &Arc<M> {
        &self.endpoint
    }

    pub fn mutation(&self) -> Mutation<M> {
        Mutation::new(Arc::clone(&self.endpoint), &self.runtime)
    }
}

impl<M: MutationEndpoint> Clone for MutationHooks<M> {
    fn clone(&self) -> Self {
        Self {
            endpoint: Arc::clone(&self.endpoint),
            runtime: self.runtime.clone(),
        }
    }
}

impl<M: MutationEndpoint> fmt::Debug for MutationHooks<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationHooks")
            .field("endpoint", &self.endpoint.name())
            .finish()
    }
}
