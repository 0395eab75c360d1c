//! Consumer Controllers
//!
//! Controllers bind one consumer to cache entries of one endpoint. Each is
//! evaluated once per consumer pass and keeps its state between passes.
//!
//! # Controllers
//!
//! - [`QuerySubscription`]: keeps one subscription open for the current
//!   argument.
//! - [`QueryState`]: derives the status view of an entry.
//! - [`LazyQuerySubscription`]: subscribes only when triggered.
//! - [`Mutation`]: starts mutations and follows the latest one.
//! - [`Prefetch`]: fire-and-forget fetches.
//!
//! [`Query`] and [`LazyQuery`] compose subscription and state. [`QueryHooks`]
//! and [`MutationHooks`] build controllers for one typed endpoint.
//!
//! # Rules
//!
//! Passes only read. Everything that touches the cache store happens in
//! effects (during [`Runtime::flush`]) or in triggers called from outside a
//! pass. A trigger called during a pass is deferred to the next flush,
//! except [`Mutation::trigger`], which must hand back its request handle and
//! so writes immediately.
//!
//! [`Runtime::flush`]: crate::reactive::Runtime::flush

mod api;
mod lazy;
mod mutation;
mod prefetch;
mod query;
mod query_state;
pub mod status;
mod subscription;

pub use api::{MutationHooks, QueryHooks};
pub use lazy::{LazyArg, LazyQuerySubscription, LazyTrigger};
pub use mutation::{Mutation, MutationOptions};
pub use prefetch::Prefetch;
pub use query::{LazyQuery, LazyQueryOptions, LazyQueryResult, Query, QueryOptions, QueryResult};
pub use query_state::{QueryState, QueryStateOptions};
pub use status::{DerivedStatus, MutationSelector, QuerySelector};
pub use subscription::{QuerySubscription, QuerySubscriptionOptions, Refetch};

use tracing::warn;

use crate::reactive::{EvalContext, Runtime};

/// Run `job` now, or at the next flush when called from inside a pass.
pub(crate) fn outside_pass<F>(runtime: &Runtime, action: &'static str, job: F)
where
    F: FnOnce() + Send + 'static,
{
    if EvalContext::is_active() {
        warn!(
            action,
            pass = ?EvalContext::current_pass(),
            "store write requested during an evaluation pass, deferring to flush"
        );
        runtime.defer(Box::new(job));
    } else {
        job();
    }
}
