//! Prefetch Dispatcher
//!
//! Asks the store to fetch an entry ahead of need. Nothing subscribes and no
//! handle is kept; the only state is the stabilized default options.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::reactive::{EvalContext, Pass, Stable, StableValue};
use crate::store::{PrefetchOptions, QueryEndpoint};

/// Prefetcher for one query endpoint.
pub struct Prefetch<Q: QueryEndpoint> {
    endpoint: Arc<Q>,
    tracker: StableValue<PrefetchOptions>,
    defaults: Stable<PrefetchOptions>,
}

impl<Q: QueryEndpoint> Prefetch<Q> {
    pub fn new(endpoint: Arc<Q>, defaults: PrefetchOptions) -> Self {
        let mut tracker = StableValue::new();
        let defaults = tracker.stabilize(defaults);
        Self {
            endpoint,
            tracker,
            defaults,
        }
    }

    /// Adopt the defaults passed on this pass. Equal defaults keep their
    /// identity.
    pub fn evaluate(&mut self, _pass: &mut Pass<'_>, defaults: PrefetchOptions) -> Stable<PrefetchOptions> {
        self.defaults = self.tracker.stabilize(defaults);
        self.defaults.clone()
    }

    /// Prefetch `arg`. Call-site options override the defaults field by
    /// field.
    pub fn prefetch(&self, arg: &Q::Arg, options: &PrefetchOptions) {
        if EvalContext::is_active() {
            warn!(endpoint = self.endpoint.name(), "prefetch during an evaluation pass");
        }
        let merged = self.defaults.merge(options);
        debug!(endpoint = self.endpoint.name(), ?arg, options = ?merged, "prefetch");
        self.endpoint.prefetch(arg, &merged);
    }

    pub fn defaults(&self) -> &Stable<PrefetchOptions> {
        &self.defaults
    }
}

impl<Q: QueryEndpoint> fmt::Debug for Prefetch<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prefetch")
            .field("endpoint", &self.endpoint.name())
            .field("defaults", &self.defaults)
            .finish()
    }
}
