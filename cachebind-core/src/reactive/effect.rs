//! Effect Implementation
//!
//! An Effect is a side-effecting computation gated by a dependency value.
//! Controllers own one `Effect` per logical side effect and schedule it on
//! every pass; it only runs when the dependencies differ from the last
//! scheduled ones.
//!
//! # How Effects Work
//!
//! 1. During a pass the controller calls [`Effect::schedule`] with the
//!    current dependencies.
//!
//! 2. If they equal the previous dependencies nothing is queued. Otherwise a
//!    job is queued on the pass.
//!
//! 3. When the runtime flushes, the job first runs the cleanup left by the
//!    previous run, then the effect body, and stores the new cleanup.
//!
//! 4. [`Effect::dispose`] queues the final cleanup and stops future runs.
//!    [`Effect::reset`] queues the cleanup but re-arms the effect so the next
//!    pass runs it again regardless of dependencies.
//!
//! # Dependencies
//!
//! Dependencies are compared with `PartialEq`. Passing [`Stable`] values
//! makes the comparison an identity check.
//!
//! [`Stable`]: super::Stable

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::runtime::{Pass, Runtime};

/// Cleanup returned by an effect body.
pub type Cleanup = Box<dyn FnOnce() + Send + 'static>;

/// Counter for generating unique effect IDs.
static EFFECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique effect ID.
fn next_effect_id() -> u64 {
    EFFECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

struct EffectState<D> {
    /// Dependencies of the last scheduled run.
    deps: Option<D>,
    /// Cleanup left by the last completed run.
    cleanup: Option<Cleanup>,
}

/// A deferred, dependency-gated side effect.
///
/// # Example
///
/// ```rust,ignore
/// let effect = Effect::new();
///
/// runtime.pass(|pass| {
///     effect.schedule(pass, stable_arg.clone(), move || {
///         subscribe(&stable_arg);
///         None
///     });
/// });
///
/// runtime.flush()?;
/// ```
pub struct Effect<D> {
    /// Unique identifier for this effect.
    id: u64,

    state: Arc<Mutex<EffectState<D>>>,

    /// Whether the effect has been disposed.
    disposed: Arc<AtomicBool>,

    /// Number of times the effect body has run.
    run_count: Arc<AtomicUsize>,
}

impl<D> Effect<D>
where
    D: PartialEq + Send + 'static,
{
    /// Create an effect that has never been scheduled.
    pub fn new() -> Self {
        Self {
            id: next_effect_id(),
            state: Arc::new(Mutex::new(EffectState {
                deps: None,
                cleanup: None,
            })),
            disposed: Arc::new(AtomicBool::new(false)),
            run_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue `run` on the pass if `deps` changed since the last schedule.
    ///
    /// Returns whether a job was queued.
    pub fn schedule<F>(&self, pass: &mut Pass<'_>, deps: D, run: F) -> bool
    where
        F: FnOnce() -> Option<Cleanup> + Send + 'static,
    {
        if self.is_disposed() {
            return false;
        }

        {
            let mut state = self.state.lock();
            if state.deps.as_ref() == Some(&deps) {
                return false;
            }
            state.deps = Some(deps);
        }

        let state = Arc::clone(&self.state);
        let disposed = Arc::clone(&self.disposed);
        let run_count = Arc::clone(&self.run_count);

        pass.queue(Box::new(move || {
            if disposed.load(Ordering::SeqCst) {
                return;
            }

            let previous = state.lock().cleanup.take();
            if let Some(cleanup) = previous {
                cleanup();
            }

            let cleanup = run();
            state.lock().cleanup = cleanup;
            run_count.fetch_add(1, Ordering::SeqCst);
        }));
        true
    }

    /// Queue the final cleanup and stop the effect from running again.
    ///
    /// Disposing twice is a no-op.
    pub fn dispose(&self, runtime: &Runtime) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        runtime.defer(self.cleanup_job());
    }

    /// Queue the cleanup and forget the dependencies so the next schedule
    /// runs the effect again.
    pub fn reset(&self, runtime: &Runtime) {
        if self.is_disposed() {
            return;
        }
        self.state.lock().deps = None;
        runtime.defer(self.cleanup_job());
    }

    fn cleanup_job(&self) -> Box<dyn FnOnce() + Send + 'static> {
        let state = Arc::clone(&self.state);
        Box::new(move || {
            let cleanup = state.lock().cleanup.take();
            if let Some(cleanup) = cleanup {
                cleanup();
            }
        })
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of times the effect body has run.
    pub fn run_count(&self) -> usize {
        self.run_count.load(Ordering::SeqCst)
    }
}

impl<D> Default for Effect<D>
where
    D: PartialEq + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<D> fmt::Debug for Effect<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("run_count", &self.run_count.load(Ordering::SeqCst))
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
