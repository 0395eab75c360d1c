//! Evaluation Runtime
//!
//! The runtime is the central coordinator between consumer evaluation and
//! the side effects that evaluation asks for. It owns the deferred effect
//! queue and the update notification fan-out.
//!
//! # How It Works
//!
//! 1. A host runs one consumer evaluation with [`Runtime::pass`]. Controllers
//!    read state and queue effects on the [`Pass`]; nothing touches the cache
//!    store's write side yet.
//!
//! 2. When the pass returns, its effects are appended to the runtime's FIFO
//!    queue in the order they were queued.
//!
//! 3. The host calls [`Runtime::flush`] to run every queued effect. Effects
//!    from a later pass always run after those of an earlier pass.
//!
//! 4. Writes that should cause re-evaluation call [`Runtime::notify`].
//!    Inside [`Runtime::batch`] those notifications are coalesced into one
//!    delivery when the outermost batch ends.
//!
//! # Thread Safety
//!
//! The runtime is `Send + Sync` and cheap to clone, but the model it
//! implements is single-threaded and cooperative: one pass or one flush at a
//! time. The pass marker lives in a thread-local [`EvalContext`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::trace;

use super::context::EvalContext;
use crate::error::{BindError, Result};

/// A deferred unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Identifier returned by [`Runtime::on_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Handle to the shared runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    /// Effects waiting for the next flush.
    queue: Mutex<VecDeque<Job>>,

    /// Set while a flush is draining the queue.
    flushing: AtomicBool,

    /// Nesting depth of [`Runtime::batch`].
    batch_depth: AtomicUsize,

    /// A notification arrived during a batch.
    pending_notify: AtomicBool,

    /// Update listeners, in registration order.
    listeners: RwLock<Vec<(ListenerId, Listener)>>,

    /// Number of notifications delivered to listeners.
    notifications: AtomicU64,

    next_pass: AtomicU64,
    next_listener: AtomicU64,
}

impl Runtime {
    /// Create a runtime with an empty queue and no listeners.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                queue: Mutex::new(VecDeque::new()),
                flushing: AtomicBool::new(false),
                batch_depth: AtomicUsize::new(0),
                pending_notify: AtomicBool::new(false),
                listeners: RwLock::new(Vec::new()),
                notifications: AtomicU64::new(0),
                next_pass: AtomicU64::new(1),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    /// Run one evaluation pass.
    ///
    /// Effects queued on the [`Pass`] are appended to the runtime queue when
    /// `evaluate` returns. They do not run until [`Runtime::flush`].
    pub fn pass<R>(&self, evaluate: impl FnOnce(&mut Pass<'_>) -> R) -> R {
        let id = self.inner.next_pass.fetch_add(1, Ordering::Relaxed);
        let mut pass = Pass {
            runtime: self,
            id,
            jobs: SmallVec::new(),
            _ctx: EvalContext::enter(id),
        };

        let output = evaluate(&mut pass);

        let jobs = std::mem::take(&mut pass.jobs);
        drop(pass);

        trace!(pass = id, queued = jobs.len(), "evaluation pass complete");
        self.inner.queue.lock().extend(jobs);
        output
    }

    /// Queue a job outside of any pass.
    ///
    /// Used for teardown when a controller is dropped.
    pub fn defer(&self, job: Job) {
        self.inner.queue.lock().push_back(job);
    }

    /// Run every queued effect in FIFO order.
    ///
    /// Jobs queued while flushing (teardown from a dropped controller, say)
    /// run in the same flush. Returns the number of jobs run.
    pub fn flush(&self) -> Result<usize> {
        if EvalContext::is_active() {
            return Err(BindError::FlushDuringPass);
        }
        if self.inner.flushing.swap(true, Ordering::SeqCst) {
            return Err(BindError::ReentrantFlush);
        }
        let _flushing = FlushGuard(&self.inner.flushing);

        let mut ran = 0;
        loop {
            // The queue lock is released before the job runs.
            let next = self.inner.queue.lock().pop_front();
            match next {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => break,
            }
        }

        if ran > 0 {
            trace!(ran, "flushed effects");
        }
        Ok(ran)
    }

    /// Number of jobs waiting for the next flush.
    pub fn pending_effects(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Run `f` with notifications coalesced.
    ///
    /// Any number of [`Runtime::notify`] calls inside `f` (including nested
    /// batches) produce at most one delivery when the outermost batch ends.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.batch_depth.fetch_add(1, Ordering::SeqCst);
        let guard = BatchGuard { runtime: self };
        let output = f();
        drop(guard);
        output
    }

    /// Whether a batch is open.
    pub fn is_batching(&self) -> bool {
        self.inner.batch_depth.load(Ordering::SeqCst) > 0
    }

    /// Signal that state consumers read has changed.
    pub fn notify(&self) {
        if self.is_batching() {
            self.inner.pending_notify.store(true, Ordering::SeqCst);
        } else {
            self.deliver();
        }
    }

    /// Register a listener called once per delivered notification.
    pub fn on_update<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Unknown IDs are ignored.
    pub fn remove_listener(&self, id: ListenerId) {
        self.inner.listeners.write().retain(|(listener_id, _)| *listener_id != id);
    }

    /// Total notifications delivered so far.
    pub fn notification_count(&self) -> u64 {
        self.inner.notifications.load(Ordering::SeqCst)
    }

    fn deliver(&self) {
        self.inner.notifications.fetch_add(1, Ordering::SeqCst);

        // Snapshot so listeners may register or remove listeners.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener();
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("pending_effects", &self.pending_effects())
            .field("batching", &self.is_batching())
            .field("notifications", &self.notification_count())
            .finish()
    }
}

struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct BatchGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let inner = &self.runtime.inner;
        let outermost = inner.batch_depth.fetch_sub(1, Ordering::SeqCst) == 1;
        if outermost && inner.pending_notify.swap(false, Ordering::SeqCst) && !std::thread::panicking() {
            self.runtime.deliver();
        }
    }
}

/// One evaluation pass of one consumer.
///
/// Controllers queue effects here; they run only after the pass completes.
pub struct Pass<'rt> {
    runtime: &'rt Runtime,
    id: u64,
    jobs: SmallVec<[Job; 4]>,
    _ctx: EvalContext,
}

impl<'rt> Pass<'rt> {
    /// The pass identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The runtime running this pass.
    pub fn runtime(&self) -> &'rt Runtime {
        self.runtime
    }

    /// Queue a job to run at the next flush.
    pub fn queue(&mut self, job: Job) {
        self.jobs.push(job);
    }

    /// Number of jobs queued so far in this pass.
    pub fn queued(&self) -> usize {
        self.jobs.len()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
