//! State Cells
//!
//! A [`StateCell`] holds consumer-owned state that must survive between
//! passes and cause a re-evaluation when it changes: the last argument of a
//! lazy query, the request id of the current mutation.
//!
//! # How State Cells Work
//!
//! 1. Controllers read the cell during a pass with [`StateCell::get`].
//!
//! 2. Triggers write it with [`StateCell::set`] from outside the pass.
//!
//! 3. Every write notifies the runtime. Writes made inside
//!    [`Runtime::batch`] are delivered as a single notification together
//!    with the store writes of the same batch.

use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::RwLock;

use super::runtime::Runtime;

/// Consumer state whose writes notify the runtime.
///
/// Clones share the same value.
pub struct StateCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The current value.
    value: Arc<RwLock<T>>,

    /// Runtime notified on writes.
    runtime: Runtime,
}

impl<T> StateCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new cell with the given initial value.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(value)),
            runtime: runtime.clone(),
        }
    }

    /// Get a clone of the current value.
    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Replace the value and notify the runtime.
    pub fn set(&self, value: T) {
        *self.value.write() = value;
        self.runtime.notify();
    }
}

impl<T> Clone for StateCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T> Debug for StateCell<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("value", &*self.value.read())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn cell_get_and_set() {
        let runtime = Runtime::new();
        let cell = StateCell::new(&runtime, 0);
        assert_eq!(cell.get(), 0);

        cell.set(42);
        assert_eq!(cell.get(), 42);
    }

    #[test]
    fn writes_notify_runtime() {
        let runtime = Runtime::new();
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        runtime.on_update(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        let cell = StateCell::new(&runtime, "a");
        cell.set("b");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        runtime.batch(|| {
            cell.set("c");
            cell.set("d");
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cell_clone_shares_state() {
        let runtime = Runtime::new();
        let cell1 = StateCell::new(&runtime, 0);
        let cell2 = cell1.clone();

        cell1.set(42);
        assert_eq!(cell2.get(), 42);
    }
}
