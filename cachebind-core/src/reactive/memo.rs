//! Selector Memo
//!
//! A [`SelectorMemo`] caches the result of a selection keyed by the identity
//! of its inputs. Status derivation runs on every pass, but its inputs (the
//! cache entry snapshot, the previous result, the stabilized argument and
//! the selection function) rarely all change; when none did, the cached
//! output is returned without recomputing.
//!
//! # How It Works
//!
//! 1. The caller builds a key from its inputs. Inputs are [`Stable`] values
//!    or `Arc` snapshots so key comparison is an identity check.
//!
//! 2. If the key equals the cached key and the memo is clean, the cached
//!    value is returned.
//!
//! 3. Otherwise the computation runs and its result replaces the cache.
//!
//! A single slot is kept: changing any input discards the old result, which
//! is exactly the "recreate the selector when its dependencies change" rule.
//!
//! [`Stable`]: super::Stable

use std::fmt::{self, Debug};

use tracing::trace;

/// Dirty state for a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date for its key.
    Clean,

    /// The memo must recompute on next access.
    Dirty,
}

/// Single-slot memo keyed by input identity.
pub struct SelectorMemo<K, V> {
    cached: Option<(K, V)>,
    state: MemoState,
    computations: u64,
}

impl<K, V> SelectorMemo<K, V>
where
    K: PartialEq,
    V: Clone,
{
    /// Create an empty memo.
    pub fn new() -> Self {
        Self {
            cached: None,
            state: MemoState::Dirty,
            computations: 0,
        }
    }

    /// Return the cached value for `key`, computing it if needed.
    pub fn get_or_compute<F>(&mut self, key: K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        if self.state == MemoState::Clean {
            if let Some((cached_key, value)) = &self.cached {
                if *cached_key == key {
                    trace!("selector memo hit");
                    return value.clone();
                }
            }
        }

        let value = compute();
        self.computations += 1;
        self.cached = Some((key, value.clone()));
        self.state = MemoState::Clean;
        value
    }

    /// Force the next access to recompute.
    pub fn mark_dirty(&mut self) {
        self.state = MemoState::Dirty;
    }

    /// Get the current dirty state.
    pub fn state(&self) -> MemoState {
        self.state
    }

    /// Number of times the computation has run.
    pub fn computations(&self) -> u64 {
        self.computations
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.cached.is_some()
    }
}

impl<K, V> Default for SelectorMemo<K, V>
where
    K: PartialEq,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Debug for SelectorMemo<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectorMemo")
            .field("state", &self.state)
            .field("has_value", &self.cached.is_some())
            .field("computations", &self.computations)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
