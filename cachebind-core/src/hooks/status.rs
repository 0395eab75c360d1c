//! Status Derivation
//!
//! Pure functions mapping a raw [`CacheEntry`] (plus the previously derived
//! result) to the [`DerivedStatus`] view consumers render from.
//!
//! # Flags
//!
//! - `is_fetching`: a request is in flight.
//! - `is_loading`: in flight with nothing to show yet (first load).
//! - `is_success`: fulfilled, or refetching while stale data is available.
//! - `is_error`: the last request was rejected.
//! - `is_uninitialized`: nothing was requested.
//!
//! When `is_fetching` is false exactly one of the other four is set. While
//! fetching, `is_loading` and `is_success` are mutually exclusive.
//!
//! # Carry-Forward
//!
//! Query data survives argument changes and refetches: when the entry is not
//! fulfilled, the data of the previous result is shown if there was any. The
//! previous result is an explicit parameter rather than hidden state.

use std::fmt;
use std::sync::Arc;

use crate::store::{CacheEntry, QueryStatus, RequestId};

/// The status view returned to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedStatus<T, E> {
    pub status: QueryStatus,
    pub data: Option<T>,
    pub error: Option<E>,
    pub fulfilled_timestamp: Option<u64>,
    pub request_id: Option<RequestId>,
    pub is_uninitialized: bool,
    pub is_loading: bool,
    pub is_fetching: bool,
    pub is_success: bool,
    pub is_error: bool,
}

impl<T, E> DerivedStatus<T, E> {
    /// View of an entry nothing was requested for.
    pub fn uninitialized() -> Self {
        Self {
            status: QueryStatus::Uninitialized,
            data: None,
            error: None,
            fulfilled_timestamp: None,
            request_id: None,
            is_uninitialized: true,
            is_loading: false,
            is_fetching: false,
            is_success: false,
            is_error: false,
        }
    }
}

/// Default query derivation.
pub fn derive_query_status<T, E>(
    entry: &CacheEntry<T, E>,
    last: Option<&DerivedStatus<T, E>>,
) -> DerivedStatus<T, E>
where
    T: Clone,
    E: Clone,
{
    let data = if entry.is_fulfilled() {
        entry.data.clone()
    } else {
        last.and_then(|last| last.data.clone()).or_else(|| entry.data.clone())
    };

    let is_fetching = entry.is_pending();
    let is_loading = is_fetching && data.is_none();
    let is_success = entry.is_fulfilled() || (is_fetching && data.is_some());

    DerivedStatus {
        status: entry.status,
        data,
        error: entry.error.clone(),
        fulfilled_timestamp: entry.fulfilled_timestamp,
        request_id: entry.request_id,
        is_uninitialized: entry.is_uninitialized(),
        is_loading,
        is_fetching,
        is_success,
        is_error: entry.is_rejected(),
    }
}

/// Query derivation that never reports "not started".
///
/// A subscribing consumer's fetch is queued as an effect, so its first pass
/// reads an uninitialized entry even though the fetch is certain. This
/// variant reports that pass as a first load.
pub fn derive_no_pending_status<T, E>(
    entry: &CacheEntry<T, E>,
    last: Option<&DerivedStatus<T, E>>,
) -> DerivedStatus<T, E>
where
    T: Clone,
    E: Clone,
{
    let mut derived = derive_query_status(entry, last);
    if derived.is_uninitialized {
        derived.is_uninitialized = false;
        derived.is_fetching = true;
        derived.is_loading = true;
        derived.status = QueryStatus::Pending;
    }
    derived
}

/// Mutation derivation: the entry's own flags, no carry-forward.
pub fn derive_mutation_status<T, E>(entry: &CacheEntry<T, E>) -> DerivedStatus<T, E>
where
    T: Clone,
    E: Clone,
{
    DerivedStatus {
        status: entry.status,
        data: entry.data.clone(),
        error: entry.error.clone(),
        fulfilled_timestamp: entry.fulfilled_timestamp,
        request_id: entry.request_id,
        is_uninitialized: entry.is_uninitialized(),
        is_loading: entry.is_pending(),
        is_fetching: entry.is_pending(),
        is_success: entry.is_fulfilled(),
        is_error: entry.is_rejected(),
    }
}

/// Signature of a custom selection.
pub type SelectFn<T, E> =
    dyn Fn(&CacheEntry<T, E>, Option<&DerivedStatus<T, E>>) -> DerivedStatus<T, E> + Send + Sync;

/// Selection applied by a query state controller.
pub enum QuerySelector<T, E> {
    /// [`derive_query_status`].
    Default,
    /// [`derive_no_pending_status`].
    NoPending,
    /// A caller-supplied selection. Identity is the `Arc` pointer, so keep
    /// the same `Arc` across passes to keep memoization effective.
    Custom(Arc<SelectFn<T, E>>),
}

impl<T, E> QuerySelector<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Wrap a closure as a custom selector.
    pub fn custom<F>(select: F) -> Self
    where
        F: Fn(&CacheEntry<T, E>, Option<&DerivedStatus<T, E>>) -> DerivedStatus<T, E>
            + Send
            + Sync
            + 'static,
    {
        QuerySelector::Custom(Arc::new(select))
    }

    /// Apply the selection.
    pub fn select(
        &self,
        entry: &CacheEntry<T, E>,
        last: Option<&DerivedStatus<T, E>>,
    ) -> DerivedStatus<T, E> {
        match self {
            QuerySelector::Default => derive_query_status(entry, last),
            QuerySelector::NoPending => derive_no_pending_status(entry, last),
            QuerySelector::Custom(select) => select(entry, last),
        }
    }
}

impl<T, E> Clone for QuerySelector<T, E> {
    fn clone(&self) -> Self {
        match self {
            QuerySelector::Default => QuerySelector::Default,
            QuerySelector::NoPending => QuerySelector::NoPending,
            QuerySelector::Custom(select) => QuerySelector::Custom(Arc::clone(select)),
        }
    }
}

impl<T, E> PartialEq for QuerySelector<T, E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (QuerySelector::Default, QuerySelector::Default) => true,
            (QuerySelector::NoPending, QuerySelector::NoPending) => true,
            (QuerySelector::Custom(a), QuerySelector::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<T, E> Default for QuerySelector<T, E> {
    fn default() -> Self {
        QuerySelector::Default
    }
}

impl<T, E> fmt::Debug for QuerySelector<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuerySelector::Default => f.write_str("Default"),
            QuerySelector::NoPending => f.write_str("NoPending"),
            QuerySelector::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// The default mutation derivation as handed to a custom selection.
pub type MutationDefault<T, E> = fn(&CacheEntry<T, E>) -> DerivedStatus<T, E>;

/// Signature of a custom mutation selection.
pub type MutationSelectFn<T, E> =
    dyn Fn(&CacheEntry<T, E>, MutationDefault<T, E>) -> DerivedStatus<T, E> + Send + Sync;

/// Selection applied by a mutation controller.
pub enum MutationSelector<T, E> {
    /// [`derive_mutation_status`].
    Default,
    /// A caller-supplied selection, given the entry and the default
    /// derivation to build on. Identity is the `Arc` pointer.
    Custom(Arc<MutationSelectFn<T, E>>),
}

impl<T, E> MutationSelector<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Wrap a closure as a custom selector.
    pub fn custom<F>(select: F) -> Self
    where
        F: Fn(&CacheEntry<T, E>, MutationDefault<T, E>) -> DerivedStatus<T, E>
            + Send
            + Sync
            + 'static,
    {
        MutationSelector::Custom(Arc::new(select))
    }

    /// Apply the selection.
    pub fn select(&self, entry: &CacheEntry<T, E>) -> DerivedStatus<T, E> {
        match self {
            MutationSelector::Default => derive_mutation_status(entry),
            MutationSelector::Custom(select) => select(entry, derive_mutation_status::<T, E>),
        }
    }
}

impl<T, E> Clone for MutationSelector<T, E> {
    fn clone(&self) -> Self {
        match self {
            MutationSelector::Default => MutationSelector::Default,
            MutationSelector::Custom(select) => MutationSelector::Custom(Arc::clone(select)),
        }
    }
}

impl<T, E> PartialEq for MutationSelector<T, E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MutationSelector::Default, MutationSelector::Default) => true,
            (MutationSelector::Custom(a), MutationSelector::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<T, E> Default for MutationSelector<T, E> {
    fn default() -> Self {
        MutationSelector::Default
    }
}

impl<T, E> fmt::Debug for MutationSelector<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationSelector::Default => f.write_str("Default"),
            MutationSelector::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
