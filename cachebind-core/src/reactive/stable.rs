//! Referentially Stable Values
//!
//! Consumers rebuild their argument and option values on every pass. Most of
//! the time the new value is structurally equal to the last one, and treating
//! it as "changed" would close and reopen subscriptions for nothing.
//!
//! [`StableValue`] remembers the last value it handed out. When the next value
//! compares equal it returns the previous [`Stable`] instead, so downstream
//! code can compare identities rather than contents.
//!
//! # Identity
//!
//! A [`Stable`] is an `Arc` whose `PartialEq` is pointer identity. Two
//! `Stable`s are equal exactly when they came from the same adoption, which
//! makes them usable as effect dependencies and memo keys.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A shared value compared by identity.
pub struct Stable<T: ?Sized>(Arc<T>);

impl<T> Stable<T> {
    /// Adopt a value as a new identity.
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl<T: ?Sized> Stable<T> {
    /// Wrap an existing `Arc` without copying.
    pub fn from_arc(value: Arc<T>) -> Self {
        Self(value)
    }

    /// Whether two handles refer to the same adoption.
    pub fn same(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl<T: ?Sized> Clone for Stable<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: ?Sized> PartialEq for Stable<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::same(self, other)
    }
}

impl<T: ?Sized> Eq for Stable<T> {}

impl<T: ?Sized> Deref for Stable<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Stable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Stable").field(&&*self.0).finish()
    }
}

/// Tracks the last stabilized value for one slot of one consumer.
///
/// # Type Parameters
///
/// - `T`: The tracked value. Its `PartialEq` decides what "unchanged" means:
///   a derived impl on an options struct is a shallow field comparison, an
///   argument type compares however it defines equality.
pub struct StableValue<T> {
    previous: Option<Stable<T>>,
}

impl<T: PartialEq> StableValue<T> {
    /// Create a tracker with no previous value.
    pub fn new() -> Self {
        Self { previous: None }
    }

    /// Return the previous identity if `value` equals it, otherwise adopt
    /// `value` as the new identity.
    pub fn stabilize(&mut self, value: T) -> Stable<T> {
        if let Some(previous) = &self.previous {
            if **previous == value {
                return previous.clone();
            }
        }

        let adopted = Stable::new(value);
        self.previous = Some(adopted.clone());
        adopted
    }

    /// The last value handed out, if any.
    pub fn current(&self) -> Option<&Stable<T>> {
        self.previous.as_ref()
    }
}

impl<T: PartialEq> Default for StableValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for StableValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StableValue")
            .field("previous", &self.previous)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
