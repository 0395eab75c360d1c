//! Cache Store Interface
//!
//! The cache store is an external collaborator: it owns normalized storage,
//! runs fetches and writes their results. This module defines what the
//! controllers need from it and the data they read back.
//!
//! # Endpoints
//!
//! Each operation is reached through a typed endpoint descriptor
//! ([`QueryEndpoint`] or [`MutationEndpoint`]) resolved when the hooks are
//! built, so argument and result types are checked at compile time instead
//! of looked up by name.
//!
//! # Entries
//!
//! A [`CacheEntry`] is an immutable snapshot shared as `Arc`. Stores replace
//! the `Arc` whenever an entry changes, so snapshot identity is a cheap
//! change signal for memoized selection.

mod handle;
pub mod memory;

pub use handle::{MutationHandle, MutationSubscription, QueryHandle, SubscriptionLink};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{BindError, Result};
use crate::reactive::Stable;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    #[default]
    Uninitialized,
    Pending,
    Fulfilled,
    Rejected,
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryStatus::Uninitialized => "uninitialized",
            QueryStatus::Pending => "pending",
            QueryStatus::Fulfilled => "fulfilled",
            QueryStatus::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Identifier of one initiated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    /// Generate a new process-unique request ID.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Identifies one logical cache entry: endpoint name plus serialized
/// argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    endpoint: Arc<str>,
    serialized_arg: String,
}

impl CacheKey {
    /// Build the key for `arg` on `endpoint`.
    pub fn new<A>(endpoint: &str, arg: &A) -> Result<Self>
    where
        A: Serialize + ?Sized,
    {
        let serialized_arg =
            serde_json::to_string(arg).map_err(|source| BindError::KeySerialization {
                endpoint: endpoint.to_string(),
                source,
            })?;

        Ok(Self {
            endpoint: Arc::from(endpoint),
            serialized_arg,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn serialized_arg(&self) -> &str {
        &self.serialized_arg
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.endpoint, self.serialized_arg)
    }
}

/// Snapshot of one cache entry as stored by the cache store.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T, E> {
    pub status: QueryStatus,
    pub data: Option<T>,
    pub error: Option<E>,
    /// Milliseconds since the UNIX epoch of the last successful fetch.
    pub fulfilled_timestamp: Option<u64>,
    pub subscriber_count: usize,
    /// Request that last moved the entry to pending.
    pub request_id: Option<RequestId>,
}

impl<T, E> CacheEntry<T, E> {
    /// The entry of a key nobody has requested, also returned for the skip
    /// key.
    pub fn uninitialized() -> Self {
        Self {
            status: QueryStatus::Uninitialized,
            data: None,
            error: None,
            fulfilled_timestamp: None,
            subscriber_count: 0,
            request_id: None,
        }
    }

    pub fn is_uninitialized(&self) -> bool {
        self.status == QueryStatus::Uninitialized
    }

    pub fn is_pending(&self) -> bool {
        self.status == QueryStatus::Pending
    }

    pub fn is_fulfilled(&self) -> bool {
        self.status == QueryStatus::Fulfilled
    }

    pub fn is_rejected(&self) -> bool {
        self.status == QueryStatus::Rejected
    }
}

impl<T, E> Default for CacheEntry<T, E> {
    fn default() -> Self {
        Self::uninitialized()
    }
}

/// Options attached to a subscription. They can change without
/// re-initiating the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionOptions {
    pub refetch_on_reconnect: Option<bool>,
    pub refetch_on_focus: Option<bool>,
    /// Polling interval in milliseconds, `0` disables polling.
    pub polling_interval: u64,
}

/// When a new subscription should bypass cached data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefetchOnMount {
    /// Reuse fresh or in-flight data.
    #[default]
    Never,
    /// Always fetch.
    Always,
    /// Fetch when the cached data is at least this many seconds old.
    OlderThan(u64),
}

impl RefetchOnMount {
    /// Whether fulfilled data stamped `fulfilled_at` must be refetched at
    /// `now` (both in milliseconds since the epoch).
    pub fn requires_fetch(&self, fulfilled_at: Option<u64>, now: u64) -> bool {
        match self {
            RefetchOnMount::Never => false,
            RefetchOnMount::Always => true,
            RefetchOnMount::OlderThan(seconds) => match fulfilled_at {
                Some(at) => now.saturating_sub(at) >= seconds.saturating_mul(1000),
                None => true,
            },
        }
    }
}

impl From<bool> for RefetchOnMount {
    fn from(force: bool) -> Self {
        if force {
            RefetchOnMount::Always
        } else {
            RefetchOnMount::Never
        }
    }
}

/// Options passed to [`QueryEndpoint::initiate`].
#[derive(Debug, Clone, PartialEq)]
pub struct InitiateOptions {
    pub subscription_options: Stable<SubscriptionOptions>,
    pub force_refetch: RefetchOnMount,
}

/// Options for a prefetch. Unset fields fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchOptions {
    /// Fetch even if data is cached.
    pub force: Option<bool>,
    /// Fetch if cached data is at least this many seconds old.
    pub if_older_than: Option<u64>,
}

impl PrefetchOptions {
    /// Field-wise merge where `overrides` wins.
    pub fn merge(&self, overrides: &PrefetchOptions) -> PrefetchOptions {
        PrefetchOptions {
            force: overrides.force.or(self.force),
            if_older_than: overrides.if_older_than.or(self.if_older_than),
        }
    }
}

/// Typed descriptor of one query operation.
pub trait QueryEndpoint: Send + Sync + 'static {
    type Arg: PartialEq + fmt::Debug + Send + Sync + 'static;
    type Data: Clone + PartialEq + Send + Sync + 'static;
    type Error: Clone + PartialEq + Send + Sync + 'static;

    /// Operation name, the first half of every cache key.
    fn name(&self) -> &str;

    /// Register interest in the entry for `arg`, fetching unless an
    /// equivalent in-flight or fresh entry exists and `force_refetch`
    /// allows reuse.
    fn initiate(
        &self,
        arg: Stable<Self::Arg>,
        options: InitiateOptions,
    ) -> Result<QueryHandle<Self::Arg>>;

    /// Read the current entry. `None` is the skip key: it yields an
    /// uninitialized entry and registers nothing.
    fn select(&self, arg: Option<&Self::Arg>) -> Arc<CacheEntry<Self::Data, Self::Error>>;

    /// Fire-and-forget fetch that creates no subscription.
    fn prefetch(&self, arg: &Self::Arg, options: &PrefetchOptions);
}

/// Typed descriptor of one mutation operation.
pub trait MutationEndpoint: Send + Sync + 'static {
    type Arg: Send + 'static;
    type Data: Clone + PartialEq + Send + Sync + 'static;
    type Error: Clone + PartialEq + Send + Sync + 'static;

    fn name(&self) -> &str;

    /// Start a mutation. Each call gets a fresh request id.
    fn initiate(&self, arg: Self::Arg) -> MutationHandle<Self::Data, Self::Error>;

    /// Read the entry of one request. `None` yields an uninitialized entry.
    fn select(
        &self,
        request_id: Option<RequestId>,
    ) -> Arc<CacheEntry<Self::Data, Self::Error>>;
}

/// Current wall-clock time in milliseconds since the UNIX epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cache_key_serializes_argument() {
        let key = CacheKey::new("getPost", &json!({ "id": 3 })).unwrap();
        assert_eq!(key.endpoint(), "getPost");
        assert_eq!(key.serialized_arg(), r#"{"id":3}"#);
        assert_eq!(key.to_string(), r#"getPost({"id":3})"#);

        assert_eq!(key, CacheKey::new("getPost", &json!({ "id": 3 })).unwrap());
        assert_ne!(key, CacheKey::new("getUser", &json!({ "id": 3 })).unwrap());
    }

    #[test]
    fn cache_key_reports_serialization_failure() {
        use std::collections::HashMap;

        let mut arg = HashMap::new();
        arg.insert((1, 2), "tuple keys are not valid JSON object keys");

        let err = CacheKey::new("bad", &arg).unwrap_err();
        assert!(matches!(err, BindError::KeySerialization { ref endpoint, .. } if endpoint == "bad"));
    }

    #[test]
    fn refetch_on_mount_policies() {
        let now = 100_000;
        assert!(!RefetchOnMount::Never.requires_fetch(Some(0), now));
        assert!(RefetchOnMount::Always.requires_fetch(Some(now), now));
        assert!(RefetchOnMount::OlderThan(60).requires_fetch(Some(now - 60_000), now));
        assert!(!RefetchOnMount::OlderThan(60).requires_fetch(Some(now - 59_999), now));
        assert!(RefetchOnMount::OlderThan(60).requires_fetch(None, now));
        assert_eq!(RefetchOnMount::from(true), RefetchOnMount::Always);
    }

    #[test]
    fn prefetch_options_merge_prefers_overrides() {
        let defaults = PrefetchOptions {
            force: Some(false),
            if_older_than: Some(30),
        };
        let call_site = PrefetchOptions {
            force: Some(true),
            if_older_than: None,
        };

        let merged = defaults.merge(&call_site);
        assert_eq!(merged.force, Some(true));
        assert_eq!(merged.if_older_than, Some(30));
    }

    #[test]
    fn subscription_options_deserialize_with_defaults() {
        let options: SubscriptionOptions =
            serde_json::from_str(r#"{ "polling_interval": 5000 }"#).unwrap();
        assert_eq!(options.polling_interval, 5000);
        assert_eq!(options.refetch_on_focus, None);
    }
}
