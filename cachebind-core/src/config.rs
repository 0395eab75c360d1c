//! Hook configuration.
//!
//! Defaults applied by [`QueryHooks`](crate::hooks::QueryHooks) to the
//! controllers it builds. Loadable from JSON; every field is optional.
//!
//! ```json
//! {
//!     "subscription": { "polling_interval": 30000 },
//!     "refetch_on_mount_or_arg_change": { "older_than": 60 },
//!     "prefetch": { "if_older_than": 300 }
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{PrefetchOptions, RefetchOnMount, SubscriptionOptions};

/// Defaults for controllers built from one set of hooks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Subscription options new subscriptions start from.
    pub subscription: SubscriptionOptions,
    pub refetch_on_mount_or_arg_change: RefetchOnMount,
    /// Defaults merged under every prefetch call.
    pub prefetch: PrefetchOptions,
}

impl HookConfig {
    /// Parse a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
