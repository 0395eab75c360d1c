//! Cachebind Core
//!
//! This crate binds ephemeral consumers (UI components, view models, any code
//! evaluated repeatedly) to entries of an asynchronous cache store. It
//! implements:
//!
//! - Subscription controllers for queries, lazy queries and mutations
//! - Status derivation with data carry-forward
//! - Referential stabilization of arguments and options
//! - A host-independent runtime for deferred effects
//!
//! The cache store itself is a collaborator behind the [`store::QueryEndpoint`]
//! and [`store::MutationEndpoint`] traits. An in-memory implementation ships
//! in [`store::memory`].
//!
//! # Architecture
//!
//! - `reactive`: evaluation passes, effects, stable values and state cells
//! - `store`: cache entries, request handles and endpoint traits
//! - `hooks`: the consumer-facing controllers
//! - `config`: defaults loadable from JSON
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cachebind_core::hooks::{QueryHooks, QueryOptions};
//! use cachebind_core::reactive::Runtime;
//! use cachebind_core::store::memory::MemoryQuery;
//!
//! let runtime = Runtime::new();
//! let posts = Arc::new(MemoryQuery::<u32, String, String>::new("getPost").with_runtime(&runtime));
//! let hooks = QueryHooks::new(posts.clone(), &runtime);
//!
//! // One consumer.
//! let mut query = hooks.query();
//!
//! // First pass: the fetch is queued, the view reports a first load.
//! let result = runtime.pass(|pass| query.evaluate(pass, 1, &QueryOptions::default()));
//! assert!(result.status.is_loading);
//!
//! // Effects run after the pass.
//! runtime.flush()?;
//!
//! posts.fulfill(&1, "hello".to_string())?;
//! let result = runtime.pass(|pass| query.evaluate(pass, 1, &QueryOptions::default()));
//! assert_eq!(result.status.data.as_deref(), Some("hello"));
//! ```

pub mod config;
pub mod error;
pub mod hooks;
pub mod reactive;
pub mod store;

pub use config::HookConfig;
pub use error::{BindError, MutationError, Result};
