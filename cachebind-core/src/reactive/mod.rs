//! Evaluation Primitives
//!
//! This module implements the host-independent evaluation model the
//! controllers run on: passes, deferred effects, stable values, memoized
//! selection and notifying state.
//!
//! # Concepts
//!
//! ## Passes
//!
//! A pass is one evaluation of one consumer. It reads state and derives a
//! view; it never writes to the cache store. Everything a pass wants to
//! change is queued as an effect.
//!
//! ## Effects
//!
//! An [`Effect`] is a side effect gated by dependencies. It runs after the
//! pass, during [`Runtime::flush`], and only when its dependencies changed.
//! Its cleanup runs before the next run and on teardown.
//!
//! ## Stable Values
//!
//! [`StableValue`] turns structurally equal values produced on successive
//! passes into the same [`Stable`] identity, so effects and memos can compare
//! identities.
//!
//! ## Batches
//!
//! [`Runtime::batch`] coalesces the notifications of several writes made for
//! one external trigger into a single update.

mod consumer;
mod context;
mod effect;
mod memo;
mod runtime;
mod stable;
mod state;

pub use consumer::ConsumerId;
pub use context::EvalContext;
pub use effect::{Cleanup, Effect};
pub use memo::{MemoState, SelectorMemo};
pub use runtime::{Job, ListenerId, Pass, Runtime};
pub use stable::{Stable, StableValue};
pub use state::StateCell;
