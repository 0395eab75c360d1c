//! Query State Controller
//!
//! Derives a consumer's status view from the cache entry of its argument.
//!
//! Selection is memoized on the identity of the entry snapshot and of the
//! last recorded result, so a pass over unchanged inputs returns the
//! previous output without recomputing. The memo starts over when skip, the
//! argument or the selector changes. A recomputed output that compares equal
//! to the previous one is returned as the previous [`Stable`].
//!
//! The last result is recorded by an effect after each pass that produced a
//! new output, then passed to the next selection for data carry-forward.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::status::{DerivedStatus, QuerySelector};
use crate::reactive::{ConsumerId, Effect, Pass, Runtime, SelectorMemo, Stable, StableValue};
use crate::store::{CacheEntry, QueryEndpoint};

type Status<Q> = DerivedStatus<<Q as QueryEndpoint>::Data, <Q as QueryEndpoint>::Error>;
type Entry<Q> = CacheEntry<<Q as QueryEndpoint>::Data, <Q as QueryEndpoint>::Error>;

/// Per-pass options of a [`QueryState`].
pub struct QueryStateOptions<T, E> {
    /// Read the skip key instead of the argument's entry.
    pub skip: bool,
    pub selector: QuerySelector<T, E>,
}

impl<T, E> Default for QueryStateOptions<T, E> {
    fn default() -> Self {
        Self {
            skip: false,
            selector: QuerySelector::Default,
        }
    }
}

impl<T, E> Clone for QueryStateOptions<T, E> {
    fn clone(&self) -> Self {
        Self {
            skip: self.skip,
            selector: self.selector.clone(),
        }
    }
}

impl<T, E> fmt::Debug for QueryStateOptions<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryStateOptions")
            .field("skip", &self.skip)
            .field("selector", &self.selector)
            .finish()
    }
}

/// Inputs whose change starts a fresh selection.
struct SelectionInputs<A, T, E> {
    skip: bool,
    arg: Option<Stable<A>>,
    selector: QuerySelector<T, E>,
}

impl<A, T, E> PartialEq for SelectionInputs<A, T, E> {
    fn eq(&self, other: &Self) -> bool {
        self.skip == other.skip && self.arg == other.arg && self.selector == other.selector
    }
}

type MemoKey<Q> = (Stable<Entry<Q>>, Option<Stable<Status<Q>>>);

/// Status controller for one consumer.
pub struct QueryState<Q: QueryEndpoint> {
    consumer: ConsumerId,
    endpoint: Arc<Q>,
    runtime: Runtime,
    arg: StableValue<Q::Arg>,
    inputs: Option<SelectionInputs<Q::Arg, Q::Data, Q::Error>>,
    memo: SelectorMemo<MemoKey<Q>, Stable<Status<Q>>>,
    output: StableValue<Status<Q>>,
    last_result: Arc<Mutex<Option<Stable<Status<Q>>>>>,
    record: Effect<Stable<Status<Q>>>,
}

impl<Q: QueryEndpoint> QueryState<Q> {
    pub fn new(endpoint: Arc<Q>, runtime: &Runtime) -> Self {
        Self {
            consumer: ConsumerId::new(),
            endpoint,
            runtime: runtime.clone(),
            arg: StableValue::new(),
            inputs: None,
            memo: SelectorMemo::new(),
            output: StableValue::new(),
            last_result: Arc::new(Mutex::new(None)),
            record: Effect::new(),
        }
    }

    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    /// Evaluate for one pass.
    pub fn evaluate(
        &mut self,
        pass: &mut Pass<'_>,
        arg: Q::Arg,
        options: &QueryStateOptions<Q::Data, Q::Error>,
    ) -> Stable<Status<Q>> {
        let arg = self.arg.stabilize(arg);
        self.evaluate_stable(pass, Some(arg), options)
    }

    /// Evaluate with an argument the caller already stabilized. `None`
    /// reads the skip key.
    pub(crate) fn evaluate_stable(
        &mut self,
        pass: &mut Pass<'_>,
        arg: Option<Stable<Q::Arg>>,
        options: &QueryStateOptions<Q::Data, Q::Error>,
    ) -> Stable<Status<Q>> {
        let inputs = SelectionInputs {
            skip: options.skip,
            arg,
            selector: options.selector.clone(),
        };
        if self.inputs.as_ref() != Some(&inputs) {
            self.memo.mark_dirty();
        }

        let entry = match (&inputs.arg, inputs.skip) {
            (Some(arg), false) => self.endpoint.select(Some(&**arg)),
            _ => self.endpoint.select(None),
        };
        let entry = Stable::from_arc(entry);
        let last = self.last_result.lock().clone();

        let output = &mut self.output;
        let selector = &inputs.selector;
        let status = self.memo.get_or_compute((entry.clone(), last.clone()), || {
            output.stabilize(selector.select(&entry, last.as_deref()))
        });
        self.inputs = Some(inputs);

        let last_result = Arc::clone(&self.last_result);
        let recorded = status.clone();
        self.record.schedule(pass, status.clone(), move || {
            *last_result.lock() = Some(recorded);
            None
        });

        status
    }

    /// The result recorded by the last flushed pass.
    pub fn last_result(&self) -> Option<Stable<Status<Q>>> {
        self.last_result.lock().clone()
    }

    /// Number of times selection actually ran.
    pub fn selections(&self) -> u64 {
        self.memo.computations()
    }
}

impl<Q: QueryEndpoint> Drop for QueryState<Q> {
    fn drop(&mut self) {
        self.record.dispose(&self.runtime);
    }
}

impl<Q: QueryEndpoint> fmt::Debug for QueryState<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryState")
            .field("consumer", &self.consumer)
            .field("endpoint", &self.endpoint.name())
            .field("memo", &self.memo)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::status::derive_query_status;
    use crate::store::memory::MemoryQuery;
    use crate::store::{InitiateOptions, RefetchOnMount, SubscriptionOptions};

    type Posts = MemoryQuery<u32, String, String>;

    fn setup() -> (Runtime, Arc<Posts>, QueryState<Posts>) {
        let runtime = Runtime::new();
        let store = Arc::new(Posts::new("getPost").with_runtime(&runtime));
        let state = QueryState::new(store.clone(), &runtime);
        (runtime, store, state)
    }

    fn subscribe(store: &Posts, arg: u32) {
        let handle = store
            .initiate(
                Stable::new(arg),
                InitiateOptions {
                    subscription_options: Stable::new(SubscriptionOptions::default()),
                    force_refetch: RefetchOnMount::Never,
                },
            )
            .unwrap();
        // The entry keeps its state after the request is released.
        handle.unsubscribe();
    }

    fn read(
        runtime: &Runtime,
        state: &mut QueryState<Posts>,
        arg: u32,
        options: &QueryStateOptions<String, String>,
    ) -> Stable<DerivedStatus<String, String>> {
        let status = runtime.pass(|pass| state.evaluate(pass, arg, options));
        runtime.flush().unwrap();
        status
    }

    #[test]
    fn unchanged_inputs_return_the_same_output() {
        let (runtime, store, mut state) = setup();
        store.fulfill(&1, "post".to_string()).unwrap();
        let options = QueryStateOptions::default();

        let first = read(&runtime, &mut state, 1, &options);
        let second = read(&runtime, &mut state, 1, &options);
        let third = read(&runtime, &mut state, 1, &options);

        assert!(first.is_success);
        assert_eq!(first, second);
        assert_eq!(second, third);
    }

    #[test]
    fn equal_recomputed_output_keeps_identity() {
        let (runtime, store, mut state) = setup();
        store.fulfill_at(&1, "post".to_string(), 10).unwrap();
        store.fulfill_at(&2, "post".to_string(), 10).unwrap();
        let options = QueryStateOptions::default();

        let first = read(&runtime, &mut state, 1, &options);
        let computations = state.selections();
        let second = read(&runtime, &mut state, 2, &options);

        // Another argument, so selection ran again, but both entries derive
        // the same view.
        assert!(state.selections() > computations);
        assert!(Stable::same(&first, &second));
    }

    #[test]
    fn skip_reads_uninitialized() {
        let (runtime, store, mut state) = setup();
        store.fulfill(&1, "post".to_string()).unwrap();

        let status = read(
            &runtime,
            &mut state,
            1,
            &QueryStateOptions {
                skip: true,
                ..Default::default()
            },
        );
        assert!(status.is_uninitialized);
        assert!(status.data.is_none());
    }

    #[test]
    fn data_carries_forward_across_argument_change() {
        let (runtime, store, mut state) = setup();
        let options = QueryStateOptions::default();
        store.fulfill(&1, "first".to_string()).unwrap();
        read(&runtime, &mut state, 1, &options);

        subscribe(&store, 2);
        let status = read(&runtime, &mut state, 2, &options);
        assert!(status.is_fetching);
        assert!(status.is_success);
        assert!(!status.is_loading);
        assert_eq!(status.data.as_deref(), Some("first"));

        store.fulfill(&2, "second".to_string()).unwrap();
        let status = read(&runtime, &mut state, 2, &options);
        assert_eq!(status.data.as_deref(), Some("second"));
    }

    #[test]
    fn last_result_is_recorded_after_flush() {
        let (runtime, store, mut state) = setup();
        store.fulfill(&1, "post".to_string()).unwrap();

        let status = runtime.pass(|pass| state.evaluate(pass, 1, &QueryStateOptions::default()));
        assert!(state.last_result().is_none());

        runtime.flush().unwrap();
        assert_eq!(state.last_result(), Some(status));
    }

    #[test]
    fn custom_selector_is_applied() {
        let (runtime, store, mut state) = setup();
        store.fulfill(&1, "post".to_string()).unwrap();

        let options = QueryStateOptions {
            skip: false,
            selector: QuerySelector::custom(|entry, last| {
                let mut derived = derive_query_status(entry, last);
                derived.data = derived.data.map(|data: String| data.to_uppercase());
                derived
            }),
        };

        let status = read(&runtime, &mut state, 1, &options);
        assert_eq!(status.data.as_deref(), Some("POST"));
    }

    #[test]
    fn selector_change_resets_the_memo() {
        let (runtime, store, mut state) = setup();
        store.fulfill(&1, "post".to_string()).unwrap();

        read(&runtime, &mut state, 1, &QueryStateOptions::default());
        let computations = state.selections();

        read(
            &runtime,
            &mut state,
            1,
            &QueryStateOptions {
                skip: false,
                selector: QuerySelector::NoPending,
            },
        );
        assert_eq!(state.selections(), computations + 1);
    }
}
