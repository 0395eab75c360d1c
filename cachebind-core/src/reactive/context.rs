//! Evaluation Context
//!
//! The evaluation context marks that a read/derive pass is running on the
//! current thread. Controllers never touch the cache store's write side
//! while a pass is active; the store interface uses [`EvalContext::is_active`]
//! to catch violations in debug builds.
//!
//! # Implementation
//!
//! We use a thread-local stack of pass entries. Entering a pass pushes an
//! entry, dropping the guard pops it. Nesting happens when one consumer's
//! pass evaluates a child consumer inline.

use std::cell::RefCell;

thread_local! {
    /// Identifiers of the running passes, innermost last.
    static CONTEXT_STACK: RefCell<Vec<u64>> = RefCell::new(Vec::new());
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack consistent even if the pass panics.
pub struct EvalContext {
    pass_id: u64,
}

impl EvalContext {
    /// Enter a new evaluation pass.
    pub fn enter(pass_id: u64) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(pass_id);
        });

        Self { pass_id }
    }

    /// Check if an evaluation pass is running on this thread.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Get the innermost pass ID, if any.
    pub fn current_pass() -> Option<u64> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().copied())
    }
}

impl Drop for EvalContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(pass_id) = popped {
                debug_assert_eq!(
                    pass_id, self.pass_id,
                    "EvalContext mismatch: expected pass {}, got {}",
                    self.pass_id, pass_id
                );
            }
        });
    }
}
