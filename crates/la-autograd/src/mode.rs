//! Backprop recording mode.
//!
//! Operations register gradient rules only while recording is enabled. The
//! mode is a thread-local stack so scopes nest and every guard restores the
//! mode that was active when it was created, including on early return and
//! unwinding.

use std::cell::RefCell;
use std::marker::PhantomData;

thread_local! {
    static MODE_STACK: RefCell<Vec<bool>> = const { RefCell::new(Vec::new()) };
}

/// Whether forward operations currently record gradient rules.
pub fn is_backprop_enabled() -> bool {
    MODE_STACK.with(|stack| stack.borrow().last().copied().unwrap_or(true))
}

fn push_mode(enabled: bool) {
    MODE_STACK.with(|stack| stack.borrow_mut().push(enabled));
}

fn pop_mode() {
    MODE_STACK.with(|stack| {
        stack.borrow_mut().pop();
    });
}

/// RAII guard that disables recording until dropped.
pub struct NoBackpropModeScope {
    // The guard must be dropped on the thread whose stack it pushed to.
    _not_send: PhantomData<*const ()>,
}

impl NoBackpropModeScope {
    pub fn new() -> Self {
        push_mode(false);
        NoBackpropModeScope {
            _not_send: PhantomData,
        }
    }
}

impl Default for NoBackpropModeScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NoBackpropModeScope {
    fn drop(&mut self) {
        pop_mode();
    }
}

/// RAII guard that enables recording until dropped, even inside a
/// `NoBackpropModeScope`.
pub struct ForceBackpropModeScope {
    _not_send: PhantomData<*const ()>,
}

impl ForceBackpropModeScope {
    pub fn new() -> Self {
        push_mode(true);
        ForceBackpropModeScope {
            _not_send: PhantomData,
        }
    }
}

impl Default for ForceBackpropModeScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ForceBackpropModeScope {
    fn drop(&mut self) {
        pop_mode();
    }
}

/// Run `f` with recording disabled.
pub fn no_backprop<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let _scope = NoBackpropModeScope::new();
    f()
}
