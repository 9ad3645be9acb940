use super::core::Core;

use std::cell::Cell;
use std::ptr;

thread_local! {
    /// Thread-local pointer to the scheduler currently driving this thread.
    ///
    /// This is set while a scheduler runs its coroutines and allows the
    /// trampoline, the I/O loop and the free functions of the crate to reach
    /// the scheduler without explicit parameter passing.
    static CURRENT_SCHEDULER: Cell<*const Core> = const { Cell::new(ptr::null()) };
}

/// Restores the previously installed scheduler when dropped.
struct Reset(*const Core);

impl Drop for Reset {
    fn drop(&mut self) {
        CURRENT_SCHEDULER.with(|current| current.set(self.0));
    }
}

/// Enters the scheduler context for the current thread.
///
/// `core` is installed as the current scheduler for the duration of `f`.
/// The previous scheduler, if any, is restored afterwards, including when
/// `f` unwinds.
///
/// # Arguments
///
/// * `core` - The scheduler core to install.
/// * `f` - Closure executed inside the scheduler context.
///
/// # Returns
///
/// Returns the result of the closure `f`.
pub(crate) fn enter<R>(core: &Core, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT_SCHEDULER.with(|current| current.replace(core));
    let _reset = Reset(previous);

    f()
}

/// Runs `f` with the scheduler installed on this thread.
///
/// # Panics
///
/// Panics with "no scheduler in context" when called outside of a running
/// scheduler.
pub(crate) fn with_current<R>(f: impl FnOnce(&Core) -> R) -> R {
    match try_with_current(f) {
        Some(out) => out,
        None => panic!("no scheduler in context"),
    }
}

/// Runs `f` with the installed scheduler, or returns `None` if there is
/// none.
pub(crate) fn try_with_current<R>(f: impl FnOnce(&Core) -> R) -> Option<R> {
    let core = CURRENT_SCHEDULER.with(Cell::get);

    if core.is_null() {
        return None;
    }

    // The pointer is only installed by `enter`, which borrows the boxed core
    // for as long as it stays installed.
    Some(f(unsafe { &*core }))
}
