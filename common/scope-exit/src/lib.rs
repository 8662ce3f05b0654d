//! Ad-hoc scope guards.
//!
//! A scope guard performs an action when it goes out of scope,
//! either normally or because a panic unwinds through it.
//! Guards can be dismissed once the action is no longer needed,
//! which makes them a good fit for rolling back partial work.

#![warn(missing_docs)]

use std::mem::{ManuallyDrop, forget};

/// Scope guard that calls `F` when dropped.
///
/// Construct it with [`ScopeExit::new`] when the guard
/// must be dismissed later, or with [`scope_exit!`] otherwise.
#[must_use = "the action is performed immediately if the guard is not bound"]
pub struct ScopeExit<F>
    where F: FnOnce()
{
    f: ManuallyDrop<F>,
}

impl<F> ScopeExit<F>
    where F: FnOnce()
{
    /// Create a guard that calls `f` when dropped.
    pub fn new(f: F) -> Self
    {
        Self{f: ManuallyDrop::new(f)}
    }

    /// Drop the guard without calling its action.
    ///
    /// Anything captured by the action is dropped.
    pub fn dismiss(mut self)
    {
        // SAFETY: self is forgotten, so self.f is not taken again.
        let f = unsafe { ManuallyDrop::take(&mut self.f) };
        forget(self);
        drop(f);
    }
}

impl<F> Drop for ScopeExit<F>
    where F: FnOnce()
{
    fn drop(&mut self)
    {
        // SAFETY: self.f will not be used anymore.
        let f = unsafe { ManuallyDrop::take(&mut self.f) };
        f();
    }
}

/// Define an ad-hoc scope guard.
///
/// The code passed to this macro is performed at the end of the scope.
/// It is performed when the scope ends or when a panic passes through.
///
/// # Examples
///
/// ```
/// # use scope_exit::scope_exit;
/// use std::cell::Cell;
/// let x = Cell::new(0);
/// {
///     scope_exit! { x.set(1); }
///     x.set(2);
/// }
/// assert_eq!(x.get(), 1);
/// ```
#[macro_export]
macro_rules! scope_exit
{
    { $($tt:tt)* } => {
        let __scope_exit = $crate::ScopeExit::new(|| { $($tt)* });
    };
}
