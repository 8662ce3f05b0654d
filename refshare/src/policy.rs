//! Destruction and allocation policies.

use std::ptr::NonNull;

pub use allocator_api2::alloc::{Allocator, Global};

/// Allocation policy used when none is given.
pub type DefaultAlloc = Global;

/// Destruction policy for objects managed by [`Shared`].
///
/// The deleter is consumed by [`delete`][`Self::delete`],
/// so it can destroy at most one object.
///
/// [`Shared`]: `crate::Shared`
pub trait Deleter<T>
    where T: ?Sized
{
    /// Destroy the object and free its memory.
    ///
    /// # Safety
    ///
    /// `ptr` must be the pointer this deleter was paired with
    /// when the handle was created, and the object must be alive.
    unsafe fn delete(self, ptr: NonNull<T>);
}

/// Deleter for objects that were allocated with [`Box`].
///
/// This is the deleter used when none is given.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultDelete;

impl<T> Deleter<T> for DefaultDelete
    where T: ?Sized
{
    unsafe fn delete(self, ptr: NonNull<T>)
    {
        drop(Box::from_raw(ptr.as_ptr()));
    }
}

impl<T, F> Deleter<T> for F
    where T: ?Sized, F: FnOnce(NonNull<T>)
{
    unsafe fn delete(self, ptr: NonNull<T>)
    {
        self(ptr)
    }
}
