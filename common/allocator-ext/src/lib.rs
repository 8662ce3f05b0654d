//! Extra items for working with allocators.
//!
//! The [`Allocator`] trait works in terms of [`Layout`]s.
//! [`AllocatorExt`] adds typed helpers on top of that,
//! so that a single allocator can serve allocations
//! of any type (what C++ calls "rebinding" an allocator).
//! The remaining items are allocators that wrap other allocators.

#![warn(missing_docs)]

use {
    allocator_api2::alloc::{AllocError, Allocator},
    std::{alloc::Layout, cell::Cell, ptr::NonNull, rc::Rc},
};

pub use allocator_api2::alloc::Global;

/* -------------------------------------------------------------------------- */
/*                                AllocatorExt                                */
/* -------------------------------------------------------------------------- */

/// Typed allocation methods for any allocator.
pub trait AllocatorExt: Allocator
{
    /// Allocate uninitialized memory for one value of type `T`.
    fn allocate_for<T>(&self) -> Result<NonNull<T>, AllocError>
    {
        let ptr = self.allocate(Layout::new::<T>())?;
        Ok(ptr.cast())
    }

    /// Deallocate memory obtained from [`allocate_for`].
    ///
    /// This does not drop the value stored in the memory.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate_for::<T>`]
    /// on this allocator (or one it was cloned from),
    /// and must not have been deallocated yet.
    ///
    /// [`allocate_for`]: `Self::allocate_for`
    /// [`allocate_for::<T>`]: `Self::allocate_for`
    unsafe fn deallocate_for<T>(&self, ptr: NonNull<T>)
    {
        self.deallocate(ptr.cast(), Layout::new::<T>());
    }
}

impl<A> AllocatorExt for A
    where A: Allocator + ?Sized
{
}

/* -------------------------------------------------------------------------- */
/*                              CountingAllocator                             */
/* -------------------------------------------------------------------------- */

/// Allocator that keeps statistics about the allocations it performs.
///
/// Clones share their statistics, so a clone that was moved
/// into a data structure still reports to the original.
#[derive(Clone, Debug, Default)]
pub struct CountingAllocator<A = Global>
{
    inner: A,
    stats: Rc<AllocStats>,
}

/// Statistics kept by [`CountingAllocator`].
#[derive(Debug, Default)]
pub struct AllocStats
{
    allocations:   Cell<usize>,
    deallocations: Cell<usize>,
    live_bytes:    Cell<usize>,
}

impl CountingAllocator
{
    /// Wrap the global allocator.
    pub fn new() -> Self
    {
        Self::default()
    }
}

impl<A> CountingAllocator<A>
{
    /// Wrap the given allocator.
    pub fn wrap(inner: A) -> Self
    {
        Self{inner, stats: Rc::default()}
    }

    /// Number of successful allocations so far.
    pub fn allocations(&self) -> usize
    {
        self.stats.allocations.get()
    }

    /// Number of deallocations so far.
    pub fn deallocations(&self) -> usize
    {
        self.stats.deallocations.get()
    }

    /// Number of allocations that were not yet deallocated.
    pub fn live(&self) -> usize
    {
        self.allocations() - self.deallocations()
    }

    /// Number of bytes that were allocated but not yet deallocated.
    pub fn live_bytes(&self) -> usize
    {
        self.stats.live_bytes.get()
    }
}

unsafe impl<A> Allocator for CountingAllocator<A>
    where A: Allocator
{
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError>
    {
        let ptr = self.inner.allocate(layout)?;
        let stats = &self.stats;
        stats.allocations.set(stats.allocations.get() + 1);
        stats.live_bytes.set(stats.live_bytes.get() + layout.size());
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout)
    {
        let stats = &self.stats;
        stats.deallocations.set(stats.deallocations.get() + 1);
        stats.live_bytes.set(stats.live_bytes.get() - layout.size());
        self.inner.deallocate(ptr, layout)
    }
}

/* -------------------------------------------------------------------------- */
/*                              FailingAllocator                              */
/* -------------------------------------------------------------------------- */

/// Allocator for which every allocation fails.
///
/// Useful for exercising allocation failure paths.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingAllocator;

unsafe impl Allocator for FailingAllocator
{
    fn allocate(&self, _layout: Layout) -> Result<NonNull<[u8]>, AllocError>
    {
        Err(AllocError)
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout)
    {
        // Nothing was ever allocated, so nothing can be deallocated.
        unreachable!()
    }
}
