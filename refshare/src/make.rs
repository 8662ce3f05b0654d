//! Constructing objects together with their control blocks.
//!
//! The functions in this module allocate a single block of memory
//! that holds both the control block and the object.
//! This saves an allocation compared to [`Shared::from_box`].
//! The memory is only freed once there are no [`Weak`] handles left,
//! even though the object is destroyed as soon as
//! there are no [`Shared`] handles left.
//!
//! [`Weak`]: `crate::Weak`

use {
    crate::{ConstructError, DefaultAlloc, SharedFromThis, Shared, block::InlineBlock},
    allocator_api2::alloc::Allocator,
    std::{alloc::handle_alloc_error, convert::Infallible},
};

/// Move `value` into a new control block.
///
/// The control block is allocated with [`DefaultAlloc`].
pub fn make_shared<T>(value: T) -> Shared<T>
{
    allocate_shared(DefaultAlloc::default(), value)
}

/// Construct an object with `init` inside a new control block.
///
/// The control block is allocated with [`DefaultAlloc`]
/// before `init` is called.
pub fn make_shared_with<T, F>(init: F) -> Shared<T>
    where F: FnOnce() -> T
{
    allocate_shared_with(DefaultAlloc::default(), init)
}

/// Move `value` into a new control block allocated with `alloc`.
pub fn allocate_shared<T, A>(alloc: A, value: T) -> Shared<T>
    where A: Allocator + 'static
{
    allocate_shared_with(alloc, || value)
}

/// Construct an object with `init` inside a new control block
/// allocated with `alloc`.
///
/// The control block is allocated before `init` is called.
/// If `init` panics, the control block is freed before the panic
/// propagates. If the allocation fails, [`handle_alloc_error`] is called.
pub fn allocate_shared_with<T, A, F>(alloc: A, init: F) -> Shared<T>
    where A: Allocator + 'static, F: FnOnce() -> T
{
    match try_allocate_shared_with(alloc, || Ok::<_, Infallible>(init())) {
        Ok(shared) => shared,
        Err(ConstructError::Alloc(err)) => handle_alloc_error(err.layout),
        Err(ConstructError::Init(never)) => match never { },
    }
}

/// Fallible version of [`allocate_shared_with`].
///
/// Returns an error if the control block cannot be allocated,
/// or if `init` returns an error.
/// In the latter case the control block is freed again.
///
/// # Examples
///
/// ```
/// use refshare::{ConstructError, Global, try_allocate_shared_with};
///
/// let ok = try_allocate_shared_with(Global, || "7".parse::<u8>());
/// assert_eq!(*ok.unwrap(), 7);
///
/// let err = try_allocate_shared_with(Global, || "x".parse::<u8>());
/// assert!(matches!(err, Err(ConstructError::Init(_))));
/// ```
pub fn try_allocate_shared_with<T, A, E, F>(alloc: A, init: F)
    -> Result<Shared<T>, ConstructError<E>>
    where A: Allocator + 'static, F: FnOnce() -> Result<T, E>
{
    let (object, block) = InlineBlock::create(alloc, init)?;
    // SAFETY: The block was created with a strong count of one,
    //         and the object lives inside the block.
    Ok(unsafe { Shared::from_parts(object, block) })
}

/// Like [`make_shared`], and also link the object to its handle.
///
/// See [`SharedFromThis`].
pub fn make_shared_linked<T>(value: T) -> Shared<T>
    where T: SharedFromThis
{
    let shared = make_shared(value);
    shared.link_self_ref();
    shared
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::testutil::DropCounter,
        allocator_ext::{CountingAllocator, FailingAllocator},
        std::{
            mem::size_of,
            panic::{AssertUnwindSafe, catch_unwind},
        },
    };

    #[test]
    fn single_allocation()
    {
        let alloc = CountingAllocator::new();
        let shared = allocate_shared(alloc.clone(), [0u64; 8]);
        assert_eq!(alloc.allocations(), 1);
        assert!(alloc.live_bytes() >= size_of::<[u64; 8]>());
        assert_eq!(shared.len(), 8);
        drop(shared);
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn constructor_panic_frees_block()
    {
        let alloc = CountingAllocator::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            allocate_shared_with(alloc.clone(), || -> u32 { panic!("no") })
        }));
        assert!(result.is_err());
        assert_eq!(alloc.allocations(), 1);
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn constructor_error_frees_block()
    {
        let alloc = CountingAllocator::new();
        let result = try_allocate_shared_with(alloc.clone(), || Err::<u32, _>("bad"));
        let Err(ConstructError::Init(err)) = result
            else { panic!("construction succeeded") };
        assert_eq!(err, "bad");
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn allocation_failure_skips_constructor()
    {
        let counter = DropCounter::new();
        let result = try_allocate_shared_with(FailingAllocator, || {
            Ok::<_, Infallible>(counter.track())
        });
        assert!(matches!(result, Err(ConstructError::Alloc(_))));
        assert_eq!(counter.drops(), 0);
    }

    #[test]
    fn zero_sized_object()
    {
        let alloc = CountingAllocator::new();
        let unit = allocate_shared(alloc.clone(), ());
        let weak = unit.downgrade();
        assert_eq!(unit.use_count(), 1);
        drop(unit);
        assert!(weak.expired());
        drop(weak);
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn make_shared_with_defers_construction()
    {
        let counter = DropCounter::new();
        let shared = make_shared_with(|| counter.track());
        assert_eq!(shared.use_count(), 1);
        drop(shared);
        assert_eq!(counter.drops(), 1);
    }
}
