//! Control blocks.
//!
//! A control block begins with a [`BlockHeader`],
//! which holds the counts and a pointer to a [`BlockVtable`].
//! The vtable knows the concrete type of the block,
//! so handles only ever deal with [`BlockRef`]s.
//! The concrete block types are `repr(C)` with the header first,
//! so a pointer to the block is also a pointer to the header.
//!
//! The handles call [`BlockRef::release_shared`] and
//! [`BlockRef::release_weak`] when they give up their unit of count.
//! These two methods implement the release protocol:
//! destroy the object when the strong count reaches zero,
//! and free the block when both counts are zero.

use {
    crate::{AllocFailed, ConstructError, Deleter},
    allocator_api2::alloc::Allocator,
    allocator_ext::AllocatorExt,
    log::{debug, trace},
    scope_exit::{ScopeExit, scope_exit},
    std::{
        any::type_name,
        cell::Cell,
        mem::{ManuallyDrop, MaybeUninit},
        process::abort,
        ptr::{self, NonNull, addr_of, addr_of_mut},
    },
};

/* -------------------------------------------------------------------------- */
/*                                   Header                                   */
/* -------------------------------------------------------------------------- */

/// Data at the start of each control block.
pub (crate) struct BlockHeader
{
    /// Number of [`Shared`][`crate::Shared`] handles.
    shared: Cell<usize>,

    /// Number of [`Weak`][`crate::Weak`] handles,
    /// plus one while the object is being destroyed.
    weak: Cell<usize>,

    vtable: &'static BlockVtable,
}

/// Operations that depend on the concrete type of the block.
pub (crate) struct BlockVtable
{
    /// Short description of the kind of block, for logging.
    kind: &'static str,

    /// Destroy the managed object.
    ///
    /// Called exactly once, when the strong count reaches zero.
    run_destruction: unsafe fn(NonNull<BlockHeader>),

    /// Free the memory of the block.
    ///
    /// Called exactly once, after [`run_destruction`],
    /// when both counts are zero.
    ///
    /// [`run_destruction`]: `Self::run_destruction`
    release_block: unsafe fn(NonNull<BlockHeader>),
}

impl BlockHeader
{
    /// Header for a block that is owned by one new [`Shared`] handle.
    ///
    /// [`Shared`]: `crate::Shared`
    fn new(vtable: &'static BlockVtable) -> Self
    {
        Self{shared: Cell::new(1), weak: Cell::new(0), vtable}
    }
}

/* -------------------------------------------------------------------------- */
/*                                  BlockRef                                  */
/* -------------------------------------------------------------------------- */

/// Pointer to a live control block.
#[derive(Clone, Copy, Eq, PartialEq)]
pub (crate) struct BlockRef
{
    // INVARIANT: The block is allocated and its header is initialized.
    ptr: NonNull<BlockHeader>,
}

impl BlockRef
{
    fn header(&self) -> &BlockHeader
    {
        // SAFETY: The block is allocated while a handle points to it.
        unsafe { self.ptr.as_ref() }
    }

    /// The address of the block, for diagnostics.
    pub fn addr(self) -> *const ()
    {
        self.ptr.as_ptr().cast_const().cast()
    }

    /// The number of [`Shared`] handles.
    ///
    /// [`Shared`]: `crate::Shared`
    pub fn shared_count(self) -> usize
    {
        self.header().shared.get()
    }

    /// The number of [`Weak`] handles.
    ///
    /// While the object is being destroyed, this is one more
    /// than the number of handles (see [`Self::release_shared`]).
    ///
    /// [`Weak`]: `crate::Weak`
    pub fn weak_count(self) -> usize
    {
        self.header().weak.get()
    }

    /// Whether the managed object has been destroyed
    /// or is being destroyed.
    pub fn expired(self) -> bool
    {
        self.shared_count() == 0
    }

    /// Add one unit to the strong count.
    ///
    /// # Safety
    ///
    /// The object must be alive, i.e. the strong count must not be zero.
    pub unsafe fn retain_shared(self)
    {
        increment(&self.header().shared);
    }

    /// Add one unit to the weak count.
    pub fn retain_weak(self)
    {
        increment(&self.header().weak);
    }

    /// Give up one unit of the strong count.
    ///
    /// If this was the last unit, the object is destroyed.
    /// If there are also no weak units left, the block is freed.
    ///
    /// While the object is destroyed, an extra weak unit is held.
    /// Weak handles that are dropped by the destructor of the object
    /// can therefore never free the block from under this method.
    /// If the destructor panics, the extra unit is still given up.
    ///
    /// # Safety
    ///
    /// The caller must own one unit of the strong count,
    /// and must not use the block after this call.
    pub unsafe fn release_shared(self)
    {
        let header = self.header();
        let shared = header.shared.get() - 1;
        header.shared.set(shared);

        if shared != 0 {
            return;
        }

        let vtable = header.vtable;
        trace!("Destroying object in {} block {:p}", vtable.kind, self.addr());

        self.retain_weak();
        scope_exit! { self.release_weak(); }
        (vtable.run_destruction)(self.ptr);
    }

    /// Give up one unit of the weak count.
    ///
    /// If there are no units left at all, the block is freed.
    ///
    /// # Safety
    ///
    /// The caller must own one unit of the weak count,
    /// and must not use the block after this call.
    pub unsafe fn release_weak(self)
    {
        let header = self.header();
        let weak = header.weak.get() - 1;
        header.weak.set(weak);

        if weak == 0 && header.shared.get() == 0 {
            let vtable = header.vtable;
            trace!("Releasing {} block {:p}", vtable.kind, self.addr());
            (vtable.release_block)(self.ptr);
        }
    }
}

/// Increment a count, aborting on overflow.
///
/// Overflow is only possible if handles are leaked,
/// but continuing after it would free live objects.
fn increment(count: &Cell<usize>)
{
    match count.get().checked_add(1) {
        Some(new) => count.set(new),
        None => abort(),
    }
}

/* -------------------------------------------------------------------------- */
/*                                RegularBlock                                */
/* -------------------------------------------------------------------------- */

/// Control block for an object that was allocated on its own.
#[repr(C)]
pub (crate) struct RegularBlock<T, D, A>
    where T: ?Sized
{
    header: BlockHeader,
    object: NonNull<T>,

    // Taken out by run_destruction.
    deleter: ManuallyDrop<D>,

    alloc: A,
}

impl<T, D, A> RegularBlock<T, D, A>
    where T: ?Sized, D: Deleter<T>, A: Allocator
{
    const VTABLE: BlockVtable = BlockVtable{
        kind: "regular",
        run_destruction: Self::run_destruction,
        release_block: Self::release_block,
    };

    /// Allocate a control block for `object`.
    ///
    /// The block itself is allocated with `alloc`.
    /// On failure, the deleter is handed back so that
    /// the caller can decide what happens to the object.
    pub fn create(object: NonNull<T>, deleter: D, alloc: A)
        -> Result<BlockRef, (D, AllocFailed)>
    {
        let this = match alloc.allocate_for::<Self>() {
            Ok(this) => this,
            Err(_) => {
                debug!("Cannot allocate regular block for {}", type_name::<T>());
                return Err((deleter, AllocFailed::of::<Self>()));
            },
        };

        let header = BlockHeader::new(&Self::VTABLE);
        let deleter = ManuallyDrop::new(deleter);
        // SAFETY: this points to fresh memory that is suitably aligned.
        unsafe { ptr::write(this.as_ptr(), Self{header, object, deleter, alloc}); }

        trace!("Created regular block {:p} for {}", this, type_name::<T>());
        Ok(BlockRef{ptr: this.cast()})
    }

    unsafe fn run_destruction(header: NonNull<BlockHeader>)
    {
        let this = header.cast::<Self>().as_ptr();
        let object = (*this).object;
        let deleter = ManuallyDrop::take(&mut (*this).deleter);
        deleter.delete(object);
    }

    unsafe fn release_block(header: NonNull<BlockHeader>)
    {
        let this = header.cast::<Self>();
        // The allocator lives in the memory it is about to free.
        let alloc = ptr::read(addr_of!((*this.as_ptr()).alloc));
        alloc.deallocate_for(this);
    }
}

/* -------------------------------------------------------------------------- */
/*                                 InlineBlock                                */
/* -------------------------------------------------------------------------- */

/// Control block that stores the object inline.
#[repr(C)]
pub (crate) struct InlineBlock<T, A>
{
    header: BlockHeader,
    alloc: A,

    // Initialized after the header and the allocator,
    // and dropped before the block is freed.
    object: MaybeUninit<T>,
}

impl<T, A> InlineBlock<T, A>
    where A: Allocator
{
    const VTABLE: BlockVtable = BlockVtable{
        kind: "inline",
        run_destruction: Self::run_destruction,
        release_block: Self::release_block,
    };

    /// Allocate a control block and construct the object inside of it.
    ///
    /// If `init` fails or panics, the block is freed again.
    /// On success, returns a pointer to the object and its block.
    pub fn create<E, F>(alloc: A, init: F)
        -> Result<(NonNull<T>, BlockRef), ConstructError<E>>
        where F: FnOnce() -> Result<T, E>
    {
        let this = match alloc.allocate_for::<Self>() {
            Ok(this) => this,
            Err(_) => {
                debug!("Cannot allocate inline block for {}", type_name::<T>());
                return Err(AllocFailed::of::<Self>().into());
            },
        };

        let raw = this.as_ptr();
        // SAFETY: raw points to fresh memory that is suitably aligned.
        unsafe {
            ptr::write(addr_of_mut!((*raw).header), BlockHeader::new(&Self::VTABLE));
            ptr::write(addr_of_mut!((*raw).alloc), alloc);
        }

        // The object does not exist yet, so only the block is freed.
        // SAFETY: Nothing else refers to the block yet.
        let guard = ScopeExit::new(|| unsafe { Self::release_block(this.cast()) });
        let value = init().map_err(ConstructError::Init)?;
        guard.dismiss();

        // SAFETY: The block is allocated and the object slot is unused.
        let object = unsafe {
            let object = addr_of_mut!((*raw).object).cast::<T>();
            ptr::write(object, value);
            NonNull::new_unchecked(object)
        };

        trace!("Created inline block {:p} for {}", this, type_name::<T>());
        Ok((object, BlockRef{ptr: this.cast()}))
    }

    unsafe fn run_destruction(header: NonNull<BlockHeader>)
    {
        // The memory of the object is freed together with the block.
        let this = header.cast::<Self>().as_ptr();
        let object = addr_of_mut!((*this).object).cast::<T>();
        ptr::drop_in_place(object);
    }

    unsafe fn release_block(header: NonNull<BlockHeader>)
    {
        let this = header.cast::<Self>();
        // The allocator lives in the memory it is about to free.
        let alloc = ptr::read(addr_of!((*this.as_ptr()).alloc));
        alloc.deallocate_for(this);
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{DefaultDelete, testutil::DropCounter},
        allocator_api2::alloc::Global,
        allocator_ext::{CountingAllocator, FailingAllocator},
        std::{
            alloc::Layout,
            convert::Infallible,
            mem::size_of,
            panic::{AssertUnwindSafe, catch_unwind},
        },
    };

    fn regular(counter: &DropCounter, alloc: CountingAllocator) -> BlockRef
    {
        let object = NonNull::from(Box::leak(Box::new(counter.track())));
        RegularBlock::create(object, DefaultDelete, alloc)
            .unwrap_or_else(|_| panic!("allocation failed"))
    }

    #[test]
    fn inline_object_follows_header()
    {
        let (object, block) =
            InlineBlock::<u8, Global>::create(Global, || Ok::<_, Infallible>(7))
                .unwrap();
        let offset = object.as_ptr() as usize - block.addr() as usize;
        assert!(offset >= size_of::<BlockHeader>());
        assert_eq!(unsafe { *object.as_ptr() }, 7);
        unsafe { block.release_shared(); }
    }

    #[test]
    fn strong_then_weak()
    {
        let counter = DropCounter::new();
        let alloc = CountingAllocator::new();
        let block = regular(&counter, alloc.clone());
        assert_eq!((block.shared_count(), block.weak_count()), (1, 0));

        block.retain_weak();
        unsafe { block.release_shared(); }
        assert_eq!(counter.drops(), 1);
        assert!(block.expired());
        assert_eq!(alloc.live(), 1);

        unsafe { block.release_weak(); }
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn weak_then_strong()
    {
        let counter = DropCounter::new();
        let alloc = CountingAllocator::new();
        let block = regular(&counter, alloc.clone());

        block.retain_weak();
        unsafe { block.release_weak(); }
        assert_eq!(counter.drops(), 0);
        assert_eq!(alloc.live(), 1);

        unsafe { block.release_shared(); }
        assert_eq!(counter.drops(), 1);
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn regular_allocation_failure_returns_deleter()
    {
        let mut object = 5;
        let result = RegularBlock::create(NonNull::from(&mut object), DefaultDelete, FailingAllocator);
        let Err((_deleter, err)) = result
            else { panic!("allocation succeeded") };
        type Block = RegularBlock<i32, DefaultDelete, FailingAllocator>;
        assert_eq!(err.layout, Layout::new::<Block>());
    }

    #[test]
    fn inline_init_error_frees_block()
    {
        let alloc = CountingAllocator::new();
        let result = InlineBlock::<u32, _>::create(alloc.clone(), || Err("nope"));
        assert!(matches!(result, Err(ConstructError::Init("nope"))));
        assert_eq!(alloc.allocations(), 1);
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn inline_init_panic_frees_block()
    {
        let alloc = CountingAllocator::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            InlineBlock::<u32, _>::create(alloc.clone(), || -> Result<u32, Infallible> {
                panic!("constructor failed")
            })
        }));
        assert!(result.is_err());
        assert_eq!(alloc.allocations(), 1);
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn panicking_deleter_still_frees_block()
    {
        let alloc = CountingAllocator::new();
        let mut object = 0u8;
        let deleter = |_: NonNull<u8>| panic!("deleter failed");
        let block = RegularBlock::create(NonNull::from(&mut object), deleter, alloc.clone())
            .unwrap_or_else(|_| panic!("allocation failed"));

        let result = catch_unwind(AssertUnwindSafe(|| unsafe { block.release_shared() }));
        assert!(result.is_err());
        assert_eq!(alloc.live(), 0);
    }
}
