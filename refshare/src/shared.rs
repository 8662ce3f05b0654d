use {
    crate::{
        AllocFailed,
        DefaultAlloc,
        DefaultDelete,
        Deleter,
        Weak,
        block::{BlockRef, RegularBlock},
    },
    allocator_api2::alloc::Allocator,
    std::{
        alloc::handle_alloc_error,
        fmt,
        marker::PhantomData,
        mem,
        ops::Deref,
        ptr::NonNull,
    },
};

/* -------------------------------------------------------------------------- */
/*                                    Parts                                   */
/* -------------------------------------------------------------------------- */

/// The pointer to an object together with its control block.
///
/// This is what both kinds of handle store.
/// Whether it owns a strong or a weak unit depends on the handle.
pub (crate) struct Parts<T>
    where T: ?Sized
{
    pub ptr: NonNull<T>,
    pub block: BlockRef,
}

impl<T> Clone for Parts<T>
    where T: ?Sized
{
    fn clone(&self) -> Self
    {
        *self
    }
}

impl<T> Copy for Parts<T>
    where T: ?Sized
{
}

/* -------------------------------------------------------------------------- */
/*                                   Shared                                   */
/* -------------------------------------------------------------------------- */

/// Reference-counted handle that keeps an object alive.
///
/// A handle is either empty or points to an object and its control block.
/// Cloning a handle adds one to the strong count of the object;
/// dropping it subtracts one. When the count reaches zero,
/// the object is destroyed using the destruction policy it was created with.
///
/// Assigning to a handle drops the previous value as usual,
/// so assignment releases whatever the handle owned before.
/// [`take`][`Self::take`] moves out of a handle, leaving it empty.
///
/// # Examples
///
/// ```
/// use refshare::{Shared, make_shared};
///
/// let a = make_shared(String::from("hello"));
/// let b = a.clone();
/// assert_eq!(a.use_count(), 2);
/// assert_eq!(*b, "hello");
///
/// drop(a);
/// assert_eq!(b.use_count(), 1);
/// ```
pub struct Shared<T>
    where T: ?Sized
{
    // INVARIANT: If present, this handle owns one unit of the strong count.
    inner: Option<Parts<T>>,

    // Dropping a handle may drop a T.
    _owns: PhantomData<T>,
}

impl<T> Shared<T>
    where T: ?Sized
{
    /// Create an empty handle.
    pub const fn empty() -> Self
    {
        Self{inner: None, _owns: PhantomData}
    }

    /// Take shared ownership of a boxed object.
    ///
    /// The object will be dropped with [`DefaultDelete`],
    /// and the control block is allocated with [`DefaultAlloc`].
    /// Objects that implement [`SharedFromThis`][`crate::SharedFromThis`]
    /// are linked by [`from_box_linked`][`Self::from_box_linked`],
    /// and every other constructor has a `_linked` form too.
    pub fn from_box(object: Box<T>) -> Self
    {
        let ptr = NonNull::from(Box::leak(object));
        // SAFETY: The pointer came from Box, which DefaultDelete expects.
        unsafe { Self::from_raw_in(ptr, DefaultDelete, DefaultAlloc::default()) }
    }

    /// Like [`from_box`][`Self::from_box`], but return an error
    /// if the control block cannot be allocated.
    ///
    /// The object is dropped in that case.
    pub fn try_from_box(object: Box<T>) -> Result<Self, AllocFailed>
    {
        let ptr = NonNull::from(Box::leak(object));
        // SAFETY: The pointer came from Box, which DefaultDelete expects.
        unsafe { Self::try_from_raw_in(ptr, DefaultDelete, DefaultAlloc::default()) }
    }

    /// Take shared ownership of an object with a custom deleter.
    ///
    /// The control block is allocated with [`DefaultAlloc`].
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live object that nothing else owns,
    /// and it must be valid to call `deleter` on it
    /// once all handles to it are gone.
    /// No other handle may have been created from the same pointer
    /// with a raw pointer constructor.
    pub unsafe fn from_raw_with<D>(ptr: NonNull<T>, deleter: D) -> Self
        where D: Deleter<T> + 'static
    {
        Self::from_raw_in(ptr, deleter, DefaultAlloc::default())
    }

    /// Take shared ownership of an object with a custom deleter,
    /// allocating the control block with `alloc`.
    ///
    /// The allocator is used only for the control block;
    /// how the object was allocated is up to the deleter.
    /// If the control block cannot be allocated, the deleter is
    /// applied to the object and [`handle_alloc_error`] is called.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live object that nothing else owns,
    /// and it must be valid to call `deleter` on it
    /// once all handles to it are gone.
    /// In particular, no other handle may have been created
    /// from the same pointer with a raw pointer constructor.
    pub unsafe fn from_raw_in<D, A>(ptr: NonNull<T>, deleter: D, alloc: A)
        -> Self
        where D: Deleter<T> + 'static, A: Allocator + 'static
    {
        Self::try_from_raw_in(ptr, deleter, alloc)
            .unwrap_or_else(|err| handle_alloc_error(err.layout))
    }

    /// Like [`from_raw_in`][`Self::from_raw_in`], but return an error
    /// if the control block cannot be allocated.
    ///
    /// The deleter is applied to the object in that case.
    pub unsafe fn try_from_raw_in<D, A>(ptr: NonNull<T>, deleter: D, alloc: A)
        -> Result<Self, AllocFailed>
        where D: Deleter<T> + 'static, A: Allocator + 'static
    {
        match RegularBlock::create(ptr, deleter, alloc) {
            Ok(block) => Ok(Self::from_parts(ptr, block)),
            Err((deleter, err)) => {
                deleter.delete(ptr);
                Err(err)
            },
        }
    }

    /// Create a handle from an object and its control block.
    ///
    /// # Safety
    ///
    /// The strong count of the block must already include
    /// the unit that is transferred to the new handle,
    /// and `ptr` must remain valid while the object is alive.
    pub (crate) unsafe fn from_parts(ptr: NonNull<T>, block: BlockRef) -> Self
    {
        Self{inner: Some(Parts{ptr, block}), _owns: PhantomData}
    }

    pub (crate) fn parts(&self) -> Option<Parts<T>>
    {
        self.inner
    }

    /// Whether the handle is empty.
    pub fn is_empty(&self) -> bool
    {
        self.inner.is_none()
    }

    /// The number of [`Shared`] handles to the object.
    ///
    /// Returns zero for an empty handle.
    pub fn use_count(&self) -> usize
    {
        self.inner.map_or(0, |parts| parts.block.shared_count())
    }

    /// The number of [`Weak`] handles to the object.
    ///
    /// Returns zero for an empty handle.
    pub fn weak_count(&self) -> usize
    {
        self.inner.map_or(0, |parts| parts.block.weak_count())
    }

    /// Borrow the object, or return [`None`] for an empty handle.
    pub fn get(&self) -> Option<&T>
    {
        // SAFETY: This handle keeps the object alive.
        self.inner.map(|parts| unsafe { &*parts.ptr.as_ptr() })
    }

    /// The pointer to the object, or [`None`] for an empty handle.
    pub fn as_ptr(&self) -> Option<NonNull<T>>
    {
        self.inner.map(|parts| parts.ptr)
    }

    /// Whether two handles point to the same address.
    ///
    /// Two empty handles are equal.
    pub fn ptr_eq<U>(&self, other: &Shared<U>) -> bool
        where U: ?Sized
    {
        let this = self.as_ptr().map(NonNull::cast::<u8>);
        let other = other.as_ptr().map(NonNull::cast::<u8>);
        this == other
    }

    /// Create a [`Weak`] handle to the object.
    ///
    /// Returns an empty handle for an empty handle.
    pub fn downgrade(&self) -> Weak<T>
    {
        Weak::from(self)
    }

    /// Release the object and make the handle empty.
    pub fn reset(&mut self)
    {
        drop(self.take());
    }

    /// Move out of the handle, leaving an empty handle behind.
    ///
    /// The strong count does not change.
    pub fn take(&mut self) -> Self
    {
        mem::take(self)
    }

    /// Exchange the objects of two handles.
    ///
    /// The strong counts do not change.
    pub fn swap(&mut self, other: &mut Self)
    {
        mem::swap(self, other);
    }

    /// Create a handle to a part of the object.
    ///
    /// The new handle shares the control block with this handle,
    /// so it keeps the whole object alive, but dereferences to
    /// what `f` returns. This is also how handles are converted
    /// to handles of trait objects. The closure infers `U` from
    /// what it returns, so unsizing needs a cast in the closure.
    ///
    /// The object must not borrow anything, because the new handle
    /// does not mention its type and could outlive those borrows.
    ///
    /// # Examples
    ///
    /// ```
    /// use {refshare::{Shared, make_shared}, std::fmt::Display};
    ///
    /// let pair = make_shared((1, String::from("one")));
    /// let name = pair.clone().project(|pair| &pair.1);
    /// let shown: Shared<dyn Display> =
    ///     pair.project(|pair| &pair.0 as &dyn Display);
    /// assert_eq!(*name, "one");
    /// assert_eq!(shown.to_string(), "1");
    /// assert_eq!(name.use_count(), 2);
    /// ```
    ///
    /// Objects that borrow are rejected:
    ///
    /// ```compile_fail
    /// use refshare::{Shared, make_shared};
    ///
    /// struct Reader<'a>(&'a [u8], u8);
    ///
    /// fn escape() -> Shared<u8>
    /// {
    ///     let local = [0xAA; 64];
    ///     make_shared(Reader(&local, 1)).project(|reader| &reader.1)
    /// }
    /// ```
    pub fn project<U, F>(mut self, f: F) -> Shared<U>
        where T: 'static, U: ?Sized, F: FnOnce(&T) -> &U
    {
        let Some(parts) = self.inner
            else { return Shared::empty() };

        // SAFETY: This handle keeps the object alive.
        let target = NonNull::from(f(unsafe { &*parts.ptr.as_ptr() }));

        // Transfer the unit of this handle to the new handle.
        self.inner = None;
        // SAFETY: The unit was transferred, and the target
        //         is part of the object so lives as long.
        unsafe { Shared::from_parts(target, parts.block) }
    }

    /// Replace the object with a new boxed object.
    ///
    /// The current object is released first.
    /// Like [`from_box`][`Self::from_box`], this uses the default policies.
    /// To use other policies, assign a newly created handle instead.
    /// See [`reset_to_linked`][`Self::reset_to_linked`]
    /// for objects that hand out handles to themselves.
    pub fn reset_to(&mut self, object: Box<T>)
    {
        self.reset();
        *self = Self::from_box(object);
    }
}

impl<T> Clone for Shared<T>
    where T: ?Sized
{
    fn clone(&self) -> Self
    {
        if let Some(parts) = self.inner {
            // SAFETY: This handle keeps the object alive.
            unsafe { parts.block.retain_shared(); }
        }
        Self{inner: self.inner, _owns: PhantomData}
    }

    fn clone_from(&mut self, source: &Self)
    {
        let same_block = self.inner.map(|parts| parts.block)
                      == source.inner.map(|parts| parts.block);
        if same_block {
            // Both handles already own a unit of the same block.
            self.inner = source.inner;
        } else {
            *self = source.clone();
        }
    }
}

impl<T> Drop for Shared<T>
    where T: ?Sized
{
    fn drop(&mut self)
    {
        if let Some(parts) = self.inner.take() {
            // SAFETY: This handle owned one unit.
            unsafe { parts.block.release_shared(); }
        }
    }
}

impl<T> Default for Shared<T>
    where T: ?Sized
{
    fn default() -> Self
    {
        Self::empty()
    }
}

impl<T> Deref for Shared<T>
    where T: ?Sized
{
    type Target = T;

    /// Borrow the object.
    ///
    /// # Panics
    ///
    /// Panics if the handle is empty.
    /// Use [`get`][`Shared::get`] to handle that case.
    fn deref(&self) -> &T
    {
        self.get().expect("Dereferenced an empty Shared handle")
    }
}

impl<T> From<Box<T>> for Shared<T>
    where T: ?Sized
{
    fn from(object: Box<T>) -> Self
    {
        Self::from_box(object)
    }
}

impl<T> fmt::Debug for Shared<T>
    where T: fmt::Debug + ?Sized
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self.get() {
            Some(object) => fmt::Debug::fmt(object, f),
            None => f.write_str("(empty)"),
        }
    }
}
