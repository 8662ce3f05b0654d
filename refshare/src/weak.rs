use {
    crate::{Shared, shared::Parts},
    std::{fmt, mem},
};

/// Handle that observes an object without keeping it alive.
///
/// A weak handle keeps the control block of the object allocated,
/// so it can always tell whether the object is still alive.
/// Use [`lock`][`Self::lock`] to obtain a [`Shared`] handle
/// for as long as it is.
///
/// # Examples
///
/// ```
/// use refshare::make_shared;
///
/// let a = make_shared(5);
/// let w = a.downgrade();
/// assert_eq!(*w.lock(), 5);
///
/// drop(a);
/// assert!(w.expired());
/// assert!(w.lock().is_empty());
/// ```
pub struct Weak<T>
    where T: ?Sized
{
    // INVARIANT: If present, this handle owns one unit of the weak count.
    // The pointer may dangle once the object has expired.
    inner: Option<Parts<T>>,
}

impl<T> Weak<T>
    where T: ?Sized
{
    /// Create an empty handle.
    ///
    /// An empty handle is always expired.
    pub const fn new() -> Self
    {
        Self{inner: None}
    }

    /// Whether the object has been destroyed.
    ///
    /// Returns true for an empty handle.
    pub fn expired(&self) -> bool
    {
        self.inner.map_or(true, |parts| parts.block.expired())
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

    /// Obtain a [`Shared`] handle to the object.
    ///
    /// Returns an empty handle if the object has expired.
    pub fn lock(&self) -> Shared<T>
    {
        match self.inner {
            Some(parts) if !parts.block.expired() => {
                // SAFETY: The object is alive, and the unit that is
                //         added is transferred to the new handle.
                unsafe {
                    parts.block.retain_shared();
                    Shared::from_parts(parts.ptr, parts.block)
                }
            },
            _ => Shared::empty(),
        }
    }

    /// Whether two handles point to the same address.
    ///
    /// Two empty handles are equal.
    pub fn ptr_eq<U>(&self, other: &Weak<U>) -> bool
        where U: ?Sized
    {
        let this = self.inner.map(|parts| parts.ptr.cast::<u8>());
        let other = other.inner.map(|parts| parts.ptr.cast::<u8>());
        this == other
    }

    /// Move out of the handle, leaving an empty handle behind.
    pub fn take(&mut self) -> Self
    {
        mem::take(self)
    }
}

impl<T> From<&Shared<T>> for Weak<T>
    where T: ?Sized
{
    fn from(shared: &Shared<T>) -> Self
    {
        let inner = shared.parts();
        if let Some(parts) = inner {
            parts.block.retain_weak();
        }
        Self{inner}
    }
}

impl<T> Clone for Weak<T>
    where T: ?Sized
{
    fn clone(&self) -> Self
    {
        if let Some(parts) = self.inner {
            parts.block.retain_weak();
        }
        Self{inner: self.inner}
    }

    fn clone_from(&mut self, source: &Self)
    {
        let same_block = self.inner.map(|parts| parts.block)
                      == source.inner.map(|parts| parts.block);
        if same_block {
            self.inner = source.inner;
        } else {
            *self = source.clone();
        }
    }
}

impl<T> Drop for Weak<T>
    where T: ?Sized
{
    fn drop(&mut self)
    {
        if let Some(parts) = self.inner.take() {
            // SAFETY: This handle owned one unit.
            unsafe { parts.block.release_weak(); }
        }
    }
}

impl<T> Default for Weak<T>
    where T: ?Sized
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl<T> fmt::Debug for Weak<T>
    where T: ?Sized
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        if self.expired() {
            f.write_str("(expired)")
        } else {
            f.debug_struct("Weak")
                .field("use_count", &self.use_count())
                .finish()
        }
    }
}
