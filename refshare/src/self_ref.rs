//! Objects that can create handles to themselves.
//!
//! An object that wants to hand out handles to itself
//! stores a [`SelfRef`] and implements [`SharedFromThis`].
//! The [`SelfRef`] holds a [`Weak`] handle back to the object;
//! it never keeps the object alive.
//! It is filled in when the object is *linked* to its first handle,
//! which the `*_linked` constructors and [`Shared::link_self_ref`] do.

use {
    crate::{AllocFailed, Allocator, Deleter, Shared, Weak},
    std::{cell::OnceCell, fmt, ptr::NonNull},
};

/// Weak back-reference from an object to itself.
///
/// Cloning a [`SelfRef`] gives an unlinked one,
/// since the clone is part of a different object.
pub struct SelfRef<T>
    where T: ?Sized
{
    weak: OnceCell<Weak<T>>,
}

impl<T> SelfRef<T>
    where T: ?Sized
{
    /// Create an unlinked back-reference.
    pub const fn new() -> Self
    {
        Self{weak: OnceCell::new()}
    }

    /// Whether the back-reference was linked to a handle.
    pub fn is_linked(&self) -> bool
    {
        self.weak.get().is_some()
    }

    /// Obtain a [`Shared`] handle to the object.
    ///
    /// Returns an empty handle if the back-reference was never linked.
    pub fn lock(&self) -> Shared<T>
    {
        self.weak.get().map(Weak::lock).unwrap_or_default()
    }

    /// Obtain a [`Weak`] handle to the object.
    ///
    /// Returns an empty handle if the back-reference was never linked.
    pub fn weak(&self) -> Weak<T>
    {
        self.weak.get().cloned().unwrap_or_default()
    }

    /// Link the back-reference to `shared`, unless it is already linked.
    fn link(&self, shared: &Shared<T>)
    {
        if !self.is_linked() {
            let _ = self.weak.set(shared.downgrade());
        }
    }
}

impl<T> Clone for SelfRef<T>
    where T: ?Sized
{
    fn clone(&self) -> Self
    {
        Self::new()
    }
}

impl<T> Default for SelfRef<T>
    where T: ?Sized
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl<T> fmt::Debug for SelfRef<T>
    where T: ?Sized
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        f.debug_struct("SelfRef")
            .field("linked", &self.is_linked())
            .finish()
    }
}

/// Objects that can create handles to themselves.
///
/// # Examples
///
/// ```
/// use refshare::{SelfRef, Shared, SharedFromThis};
///
/// struct Node
/// {
///     self_ref: SelfRef<Node>,
/// }
///
/// impl SharedFromThis for Node
/// {
///     fn self_ref(&self) -> &SelfRef<Self>
///     {
///         &self.self_ref
///     }
/// }
///
/// let a = Shared::from_box_linked(Box::new(Node{self_ref: SelfRef::new()}));
/// let b = a.shared_from_this();
/// assert_eq!(b.use_count(), 2);
/// ```
pub trait SharedFromThis
{
    /// The back-reference stored in the object.
    fn self_ref(&self) -> &SelfRef<Self>;

    /// Obtain a [`Shared`] handle to this object.
    ///
    /// Returns an empty handle if the object was never linked
    /// or is being destroyed.
    fn shared_from_this(&self) -> Shared<Self>
    {
        self.self_ref().lock()
    }

    /// Obtain a [`Weak`] handle to this object.
    ///
    /// Returns an empty handle if the object was never linked.
    fn weak_from_this(&self) -> Weak<Self>
    {
        self.self_ref().weak()
    }
}

impl<T> Shared<T>
    where T: SharedFromThis + ?Sized
{
    /// Link the object to this handle, unless it is already linked.
    ///
    /// Afterwards, [`SharedFromThis::shared_from_this`]
    /// returns handles that share ownership with this one.
    pub fn link_self_ref(&self)
    {
        if let Some(object) = self.get() {
            object.self_ref().link(self);
        }
    }

    /// Like [`from_box`][`Self::from_box`], and also link the object.
    pub fn from_box_linked(object: Box<T>) -> Self
    {
        let shared = Self::from_box(object);
        shared.link_self_ref();
        shared
    }

    /// Like [`try_from_box`][`Self::try_from_box`],
    /// and also link the object.
    pub fn try_from_box_linked(object: Box<T>) -> Result<Self, AllocFailed>
    {
        let shared = Self::try_from_box(object)?;
        shared.link_self_ref();
        Ok(shared)
    }

    /// Like [`from_raw_with`][`Self::from_raw_with`],
    /// and also link the object.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw_with`][`Self::from_raw_with`].
    pub unsafe fn from_raw_with_linked<D>(ptr: NonNull<T>, deleter: D) -> Self
        where D: Deleter<T> + 'static
    {
        let shared = Self::from_raw_with(ptr, deleter);
        shared.link_self_ref();
        shared
    }

    /// Like [`from_raw_in`][`Self::from_raw_in`],
    /// and also link the object.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw_in`][`Self::from_raw_in`].
    pub unsafe fn from_raw_in_linked<D, A>(ptr: NonNull<T>, deleter: D, alloc: A)
        -> Self
        where D: Deleter<T> + 'static, A: Allocator + 'static
    {
        let shared = Self::from_raw_in(ptr, deleter, alloc);
        shared.link_self_ref();
        shared
    }

    /// Like [`try_from_raw_in`][`Self::try_from_raw_in`],
    /// and also link the object.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw_in`][`Self::from_raw_in`].
    pub unsafe fn try_from_raw_in_linked<D, A>(
        ptr: NonNull<T>,
        deleter: D,
        alloc: A,
    ) -> Result<Self, AllocFailed>
        where D: Deleter<T> + 'static, A: Allocator + 'static
    {
        let shared = Self::try_from_raw_in(ptr, deleter, alloc)?;
        shared.link_self_ref();
        Ok(shared)
    }

    /// Like [`reset_to`][`Self::reset_to`], and also link the new object.
    pub fn reset_to_linked(&mut self, object: Box<T>)
    {
        self.reset_to(object);
        self.link_self_ref();
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{DefaultDelete, make_shared, make_shared_linked, testutil::{DropCounter, Tracked}},
        allocator_ext::{CountingAllocator, FailingAllocator},
    };

    struct Node
    {
        self_ref: SelfRef<Node>,
        _tracked: Tracked,
    }

    impl Node
    {
        fn new(counter: &DropCounter) -> Self
        {
            Self{self_ref: SelfRef::new(), _tracked: counter.track()}
        }
    }

    impl SharedFromThis for Node
    {
        fn self_ref(&self) -> &SelfRef<Self>
        {
            &self.self_ref
        }
    }

    #[test]
    fn shared_from_this_shares_ownership()
    {
        let counter = DropCounter::new();
        let a = Shared::from_box_linked(Box::new(Node::new(&counter)));
        let b = a.shared_from_this();
        assert_eq!(b.use_count(), 2);
        assert!(b.ptr_eq(&a));

        drop(a);
        assert_eq!(counter.drops(), 0);
        drop(b);
        assert_eq!(counter.drops(), 1);
    }

    #[test]
    fn colocated_linked()
    {
        let counter = DropCounter::new();
        let a = make_shared_linked(Node::new(&counter));
        assert_eq!(a.weak_from_this().use_count(), 1);
        assert_eq!(a.weak_count(), 1);
        drop(a);
        assert_eq!(counter.drops(), 1);
    }

    #[test]
    fn unlinked_gives_empty()
    {
        let counter = DropCounter::new();
        let node = Node::new(&counter);
        assert!(node.shared_from_this().is_empty());
        assert!(node.weak_from_this().expired());

        let a = make_shared(Node::new(&counter));
        assert!(a.shared_from_this().is_empty());
    }

    #[test]
    fn link_only_once()
    {
        let counter = DropCounter::new();
        let a = make_shared_linked(Node::new(&counter));
        let b = a.clone();
        b.link_self_ref();
        assert_eq!(a.weak_count(), 1);
        assert!(a.self_ref().is_linked());
    }

    #[test]
    fn clone_is_unlinked()
    {
        let self_ref = SelfRef::<u8>::new();
        let shared = make_shared(1u8);
        self_ref.link(&shared);
        assert!(self_ref.is_linked());
        assert!(!self_ref.clone().is_linked());
    }

    #[test]
    fn shared_from_this_during_destruction()
    {
        use std::{cell::Cell, rc::Rc};

        struct Probe
        {
            self_ref: SelfRef<Probe>,
            seen_empty: Rc<Cell<bool>>,
        }

        impl SharedFromThis for Probe
        {
            fn self_ref(&self) -> &SelfRef<Self>
            {
                &self.self_ref
            }
        }

        impl Drop for Probe
        {
            fn drop(&mut self)
            {
                self.seen_empty.set(self.shared_from_this().is_empty());
            }
        }

        let seen_empty = Rc::new(Cell::new(false));
        let probe = Probe{self_ref: SelfRef::new(), seen_empty: seen_empty.clone()};
        drop(Shared::from_box_linked(Box::new(probe)));
        assert!(seen_empty.get());
    }

    #[test]
    fn from_box_linked_shares_ownership()
    {
        let counter = DropCounter::new();
        let a = Shared::from_box_linked(Box::new(Node::new(&counter)));
        assert_eq!(a.shared_from_this().use_count(), 2);
        assert_eq!(a.use_count(), 1);
    }

    #[test]
    fn raw_linked_with_custom_policy()
    {
        let counter = DropCounter::new();
        let deletes = DropCounter::new();
        let alloc = CountingAllocator::new();

        let ptr = NonNull::from(Box::leak(Box::new(Node::new(&counter))));
        let deleted = deletes.clone();
        let deleter = move |ptr: NonNull<Node>| {
            let _tracked = deleted.track();
            // SAFETY: The pointer came from Box.
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
        };
        // SAFETY: The pointer came from Box and is owned by nothing else.
        let a = unsafe { Shared::from_raw_in_linked(ptr, deleter, alloc.clone()) };

        let b = a.shared_from_this();
        assert_eq!(b.use_count(), 2);
        assert!(b.ptr_eq(&a));
        assert_eq!(alloc.live(), 1);

        drop(a);
        drop(b);
        assert_eq!(counter.drops(), 1);
        assert_eq!(deletes.drops(), 1);
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn raw_with_linked()
    {
        let counter = DropCounter::new();
        let ptr = NonNull::from(Box::leak(Box::new(Node::new(&counter))));
        // SAFETY: The pointer came from Box and is owned by nothing else.
        let a = unsafe { Shared::from_raw_with_linked(ptr, DefaultDelete) };
        assert_eq!(a.shared_from_this().use_count(), 2);
        drop(a);
        assert_eq!(counter.drops(), 1);
    }

    #[test]
    fn try_raw_linked_failure_applies_deleter()
    {
        let counter = DropCounter::new();
        let ptr = NonNull::from(Box::leak(Box::new(Node::new(&counter))));
        // SAFETY: The pointer came from Box and is owned by nothing else.
        let result = unsafe {
            Shared::try_from_raw_in_linked(ptr, DefaultDelete, FailingAllocator)
        };
        assert!(result.is_err());
        assert_eq!(counter.drops(), 1);

        let linked = Shared::try_from_box_linked(Box::new(Node::new(&counter)));
        let Ok(linked) = linked
            else { panic!("allocation failed") };
        assert_eq!(linked.shared_from_this().use_count(), 2);
    }

    #[test]
    fn reset_to_linked_links_new_object()
    {
        let counter = DropCounter::new();
        let mut a = make_shared_linked(Node::new(&counter));
        a.reset_to_linked(Box::new(Node::new(&counter)));
        assert_eq!(counter.drops(), 1);
        assert_eq!(a.shared_from_this().use_count(), 2);

        let mut empty = Shared::<Node>::empty();
        empty.reset_to_linked(Box::new(Node::new(&counter)));
        assert!(empty.self_ref().is_linked());
    }
}
