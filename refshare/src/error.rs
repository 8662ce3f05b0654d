use {std::alloc::Layout, thiserror::Error};

/// Returned when a control block could not be allocated.
#[derive(Clone, Copy, Debug, Error)]
#[error("Cannot allocate a control block with layout {layout:?}")]
pub struct AllocFailed
{
    /// Layout of the control block that was requested.
    pub layout: Layout,
}

impl AllocFailed
{
    pub (crate) fn of<B>() -> Self
    {
        Self{layout: Layout::new::<B>()}
    }
}

/// Returned when an object could not be constructed
/// inside its control block.
///
/// See [`try_allocate_shared_with`][`crate::try_allocate_shared_with`].
#[derive(Debug, Error)]
pub enum ConstructError<E>
{
    /// The control block could not be allocated.
    #[error("{0}")]
    Alloc(#[from] AllocFailed),

    /// The initializer of the object returned an error.
    #[error("Cannot construct the managed object: {0}")]
    Init(E),
}
