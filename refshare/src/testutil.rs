//! Helpers shared by the tests of this crate.

use std::{cell::Cell, rc::Rc};

/// Counts how many [`Tracked`] values were dropped.
#[derive(Clone, Default)]
pub struct DropCounter
{
    drops: Rc<Cell<usize>>,
}

impl DropCounter
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Create a value that reports to this counter when dropped.
    pub fn track(&self) -> Tracked
    {
        Tracked{counter: self.clone()}
    }

    pub fn drops(&self) -> usize
    {
        self.drops.get()
    }
}

/// Value that increments its [`DropCounter`] when dropped.
pub struct Tracked
{
    counter: DropCounter,
}

impl Drop for Tracked
{
    fn drop(&mut self)
    {
        let drops = &self.counter.drops;
        drops.set(drops.get() + 1);
    }
}
