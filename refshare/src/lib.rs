//! Reference-counted shared ownership with pluggable policies.
//!
//! A [`Shared`] handle owns one unit of a *strong* count
//! and keeps the managed object alive.
//! A [`Weak`] handle owns one unit of a *weak* count;
//! it keeps only the bookkeeping alive and can be upgraded
//! to a [`Shared`] handle for as long as the object is alive.
//!
//! # Control blocks
//!
//! Every managed object has exactly one control block,
//! created together with the first [`Shared`] handle.
//! The control block stores both counts and knows how to
//! destroy the object and how to free its own memory.
//! There are two kinds of control blocks:
//!
//!  - *Regular* blocks are allocated separately from the object.
//!    They are created by [`Shared::from_box`] and friends,
//!    and destroy the object with a [`Deleter`].
//!  - *Inline* blocks store the object inside the block itself,
//!    so only one allocation is needed.
//!    They are created by [`make_shared`] and friends.
//!
//! When the strong count drops to zero, the object is destroyed.
//! When both counts are zero, the control block is freed.
//! Both happen exactly once, in whichever order the handles go away.
//!
//! # Threads
//!
//! Counts are not atomic; handles are neither [`Send`] nor [`Sync`].
//!
//! # Misuse
//!
//! Creating two independent [`Shared`] handles from the same raw pointer
//! (with [`Shared::from_raw_in`]) gives the object two control blocks.
//! Both will destroy the object, which is undefined behavior.
//! This is why the raw pointer constructors are `unsafe`.

#![warn(missing_docs)]

pub use self::{
    error::*,
    make::*,
    policy::*,
    self_ref::*,
    shared::*,
    weak::*,
};

mod block;
mod error;
mod make;
mod policy;
mod self_ref;
mod shared;
mod weak;

#[cfg(test)]
mod testutil;
