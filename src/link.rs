// Copyright 2017-2018 the authors. See the 'Copyright and license' section of the
// README.md file at the top-level directory of this repository.
//
// Licensed under the Apache License, Version 2.0 (the LICENSE-APACHE file) or
// the MIT license (the LICENSE-MIT file) at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The intrusive "next" slot and the ways a queue can locate it.
//!
//! A `NonblockingQueue` never wraps the values it holds. Instead, every node
//! embeds a `Link` which the queue uses as the node's next pointer. The queue
//! is generic over a `LinkAccess` implementation which, given a node, returns a
//! reference to that embedded `Link`. Two ways of providing one are given:
//!
//! - Implement `Linked` for the node type and use the default `Intrusive`
//!   accessor. This covers the common case of a type with a single link.
//! - Use `link_accessor!` to declare an accessor type for a named field. This
//!   allows one node type to be a member of several queues at once, one per
//!   `Link` field.

use std::fmt::{Debug, Formatter};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

/// The next-pointer slot embedded in every queue node.
///
/// A `Link` holds one of three kinds of value:
///
/// - null: the node is not linked into any queue.
/// - a pointer to another node: the node is in a queue (or a detached list)
///   and is followed by that node.
/// - a queue's end marker: the node is the last one in that queue.
///
/// End markers are odd integers and are never dereferenced. Because a `Link`
/// contains an `AtomicPtr`, any type embedding one has an alignment of at
/// least two, so real node pointers are always even.
pub struct Link<T> {
    next: AtomicPtr<T>,
}

impl<T> Link<T> {
    /// Creates a new, unlinked `Link`.
    pub const fn new() -> Link<T> {
        Link {
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Returns `true` if the owning node is not currently linked anywhere.
    ///
    /// A node must be unlinked before it is handed to `push`, or before it is
    /// used as the `last` argument to `append`.
    pub fn is_unlinked(&self) -> bool {
        self.next.load(Ordering::Acquire).is_null()
    }

    /// Makes `next` the successor of the owning node.
    ///
    /// This is how a caller assembles the sublist passed to `append`. It is a
    /// plain store and provides no synchronization of its own; `append`
    /// publishes the whole sublist.
    ///
    /// # Safety
    ///
    /// The owning node must not currently be reachable from any queue, and
    /// `next` must point to a live node.
    pub unsafe fn set_next(&self, next: NonNull<T>) {
        self.next.store(next.as_ptr(), Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn load(&self, ord: Ordering) -> *mut T {
        self.next.load(ord)
    }

    #[inline(always)]
    pub(crate) fn store(&self, next: *mut T, ord: Ordering) {
        self.next.store(next, ord)
    }

    /// Compare-and-swap on the slot, returning the value observed.
    #[inline(always)]
    pub(crate) fn cas(&self, current: *mut T, new: *mut T) -> *mut T {
        match self
            .next
            .compare_exchange(current, new, Ordering::SeqCst, Ordering::Acquire)
        {
            Ok(prev) | Err(prev) => prev,
        }
    }
}

impl<T> Default for Link<T> {
    fn default() -> Link<T> {
        Link::new()
    }
}

impl<T> Debug for Link<T> {
    fn fmt(&self, f: &mut Formatter) -> ::std::fmt::Result {
        write!(f, "Link({:p})", self.next.load(Ordering::Relaxed))
    }
}

/// Types that embed a single `Link` to themselves.
///
/// # Safety
///
/// `link` must return a reference to a `Link` stored inside `self`, and it
/// must return the same `Link` every time it is called on the same node for
/// the whole lifetime of that node. The slot must not be written by anything
/// other than the queue while the node is linked.
pub unsafe trait Linked: Sized {
    fn link(&self) -> &Link<Self>;
}

/// A statically-dispatched accessor for the `Link` of a `T`.
///
/// This is the capability a `NonblockingQueue` is parameterized over. The
/// implementing type is usually a zero-sized marker; it is never
/// instantiated.
///
/// # Safety
///
/// The same requirements as `Linked::link` apply to `LinkAccess::link`: the
/// returned `Link` lives inside `node` and is the same for the node's whole
/// lifetime.
pub unsafe trait LinkAccess<T> {
    fn link(node: &T) -> &Link<T>;
}

/// The default accessor, for types implementing `Linked`.
#[derive(Copy, Clone, Debug, Default)]
pub struct Intrusive;

unsafe impl<T: Linked> LinkAccess<T> for Intrusive {
    #[inline(always)]
    fn link(node: &T) -> &Link<T> {
        node.link()
    }
}

/// Declares a `LinkAccess` type which reads a named `Link` field.
///
/// ```rust
/// # #[macro_use] extern crate nbqueue;
/// use nbqueue::{Link, NonblockingQueue};
///
/// struct Job {
///     ready: Link<Job>,
///     retired: Link<Job>,
/// }
///
/// link_accessor!(pub ReadyLink, Job, ready);
/// link_accessor!(pub RetiredLink, Job, retired);
///
/// # fn main() {
/// let ready = NonblockingQueue::<Job, ReadyLink>::new();
/// let retired = NonblockingQueue::<Job, RetiredLink>::new();
/// # assert!(ready.empty() && retired.empty());
/// # }
/// ```
#[macro_export]
macro_rules! link_accessor {
    ($(#[$attr:meta])* $vis:vis $name:ident, $node:ty, $field:ident) => {
        $(#[$attr])*
        #[derive(Copy, Clone, Debug, Default)]
        $vis struct $name;

        unsafe impl $crate::LinkAccess<$node> for $name {
            #[inline(always)]
            fn link(node: &$node) -> &$crate::Link<$node> {
                &node.$field
            }
        }
    };
}
