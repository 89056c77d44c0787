// Copyright 2017-2018 the authors. See the 'Copyright and license' section of the
// README.md file at the top-level directory of this repository.
//
// Licensed under the Apache License, Version 2.0 (the LICENSE-APACHE file) or
// the MIT license (the LICENSE-MIT file) at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A lock-free, intrusive, multi-producer multi-consumer FIFO queue.
//!
//! `NonblockingQueue` links caller-owned nodes through a `Link` field
//! embedded in each node. The queue itself never allocates: pushing a node
//! costs an exchange and (usually) one compare-and-swap, and popping costs one
//! or two compare-and-swaps. It is intended as a building block for free
//! lists, work queues and similar structures inside other subsystems.
//!
//! # Example
//!
//! ```rust
//! use nbqueue::{Link, Linked, NonblockingQueue};
//! use std::ptr::NonNull;
//!
//! struct Block {
//!     link: Link<Block>,
//!     size: usize,
//! }
//!
//! unsafe impl Linked for Block {
//!     fn link(&self) -> &Link<Block> {
//!         &self.link
//!     }
//! }
//!
//! let blocks = [
//!     Block { link: Link::new(), size: 16 },
//!     Block { link: Link::new(), size: 32 },
//! ];
//! let free_list = NonblockingQueue::<Block>::new();
//! for b in &blocks {
//!     // blocks outlive the queue and are not in any other queue
//!     unsafe { free_list.push(NonNull::from(b)) };
//! }
//! let first = free_list.pop().unwrap();
//! assert_eq!(unsafe { first.as_ref().size }, 16);
//! assert_eq!(free_list.drain().count(), 1);
//! ```
//!
//! # Guarantees
//!
//! `push` and `append` complete in a bounded number of steps. `try_pop`
//! also completes in a bounded number of steps, but may report a lost race
//! when it executes concurrently with other operations; `pop` retries in that
//! case and is lock-free. Nodes fully linked into the queue are returned in
//! FIFO order, and every node is returned exactly once across all of
//! `try_pop`, `pop`, `take_all` and `drain`.
//!
//! `empty`, `length` and `iter` are snapshots that may be stale by the time
//! they return; `length` and `iter` in particular are meant for diagnostics.

#[macro_use]
extern crate log;

#[macro_use]
pub mod link;
pub mod pop;
pub mod queue;


pub use link::{Intrusive, Link, LinkAccess, Linked};
pub use pop::{PopResult, PopStatus};
pub use queue::{Drain, Iter, NonblockingQueue};
