// Copyright 2017-2018 the authors. See the 'Copyright and license' section of the
// README.md file at the top-level directory of this repository.
//
// Licensed under the Apache License, Version 2.0 (the LICENSE-APACHE file) or
// the MIT license (the LICENSE-MIT file) at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A lock-free intrusive MPMC queue.
//!
//! The queue consists of two atomic pointers, `head` and `tail`, and the
//! `Link` embedded in each node. A node's link is null when it is not in the
//! queue, points to its successor when it is in the queue but not last, and
//! holds the queue's *end marker* when it is the last node. Distinguishing
//! "last" from "unlinked" this way is what allows producers and consumers to
//! arbitrate over a node with a single compare-and-swap on its link.
//!
//! ## Appending
//!
//! An append atomically exchanges the new tail with the queue tail. It then
//! sets the link of the old tail to the head of the list being appended. If
//! the old tail is null the queue was empty, and the head of the appended list
//! is stored into the queue head instead.
//!
//! This means there is a window between the exchange and the old tail update
//! where the queue's list is split into two parts: the list from the head to
//! the old tail, and the list being appended. Concurrent appends may each
//! introduce another such segment, and each is resolved by its own update of
//! its old tail's link, in any order. `try_pop` therefore treats a node
//! differently depending on the value of its link.
//!
//! ## Node lifetime
//!
//! The queue never allocates or frees nodes; it only stores pointers to them.
//! See `push` for the exact contract callers must uphold.

use crate::link::{Intrusive, LinkAccess};
use crate::pop::{PopResult, PopStatus};
use crossbeam::utils::{Backoff, CachePadded};
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Source of end marker identities. Zero is never handed out.
static NEXT_QUEUE_ID: AtomicUsize = AtomicUsize::new(1);

/// Returns `true` if `p` is some queue's end marker.
#[inline(always)]
fn is_marker<T>(p: *mut T) -> bool {
    (p as usize) & 1 == 1
}

#[inline(always)]
fn spin_hint() {
    #[cfg(feature = "spin_hint")]
    ::std::hint::spin_loop();
}

/// A lock-free, intrusive, multi-producer multi-consumer FIFO queue.
///
/// `T` is the node type and `A` locates the `Link` inside a node (see the
/// `link` module). `push` and `append` never fail and never retry. `try_pop`
/// makes a single attempt which may lose a race with another thread, and
/// `pop` retries it until the queue is empty or a node is claimed.
///
/// Dropping a non-empty queue is a usage error; it is logged and, in debug
/// builds, fails an assertion.
pub struct NonblockingQueue<T, A = Intrusive> {
    head: CachePadded<AtomicPtr<T>>,
    tail: CachePadded<AtomicPtr<T>>,
    // Odd, so it can never equal a node address, and unique to this queue
    // so that a node cannot be mistaken for the last node of this queue while
    // it is actually the last node of another one.
    end: usize,
    _marker: PhantomData<(*const T, A)>,
}

unsafe impl<T: Send, A> Send for NonblockingQueue<T, A> {}
unsafe impl<T: Send, A> Sync for NonblockingQueue<T, A> {}

impl<T, A> Drop for NonblockingQueue<T, A> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        if !head.is_null() || !tail.is_null() {
            error!("dropping a non-empty queue: head={:p} tail={:p}", head, tail);
        }
        debug_assert!(head.is_null(), "queue must be empty when dropped");
        debug_assert!(tail.is_null(), "queue must be empty when dropped");
    }
}

impl<T, A: LinkAccess<T>> Default for NonblockingQueue<T, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A: LinkAccess<T>> NonblockingQueue<T, A> {
    pub fn new() -> Self {
        debug_assert!(mem::align_of::<T>() >= 2);
        let id = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);
        NonblockingQueue {
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            tail: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            end: (id << 1) | 1,
            _marker: PhantomData,
        }
    }

    #[inline(always)]
    fn end_marker(&self) -> *mut T {
        self.end as *mut T
    }

    /// Returns the current head, or the end marker if the queue is empty.
    ///
    /// Together with `is_end` and `next` this allows walking the queue
    /// without special-casing emptiness. Never returns null.
    pub fn first(&self) -> *mut T {
        let head = self.head.load(Ordering::Acquire);
        if head.is_null() {
            self.end_marker()
        } else {
            head
        }
    }

    /// Returns `true` if `entry` is this queue's end marker.
    #[inline]
    pub fn is_end(&self, entry: *const T) -> bool {
        entry as usize == self.end
    }

    /// Returns `true` if the queue was empty at the instant of the check.
    ///
    /// A concurrent `push` may complete immediately afterwards.
    pub fn empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Returns the value of `node`'s link.
    ///
    /// # Safety
    ///
    /// `node` must point to a live node.
    pub unsafe fn next(node: NonNull<T>) -> *mut T {
        A::link(node.as_ref()).load(Ordering::Acquire)
    }

    /// Counts the nodes reachable from the head.
    ///
    /// This is O(n) and intended for diagnostics only. If the queue is being
    /// mutated concurrently the result may be stale or simply wrong.
    pub fn length(&self) -> usize {
        self.iter().count()
    }

    /// Iterates over the nodes reachable from the head.
    ///
    /// Subject to the same caveats as `length`.
    pub fn iter(&self) -> Iter<T, A> {
        Iter {
            cur: self.first(),
            _marker: PhantomData,
        }
    }

    /// Pushes `node` onto the back of the queue.
    ///
    /// This is an `append` of a single-node list.
    ///
    /// # Safety
    ///
    /// - `node` must be unlinked (see `Link::is_unlinked`); in particular it
    ///   must not currently be in this or any other queue.
    /// - `node` must not be moved or deallocated until it has been removed from
    ///   the queue (by `try_pop`, `pop`, `take_all` or `drain`) *and* no other
    ///   thread can still be executing an operation on this queue that
    ///   observed it.
    /// - Pushing a removed node again while another thread may still be inside
    ///   `try_pop` holding a reference to it is an ABA hazard; callers that
    ///   recycle nodes must rule this out, e.g. with epoch-based reclamation.
    pub unsafe fn push(&self, node: NonNull<T>) {
        self.append(node, node)
    }

    /// Appends the list `first..=last` onto the back of the queue.
    ///
    /// The list must already be linked from `first` to `last` (see
    /// `Link::set_next`), and `last` must be unlinked. Afterwards the whole
    /// list is visible to consumers in order.
    ///
    /// # Safety
    ///
    /// Every node of the list is subject to the requirements of `push`, except
    /// that all nodes but `last` are linked to their successor.
    pub unsafe fn append(&self, first: NonNull<T>, last: NonNull<T>) {
        let old_tail = self.exchange_tail(last);
        self.link_or_install(first, old_tail)
    }

    /// First half of `append`: makes `last` the new end of the queue. Any
    /// further appends will extend after `last`.
    unsafe fn exchange_tail(&self, last: NonNull<T>) -> *mut T {
        let link = A::link(last.as_ref());
        debug_assert!(link.is_unlinked(), "appended list's last node is already linked");
        link.store(self.end_marker(), Ordering::Release);
        self.tail.swap(last.as_ptr(), Ordering::SeqCst)
    }

    /// Second half of `append`: connects `first` to the queue, either after
    /// `old_tail` or as the new head.
    unsafe fn link_or_install(&self, first: NonNull<T>, old_tail: *mut T) {
        if old_tail.is_null() {
            // The queue was empty, so head must be null as well. This relies
            // on consumers clearing head before tail when they take the last
            // node.
            debug_assert!(self.head.load(Ordering::Acquire).is_null());
        } else if self.is_end(A::link(&*old_tail).cas(self.end_marker(), first.as_ptr())) {
            // Extended the list from old_tail. No other append can have
            // competed for old_tail, and changing its link away from the end
            // marker beat any consumer trying to claim it. Head already
            // reaches the list, so we're done.
            return;
        } else {
            // A consumer claimed old_tail, so it is no longer in the list and
            // the queue is logically empty. Head is null or old_tail,
            // depending on how far that consumer has got.
            debug_assert!({
                let head = self.head.load(Ordering::Acquire);
                head.is_null() || head == old_tail
            });
        }
        // The queue was empty and first becomes the new head. Until this store
        // lands the queue appears empty to consumers.
        self.head.store(first.as_ptr(), Ordering::Release);
    }

    /// Makes a single attempt at removing the node at the front of the queue.
    ///
    /// Returns `Err(PopStatus::Empty)` if the queue was empty, or
    /// `Err(PopStatus::LostRace)` if a concurrent operation interfered and the
    /// attempt should be retried. On success the node's link has been reset
    /// and the node belongs to the caller again.
    pub fn try_pop(&self) -> PopResult<NonNull<T>> {
        let old_head = match NonNull::new(self.head.load(Ordering::Acquire)) {
            Some(head) => head,
            None => return Err(PopStatus::Empty),
        };
        let link = A::link(unsafe { old_head.as_ref() });
        let next_node = link.load(Ordering::Acquire);

        if !self.is_end(next_node) {
            // next_node is one of
            // (1) the successor of old_head in this queue,
            // (2) null, because a competing consumer took old_head as the last
            //     node,
            // (3) a node or marker of some other list, because a competing
            //     consumer took old_head and put it elsewhere.
            // Advancing head fails in case (3).
            if self
                .head
                .compare_exchange(old_head.as_ptr(), next_node, Ordering::SeqCst, Ordering::Relaxed)
                .is_err()
            {
                // Another consumer advanced head and claimed old_head.
                return Err(PopStatus::LostRace);
            }
            if next_node.is_null() {
                // The advance succeeded, but a competing consumer had already
                // claimed old_head by nulling its link. Setting head to null
                // helped that consumer; we report a lost race rather than an
                // empty queue.
                return Err(PopStatus::LostRace);
            }
            // Advanced past old_head and claimed it.
            link.store(ptr::null_mut(), Ordering::Release);
            Ok(old_head)
        } else if self.is_end(link.cas(next_node, ptr::null_mut())) {
            // old_head was the last node and we claimed it by nulling its link.
            // Head and tail may still point at it. Clear head first, then
            // tail; either may fail if a concurrent append (or a consumer
            // helping via a null advance) got there first. An append that
            // replaced tail will find old_head's link is no longer the end
            // marker and install its own list as the head.
            let _ = self.head.compare_exchange(
                old_head.as_ptr(),
                ptr::null_mut(),
                Ordering::SeqCst,
                Ordering::Relaxed,
            );
            let _ = self.tail.compare_exchange(
                old_head.as_ptr(),
                ptr::null_mut(),
                Ordering::SeqCst,
                Ordering::Relaxed,
            );
            Ok(old_head)
        } else {
            // old_head was the last node, but a competing consumer claimed it
            // or an append extended the list from it first.
            Err(PopStatus::LostRace)
        }
    }

    /// Removes the node at the front of the queue, retrying lost races.
    ///
    /// Returns `None` if the queue was observed empty. Retries are immediate;
    /// see `pop_with_backoff` for heavily contended queues.
    pub fn pop(&self) -> Option<NonNull<T>> {
        loop {
            return match self.try_pop() {
                Ok(node) => Some(node),
                Err(PopStatus::Empty) => None,
                Err(PopStatus::LostRace) => {
                    spin_hint();
                    continue;
                }
            };
        }
    }

    /// Like `pop`, but backs off after every lost race.
    pub fn pop_with_backoff(&self) -> Option<NonNull<T>> {
        let backoff = Backoff::new();
        loop {
            match self.try_pop() {
                Ok(node) => break Some(node),
                Err(PopStatus::Empty) => break None,
                Err(PopStatus::LostRace) => backoff.snooze(),
            }
        }
    }

    /// Detaches every node currently in the queue.
    ///
    /// Returns the first and last nodes of the detached list, or `None` if the
    /// queue was empty. The nodes remain linked to one another in FIFO order
    /// and the last node's link is null, so the list can be handed directly to
    /// another queue's `append`, or walked with `next` (resetting each link
    /// before reusing a node). `drain` does the walking.
    ///
    /// Nodes are claimed with the same compare-and-swap protocol `try_pop`
    /// uses, so no node can be returned both here and by a concurrent
    /// `try_pop`. Nodes appended while the call is in progress may or may not
    /// be included.
    pub fn take_all(&self) -> Option<(NonNull<T>, NonNull<T>)> {
        // Once head is null, consumers can only compete for `first`, and only
        // if it is the last node.
        let first = NonNull::new(self.head.swap(ptr::null_mut(), Ordering::SeqCst))?;
        let mut cur = first;
        let mut count = 1usize;
        loop {
            let link = A::link(unsafe { cur.as_ref() });
            let next = link.load(Ordering::Acquire);
            if self.is_end(next) {
                if self.is_end(link.cas(next, ptr::null_mut())) {
                    // Same order as try_pop: an append that already replaced
                    // tail will install its own list as the head.
                    let _ = self.tail.compare_exchange(
                        cur.as_ptr(),
                        ptr::null_mut(),
                        Ordering::SeqCst,
                        Ordering::Relaxed,
                    );
                    trace!("take_all: detached {} nodes", count);
                    return Some((first, cur));
                }
                // An append extended the list from cur, or a consumer claimed
                // it. Look again.
                continue;
            }
            if next.is_null() || is_marker(next) {
                // A consumer claimed `first` as the last node before we did.
                debug_assert_eq!(cur, first);
                return None;
            }
            cur = unsafe { NonNull::new_unchecked(next) };
            count += 1;
        }
    }

    /// Detaches every node currently in the queue and iterates over them in
    /// FIFO order.
    ///
    /// Each node's link is reset before it is yielded, so it may be pushed
    /// again right away. Dropping the iterator early unlinks the remaining
    /// nodes without yielding them.
    pub fn drain(&self) -> Drain<T, A> {
        Drain {
            next: self
                .take_all()
                .map_or(ptr::null_mut(), |(first, _)| first.as_ptr()),
            _marker: PhantomData,
        }
    }
}

impl<T, A> Debug for NonblockingQueue<T, A> {
    fn fmt(&self, f: &mut Formatter) -> ::std::fmt::Result {
        write!(
            f,
            "NonblockingQueue {{ head: {:p}, tail: {:p} }}",
            self.head.load(Ordering::SeqCst),
            self.tail.load(Ordering::SeqCst)
        )
    }
}

/// Iterator over the nodes of a queue. See `NonblockingQueue::iter`.
pub struct Iter<'a, T, A = Intrusive> {
    cur: *mut T,
    _marker: PhantomData<&'a NonblockingQueue<T, A>>,
}

impl<'a, T, A: LinkAccess<T>> Iterator for Iter<'a, T, A> {
    type Item = NonNull<T>;

    fn next(&mut self) -> Option<NonNull<T>> {
        // Stop at any end marker, not just ours: a node racing through
        // another queue may point at that queue's marker.
        if is_marker(self.cur) {
            return None;
        }
        let node = NonNull::new(self.cur)?;
        self.cur = A::link(unsafe { node.as_ref() }).load(Ordering::Acquire);
        Some(node)
    }
}

/// Iterator over a detached list. See `NonblockingQueue::drain`.
pub struct Drain<'a, T, A = Intrusive>
where
    A: LinkAccess<T>,
{
    next: *mut T,
    _marker: PhantomData<&'a NonblockingQueue<T, A>>,
}

impl<'a, T, A: LinkAccess<T>> Iterator for Drain<'a, T, A> {
    type Item = NonNull<T>;

    fn next(&mut self) -> Option<NonNull<T>> {
        let node = NonNull::new(self.next)?;
        let link = A::link(unsafe { node.as_ref() });
        self.next = link.load(Ordering::Acquire);
        link.store(ptr::null_mut(), Ordering::Release);
        Some(node)
    }
}

impl<'a, T, A: LinkAccess<T>> Drop for Drain<'a, T, A> {
    fn drop(&mut self) {
        for _ in self {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{Link, Linked};

    struct TestNode {
        link: Link<TestNode>,
        value: usize,
    }

    unsafe impl Linked for TestNode {
        fn link(&self) -> &Link<TestNode> {
            &self.link
        }
    }

    type Queue = NonblockingQueue<TestNode>;

    fn make_nodes(n: usize) -> Vec<TestNode> {
        (0..n)
            .map(|value| TestNode {
                link: Link::new(),
                value,
            })
            .collect()
    }

    fn ptr_to(node: &TestNode) -> NonNull<TestNode> {
        NonNull::from(node)
    }

    fn value_of(node: NonNull<TestNode>) -> usize {
        unsafe { node.as_ref().value }
    }

    fn pop_all(q: &Queue) -> Vec<usize> {
        let mut res = Vec::new();
        while let Some(node) = q.pop() {
            res.push(value_of(node));
        }
        res
    }

    #[test]
    fn new_queue_is_empty() {
        let q = Queue::new();
        assert!(q.empty());
        assert!(q.is_end(q.first()));
        assert_eq!(q.length(), 0);
        assert_eq!(q.try_pop(), Err(PopStatus::Empty));
        assert_eq!(q.pop(), None);
        assert!(q.take_all().is_none());
    }

    #[test]
    fn push_pop_fifo() {
        let nodes = make_nodes(3);
        let q = Queue::new();
        for n in &nodes {
            unsafe { q.push(ptr_to(n)) };
            assert!(!q.empty());
        }
        assert_eq!(q.pop().map(value_of), Some(0));
        assert_eq!(q.pop().map(value_of), Some(1));
        assert_eq!(q.pop().map(value_of), Some(2));
        assert!(q.empty());
        assert_eq!(q.pop(), None);
        assert!(nodes.iter().all(|n| n.link.is_unlinked()));
    }

    #[test]
    fn length_and_iteration_follow_push_order() {
        let nodes = make_nodes(64);
        let q = Queue::new();
        for n in &nodes {
            unsafe { q.push(ptr_to(n)) };
        }
        assert_eq!(q.length(), 64);
        let seen: Vec<usize> = q.iter().map(value_of).collect();
        assert_eq!(seen, (0..64).collect::<Vec<_>>());

        // the same walk by hand
        let mut cur = q.first();
        let mut count = 0;
        while !q.is_end(cur) {
            assert_eq!(value_of(NonNull::new(cur).unwrap()), count);
            cur = unsafe { Queue::next(NonNull::new_unchecked(cur)) };
            count += 1;
        }
        assert_eq!(count, 64);

        assert_eq!(pop_all(&q), (0..64).collect::<Vec<_>>());
        assert_eq!(q.length(), 0);
    }

    #[test]
    fn last_node_points_at_end_marker() {
        let nodes = make_nodes(2);
        let q = Queue::new();
        unsafe {
            q.push(ptr_to(&nodes[0]));
            q.push(ptr_to(&nodes[1]));
            assert_eq!(Queue::next(ptr_to(&nodes[0])), ptr_to(&nodes[1]).as_ptr());
            assert!(q.is_end(Queue::next(ptr_to(&nodes[1]))));
        }
        pop_all(&q);
    }

    #[test]
    fn end_markers_are_distinct() {
        let a = Queue::new();
        let b = Queue::new();
        assert!(!a.is_end(b.first()));
        assert!(!b.is_end(a.first()));
        assert!(!a.is_end(ptr::null()));

        // the last node of b is not mistaken for the last node of a
        let nodes = make_nodes(1);
        unsafe { b.push(ptr_to(&nodes[0])) };
        unsafe {
            let next = Queue::next(ptr_to(&nodes[0]));
            assert!(b.is_end(next));
            assert!(!a.is_end(next));
        }
        pop_all(&b);
    }

    #[test]
    fn append_sublist() {
        let nodes = make_nodes(6);
        let q = Queue::new();
        unsafe {
            q.push(ptr_to(&nodes[0]));
            for i in 1..5 {
                nodes[i].link.set_next(ptr_to(&nodes[i + 1]));
            }
            q.append(ptr_to(&nodes[1]), ptr_to(&nodes[5]));
        }
        assert_eq!(q.length(), 6);
        assert_eq!(pop_all(&q), (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn append_onto_empty_queue() {
        let nodes = make_nodes(3);
        let q = Queue::new();
        unsafe {
            nodes[0].link.set_next(ptr_to(&nodes[1]));
            nodes[1].link.set_next(ptr_to(&nodes[2]));
            q.append(ptr_to(&nodes[0]), ptr_to(&nodes[2]));
        }
        assert_eq!(pop_all(&q), vec![0, 1, 2]);
    }

    #[test]
    fn append_single_node_is_push() {
        let nodes = make_nodes(4);
        let q = Queue::new();
        unsafe {
            q.push(ptr_to(&nodes[0]));
            q.append(ptr_to(&nodes[1]), ptr_to(&nodes[1]));
            q.push(ptr_to(&nodes[2]));
            q.append(ptr_to(&nodes[3]), ptr_to(&nodes[3]));
        }
        assert_eq!(pop_all(&q), vec![0, 1, 2, 3]);
    }

    #[test]
    fn popped_node_can_be_pushed_again() {
        let nodes = make_nodes(2);
        let q = Queue::new();
        unsafe {
            q.push(ptr_to(&nodes[0]));
            q.push(ptr_to(&nodes[1]));
        }
        let first = q.pop().unwrap();
        assert!(nodes[0].link.is_unlinked());
        unsafe { q.push(first) };
        assert_eq!(pop_all(&q), vec![1, 0]);
    }

    #[test]
    fn take_all_detaches_list() {
        let nodes = make_nodes(5);
        let q = Queue::new();
        for n in &nodes {
            unsafe { q.push(ptr_to(n)) };
        }
        let (first, last) = q.take_all().unwrap();
        assert!(q.empty());
        assert!(q.take_all().is_none());
        assert_eq!(value_of(first), 0);
        assert_eq!(value_of(last), 4);
        assert!(nodes[4].link.is_unlinked());

        // the detached list can be appended elsewhere as-is
        let other = Queue::new();
        unsafe { other.append(first, last) };
        assert_eq!(pop_all(&other), (0..5).collect::<Vec<_>>());
    }

    #[test]
    fn take_all_single_node() {
        let nodes = make_nodes(1);
        let q = Queue::new();
        unsafe { q.push(ptr_to(&nodes[0])) };
        let (first, last) = q.take_all().unwrap();
        assert_eq!(first, last);
        assert!(nodes[0].link.is_unlinked());
        assert!(q.empty());
        // tail was reset, so a fresh push installs a new head
        unsafe { q.push(first) };
        assert_eq!(pop_all(&q), vec![0]);
    }

    #[test]
    fn drain_unlinks_in_order() {
        let nodes = make_nodes(8);
        let q = Queue::new();
        for n in &nodes {
            unsafe { q.push(ptr_to(n)) };
        }
        let drained: Vec<usize> = q.drain().map(value_of).collect();
        assert_eq!(drained, (0..8).collect::<Vec<_>>());
        assert!(q.empty());
        assert!(nodes.iter().all(|n| n.link.is_unlinked()));
    }

    #[test]
    fn dropped_drain_unlinks_the_rest() {
        let nodes = make_nodes(8);
        let q = Queue::new();
        for n in &nodes {
            unsafe { q.push(ptr_to(n)) };
        }
        {
            let mut drain = q.drain();
            assert_eq!(drain.next().map(value_of), Some(0));
        }
        assert!(q.empty());
        assert!(nodes.iter().all(|n| n.link.is_unlinked()));
    }

    // The following tests stop an append between its tail exchange and its
    // link update in order to drive consumers through each race.

    #[test]
    fn consumer_claims_old_tail_during_append() {
        let nodes = make_nodes(2);
        let q = Queue::new();
        unsafe {
            q.push(ptr_to(&nodes[0]));
            let old_tail = q.exchange_tail(ptr_to(&nodes[1]));
            assert_eq!(old_tail, ptr_to(&nodes[0]).as_ptr());

            // node 0 still looks like the last node, so the consumer claims it;
            // tail has moved on and is left alone
            assert_eq!(q.try_pop().map(value_of), Ok(0));
            assert!(q.empty());

            // the append then finds node 0 claimed and installs node 1 as head
            q.link_or_install(ptr_to(&nodes[1]), old_tail);
        }
        assert!(!q.empty());
        assert_eq!(pop_all(&q), vec![1]);
    }

    #[test]
    fn append_links_before_consumer_arrives() {
        let nodes = make_nodes(2);
        let q = Queue::new();
        unsafe {
            q.push(ptr_to(&nodes[0]));
            let old_tail = q.exchange_tail(ptr_to(&nodes[1]));
            q.link_or_install(ptr_to(&nodes[1]), old_tail);
        }
        assert_eq!(pop_all(&q), vec![0, 1]);
    }

    #[test]
    fn helping_advance_reports_lost_race() {
        let nodes = make_nodes(1);
        let q = Queue::new();
        unsafe { q.push(ptr_to(&nodes[0])) };
        let node = ptr_to(&nodes[0]).as_ptr();

        // another consumer claims the last node but has not yet cleared head
        // or tail
        assert!(q.is_end(nodes[0].link.cas(q.end_marker(), ptr::null_mut())));

        // this consumer advances head to null on its behalf but gets nothing
        assert_eq!(q.try_pop(), Err(PopStatus::LostRace));
        assert!(q.empty());
        assert_eq!(q.try_pop(), Err(PopStatus::Empty));

        // the other consumer finishes
        assert!(q
            .head
            .compare_exchange(node, ptr::null_mut(), Ordering::SeqCst, Ordering::Relaxed)
            .is_err());
        assert!(q
            .tail
            .compare_exchange(node, ptr::null_mut(), Ordering::SeqCst, Ordering::Relaxed)
            .is_ok());
    }

    #[test]
    fn take_all_during_append() {
        let nodes = make_nodes(2);
        let q = Queue::new();
        unsafe {
            q.push(ptr_to(&nodes[0]));
            let old_tail = q.exchange_tail(ptr_to(&nodes[1]));

            let (first, last) = q.take_all().unwrap();
            assert_eq!((value_of(first), value_of(last)), (0, 0));
            assert!(nodes[0].link.is_unlinked());

            q.link_or_install(ptr_to(&nodes[1]), old_tail);
        }
        assert_eq!(pop_all(&q), vec![1]);
    }

    #[test]
    fn take_all_follows_completed_append() {
        let nodes = make_nodes(3);
        let q = Queue::new();
        unsafe {
            q.push(ptr_to(&nodes[0]));
            q.push(ptr_to(&nodes[1]));
            let old_tail = q.exchange_tail(ptr_to(&nodes[2]));
            q.link_or_install(ptr_to(&nodes[2]), old_tail);
        }
        let drained: Vec<usize> = q.drain().map(value_of).collect();
        assert_eq!(drained, vec![0, 1, 2]);
        assert!(q.tail.load(Ordering::SeqCst).is_null());
    }

    #[test]
    fn pop_with_backoff_drains() {
        let nodes = make_nodes(4);
        let q = Queue::new();
        for n in &nodes {
            unsafe { q.push(ptr_to(n)) };
        }
        let mut res = Vec::new();
        while let Some(node) = q.pop_with_backoff() {
            res.push(value_of(node));
        }
        assert_eq!(res, vec![0, 1, 2, 3]);
    }

    #[test]
    fn node_in_two_queues_through_two_links() {
        struct Job {
            ready: Link<Job>,
            retired: Link<Job>,
            id: usize,
        }
        link_accessor!(ReadyLink, Job, ready);
        link_accessor!(RetiredLink, Job, retired);

        let jobs: Vec<Job> = (0..3)
            .map(|id| Job {
                ready: Link::new(),
                retired: Link::new(),
                id,
            })
            .collect();
        let ready = NonblockingQueue::<Job, ReadyLink>::new();
        let retired = NonblockingQueue::<Job, RetiredLink>::new();
        for job in &jobs {
            unsafe {
                ready.push(NonNull::from(job));
                retired.push(NonNull::from(job));
            }
        }
        let id = |j: NonNull<Job>| unsafe { j.as_ref().id };
        assert_eq!(ready.pop().map(id), Some(0));
        assert_eq!(retired.length(), 3);
        assert_eq!(retired.drain().map(id).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(ready.drain().map(id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn debug_shows_head_and_tail() {
        let q = Queue::new();
        assert!(format!("{:?}", q).starts_with("NonblockingQueue { head: "));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "queue must be empty when dropped")]
    fn drop_non_empty_is_flagged() {
        let nodes = make_nodes(1);
        let q = Queue::new();
        unsafe { q.push(ptr_to(&nodes[0])) };
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "already linked")]
    fn append_linked_node_is_flagged() {
        let nodes = make_nodes(2);
        let q = Queue::new();
        unsafe {
            nodes[0].link.set_next(ptr_to(&nodes[1]));
            q.push(ptr_to(&nodes[0]));
        }
    }
}
