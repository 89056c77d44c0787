// Copyright 2017-2018 the authors. See the 'Copyright and license' section of the
// README.md file at the top-level directory of this repository.
//
// Licensed under the Apache License, Version 2.0 (the LICENSE-APACHE file) or
// the MIT license (the LICENSE-MIT file) at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Producer/consumer throughput benchmark for `NonblockingQueue`.
//!
//! Configuration is read from the environment:
//!
//! - `NBQ_BENCH_THREADS`: number of producer/consumer pairs (default: half the
//!   number of CPUs, at least one).
//! - `NBQ_BENCH_OPS`: nodes pushed by each producer (default: 1,000,000).
//!
//! Set `RUST_LOG=info` to see per-workload progress.

#[macro_use]
extern crate log;

use nbqueue::{Link, Linked, NonblockingQueue, PopStatus};
use std::env;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time;

struct BenchNode {
    link: Link<BenchNode>,
    _payload: usize,
}

unsafe impl Linked for BenchNode {
    fn link(&self) -> &Link<BenchNode> {
        &self.link
    }
}

struct WorkloadStats {
    nthreads: usize,
    total_ops: usize,
    time_nsecs: u64,
    description: String,
    lost_races: usize,
    empty_pops: usize,
}

impl WorkloadStats {
    pub fn print(&self) {
        println!(
            "{}: {} threads, {} Mops/s {} lost races {} empty pops",
            self.description,
            self.nthreads,
            (self.total_ops as f64) / ((self.time_nsecs >> 10) as f64),
            self.lost_races,
            self.empty_pops
        );
    }
}

fn since_then(i: time::Instant) -> u64 {
    let dur = i.elapsed();
    (dur.as_secs() * 1_000_000_000) + (dur.subsec_nanos() as u64)
}

fn env_usize(var: &str, default: usize) -> usize {
    match env::var(var) {
        Ok(val) => val.parse().unwrap_or_else(|_| {
            warn!("ignoring invalid {}={:?}", var, val);
            default
        }),
        Err(_) => default,
    }
}

/// `npairs` producers each push `per_thread` distinct nodes while `npairs`
/// consumers pop until every node has been claimed. Consumers either use
/// `try_pop` or `pop_with_backoff`.
fn producers_consumers(
    npairs: usize,
    per_thread: usize,
    backoff: bool,
    description: String,
) -> WorkloadStats {
    let total = npairs * per_thread;
    let nodes: Arc<Vec<BenchNode>> = Arc::new(
        (0..total)
            .map(|i| BenchNode {
                link: Link::new(),
                _payload: i,
            })
            .collect(),
    );
    let q = Arc::new(NonblockingQueue::<BenchNode>::new());
    let remaining = Arc::new(AtomicUsize::new(total));
    let barrier = Arc::new(Barrier::new(npairs * 2 + 1));
    let mut threads = Vec::new();

    for tnum in 0..npairs {
        let (qt, lbar, nodest) = (q.clone(), barrier.clone(), nodes.clone());
        threads.push(thread::spawn(move || {
            lbar.wait();
            let start = time::Instant::now();
            for node in &nodest[tnum * per_thread..(tnum + 1) * per_thread] {
                unsafe { qt.push(NonNull::from(node)) };
            }
            (0, 0, since_then(start))
        }));
    }

    for _ in 0..npairs {
        let (qt, lbar, remt) = (q.clone(), barrier.clone(), remaining.clone());
        threads.push(thread::spawn(move || {
            let mut lost_races = 0;
            let mut empty_pops = 0;
            lbar.wait();
            let start = time::Instant::now();
            while remt.load(Ordering::Relaxed) > 0 {
                if backoff {
                    match qt.pop_with_backoff() {
                        Some(_) => {
                            remt.fetch_sub(1, Ordering::Relaxed);
                        }
                        None => empty_pops += 1,
                    }
                } else {
                    match qt.try_pop() {
                        Ok(_) => {
                            remt.fetch_sub(1, Ordering::Relaxed);
                        }
                        Err(PopStatus::Empty) => empty_pops += 1,
                        Err(PopStatus::LostRace) => lost_races += 1,
                    }
                }
            }
            (lost_races, empty_pops, since_then(start))
        }));
    }

    barrier.wait();
    let mut res = WorkloadStats {
        nthreads: npairs * 2,
        total_ops: total * 2,
        time_nsecs: 0,
        description: description,
        lost_races: 0,
        empty_pops: 0,
    };
    let mut total_nsecs = 0;
    for t in threads {
        match t.join() {
            Ok((lost, empty, nsecs)) => {
                res.lost_races += lost;
                res.empty_pops += empty;
                total_nsecs += nsecs;
            }
            Err(_) => error!("benchmark thread panicked"),
        }
    }
    debug_assert!(q.empty());
    res.time_nsecs = total_nsecs / (res.nthreads as u64);
    res
}

/// Pushes `per_thread` nodes from `nthreads` threads and drains them all with
/// a single `take_all`.
fn push_then_take_all(nthreads: usize, per_thread: usize, description: String) -> WorkloadStats {
    let total = nthreads * per_thread;
    let nodes: Arc<Vec<BenchNode>> = Arc::new(
        (0..total)
            .map(|i| BenchNode {
                link: Link::new(),
                _payload: i,
            })
            .collect(),
    );
    let q = Arc::new(NonblockingQueue::<BenchNode>::new());
    let barrier = Arc::new(Barrier::new(nthreads + 1));
    let threads: Vec<_> = (0..nthreads)
        .map(|tnum| {
            let (qt, lbar, nodest) = (q.clone(), barrier.clone(), nodes.clone());
            thread::spawn(move || {
                lbar.wait();
                for node in &nodest[tnum * per_thread..(tnum + 1) * per_thread] {
                    unsafe { qt.push(NonNull::from(node)) };
                }
            })
        })
        .collect();
    let start = time::Instant::now();
    barrier.wait();
    for t in threads {
        if t.join().is_err() {
            error!("benchmark thread panicked");
        }
    }
    let drained = q.drain().count();
    let nsecs = since_then(start);
    info!("drained {} of {} nodes", drained, total);
    WorkloadStats {
        nthreads: nthreads,
        total_ops: total + drained,
        time_nsecs: nsecs,
        description: description,
        lost_races: 0,
        empty_pops: 0,
    }
}

fn main() {
    let _ = env_logger::try_init();
    let npairs = env_usize("NBQ_BENCH_THREADS", (num_cpus::get() / 2).max(1)).max(1);
    let per_thread = env_usize("NBQ_BENCH_OPS", 1_000_000);
    info!("{} pairs, {} nodes per producer", npairs, per_thread);

    for &n in &[1, npairs] {
        producers_consumers(n, per_thread, false, String::from("try_pop")).print();
        producers_consumers(n, per_thread, true, String::from("pop_with_backoff")).print();
        push_then_take_all(n, per_thread, String::from("push+take_all")).print();
    }
}
