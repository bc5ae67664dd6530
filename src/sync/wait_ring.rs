//! Registry of parked consumer threads with an "unpark all" broadcast
//!
//! Consumers register before re-checking their wake-up condition and park
//! afterwards; producers broadcast to every registered thread on each
//! completion or eviction event. `std::thread::park` keeps a wake-up token,
//! so an unpark that lands between registration and parking is not lost.
//! Every waiter is woken; pulse removal is CAS-guarded, so only one of them
//! does real work per event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, Thread};
use std::time::Duration;

use crossbeam_skiplist::SkipMap;

/// Lock-free set of parked threads
#[derive(Debug, Default)]
pub struct LockFreeWaitRing {
    waiters: SkipMap<u64, Thread>,
    next_token: AtomicU64,
    park_count: AtomicU64,
    unpark_count: AtomicU64,
}

impl LockFreeWaitRing {
    /// Create an empty ring
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the calling thread as a waiter
    ///
    /// The registration lasts until the returned guard is dropped.
    pub fn register(&self) -> WaitRegistration<'_> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.waiters.insert(token, thread::current());
        WaitRegistration { ring: self, token }
    }

    /// Wake every registered thread
    pub fn unpark_all(&self) {
        for entry in self.waiters.iter() {
            entry.value().unpark();
            self.unpark_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of currently registered threads
    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }

    /// Get wait statistics
    pub fn stats(&self) -> WaitStats {
        WaitStats {
            park_count: self.park_count.load(Ordering::Relaxed),
            unpark_count: self.unpark_count.load(Ordering::Relaxed),
            waiting: self.waiting(),
        }
    }
}

/// Live registration of one thread in a [`LockFreeWaitRing`]
#[derive(Debug)]
pub struct WaitRegistration<'a> {
    ring: &'a LockFreeWaitRing,
    token: u64,
}

impl WaitRegistration<'_> {
    /// Park the calling thread until unparked or `timeout` elapses
    ///
    /// Returns early on spurious wake-ups; callers re-check their condition.
    pub fn park(&self, timeout: Option<Duration>) {
        self.ring.park_count.fetch_add(1, Ordering::Relaxed);
        match timeout {
            Some(timeout) => thread::park_timeout(timeout),
            None => thread::park(),
        }
    }
}

impl Drop for WaitRegistration<'_> {
    fn drop(&mut self) {
        self.ring.waiters.remove(&self.token);
    }
}

/// Statistics for a wait ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitStats {
    /// Number of park calls
    pub park_count: u64,
    /// Number of unpark signals sent
    pub unpark_count: u64,
    /// Threads registered at snapshot time
    pub waiting: usize,
}
