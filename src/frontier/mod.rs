//! Breadth-first crawl frontier
//!
//! The frontier owns every URL a job has admitted: the ones waiting to be
//! analyzed and the canonical forms of all URLs ever accepted. Admission,
//! deduplication and dequeueing happen under one lock, so two workers that
//! discover the same link at the same time can never both enqueue it.
//!
//! The frontier also counts entries that are checked out to workers. A job is
//! finished only when the queue is empty *and* nothing is in flight, because an
//! in-flight page may still discover new links.

mod entry;

pub use entry::FrontierEntry;

use crate::url::normalize_url;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use url::Url;

/// Outcome of offering a URL to the frontier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The URL was new and is now queued
    Accepted,
    /// The canonical URL was already admitted earlier
    Duplicate,
    /// The URL lies deeper than the job's maximum depth
    TooDeep,
    /// The job has already admitted its maximum number of pages
    CapacityReached,
    /// The frontier was closed and admits nothing more
    Closed,
    /// The URL could not be canonicalized
    Malformed(String),
}

impl Admission {
    /// Returns true if the URL was queued
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Result of a non-blocking dequeue attempt
#[derive(Debug)]
pub enum Dequeue {
    /// An entry was checked out; it counts as in flight until [`Frontier::complete`]
    Ready(FrontierEntry),
    /// Nothing queued right now, but in-flight pages may still add links
    Waiting,
    /// Nothing queued and nothing in flight, or the frontier was closed
    Drained,
}

#[derive(Debug, Default)]
struct FrontierState {
    queue: BinaryHeap<FrontierEntry>,
    known: HashSet<String>,
    accepted: usize,
    in_flight: usize,
    next_seq: u64,
    closed: bool,
}

/// Deduplicating breadth-first URL queue for a single crawl job
#[derive(Debug)]
pub struct Frontier {
    max_depth: u32,
    max_pages: usize,
    state: Mutex<FrontierState>,
    wakeup: Notify,
}

impl Frontier {
    /// Creates an empty frontier bounded by depth and page count
    pub fn new(max_depth: u32, max_pages: usize) -> Self {
        Self {
            max_depth,
            max_pages,
            state: Mutex::new(FrontierState::default()),
            wakeup: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, FrontierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offers a URL discovered at `depth`
    ///
    /// The URL is canonicalized first. It is rejected if its canonical form was
    /// already admitted, if `depth` exceeds the maximum depth, or if the number
    /// of URLs ever admitted has reached the page cap. Rejections are no-ops.
    pub fn enqueue(&self, url: &str, depth: u32, parent: Option<&Url>) -> Admission {
        let canonical = match normalize_url(url) {
            Ok(u) => u,
            Err(e) => return Admission::Malformed(e.to_string()),
        };

        let mut state = self.state();

        if state.closed {
            return Admission::Closed;
        }
        if state.known.contains(canonical.as_str()) {
            return Admission::Duplicate;
        }
        if depth > self.max_depth {
            return Admission::TooDeep;
        }
        if state.accepted >= self.max_pages {
            return Admission::CapacityReached;
        }

        state.known.insert(canonical.as_str().to_string());
        state.accepted += 1;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(FrontierEntry {
            url: canonical,
            depth,
            parent: parent.cloned(),
            seq,
        });
        drop(state);

        self.wakeup.notify_waiters();
        Admission::Accepted
    }

    /// Checks out the shallowest, earliest-admitted entry without waiting
    pub fn dequeue(&self) -> Dequeue {
        let mut state = self.state();

        if state.closed {
            return Dequeue::Drained;
        }

        match state.queue.pop() {
            Some(entry) => {
                state.in_flight += 1;
                Dequeue::Ready(entry)
            }
            None if state.in_flight > 0 => Dequeue::Waiting,
            None => Dequeue::Drained,
        }
    }

    /// Waits for the next entry
    ///
    /// Returns `None` once the frontier is drained: nothing queued, nothing in
    /// flight, or closed.
    pub async fn next(&self) -> Option<FrontierEntry> {
        loop {
            // Registered before checking so a wakeup between the check and the
            // await is not lost.
            let notified = self.wakeup.notified();

            match self.dequeue() {
                Dequeue::Ready(entry) => return Some(entry),
                Dequeue::Drained => return None,
                Dequeue::Waiting => notified.await,
            }
        }
    }

    /// Marks a checked-out entry as finished
    ///
    /// Links discovered on that page must be enqueued before this call.
    pub fn complete(&self) {
        {
            let mut state = self.state();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.wakeup.notify_waiters();
    }

    /// Stops handing out entries
    ///
    /// Entries already checked out stay in flight until completed; queued
    /// entries are never dequeued.
    pub fn close(&self) {
        self.state().closed = true;
        self.wakeup.notify_waiters();
    }

    /// Number of pages that can still be admitted
    pub fn remaining_capacity(&self) -> usize {
        self.max_pages.saturating_sub(self.state().accepted)
    }

    /// Number of URLs admitted so far
    pub fn accepted(&self) -> usize {
        self.state().accepted
    }

    /// Number of entries waiting in the queue
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    /// Returns true if nothing is waiting in the queue
    pub fn is_empty(&self) -> bool {
        self.state().queue.is_empty()
    }

    /// Number of entries checked out and not yet completed
    pub fn in_flight(&self) -> usize {
        self.state().in_flight
    }

    /// Returns true once [`Frontier::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Maximum depth this frontier admits
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }
}

/// Completes a checked-out frontier entry when dropped
///
/// Holding one of these for the duration of a page run keeps the in-flight
/// count correct even if the run unwinds.
pub struct InFlight<'a> {
    frontier: &'a Frontier,
}

impl<'a> InFlight<'a> {
    pub fn new(frontier: &'a Frontier) -> Self {
        Self { frontier }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.frontier.complete();
    }
}
