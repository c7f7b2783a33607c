// SPDX-License-Identifier: MPL-2.0

//! Deferred work.
//!
//! # Overview
//!
//! A [`WorkItem`] wraps a function that must run later, outside of the context
//! that requested it. Submitting an item to a [`WorkQueue`] arms it; submitting
//! an armed item again is a no-op, so any burst of submissions before the item
//! runs results in a single run. The queue disarms the item right before
//! invoking its function. A submission that races with a running item is
//! therefore never lost: it either happens early enough for the running
//! function to observe its effects, or it re-arms the item for another run.
//!
//! Two queues are provided:
//!
//! - [`PolledQueue`] runs items only when its owner calls [`PolledQueue::poll`].
//!   It works without `std` and makes the order of events fully deterministic.
//! - [`WorkerThread`] (with the `std` feature) runs items on a dedicated thread.
//!
//! # Examples
//!
//! ```rust
//! use core::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use irq_sim::work::{PolledQueue, WorkItem, WorkQueue};
//!
//! let runs = Arc::new(AtomicUsize::new(0));
//! let item = {
//!     let runs = runs.clone();
//!     WorkItem::new(Box::new(move || {
//!         runs.fetch_add(1, Ordering::Relaxed);
//!     }))
//! };
//!
//! let queue = PolledQueue::new();
//! assert!(queue.enqueue(item.clone()));
//! assert!(!queue.enqueue(item.clone()));
//! queue.poll();
//! assert_eq!(runs.load(Ordering::Relaxed), 1);
//! ```

mod polled;
#[cfg(feature = "std")]
mod worker;

use core::sync::atomic::{AtomicBool, Ordering};

pub use polled::PolledQueue;
#[cfg(feature = "std")]
pub use worker::WorkerThread;

use crate::prelude::*;

/// A task to be executed by a work queue.
pub struct WorkItem {
    work_func: Box<dyn Fn() + Send + Sync>,
    was_pending: AtomicBool,
    is_running: AtomicBool,
}

impl WorkItem {
    pub fn new(work_func: Box<dyn Fn() + Send + Sync>) -> Arc<WorkItem> {
        Arc::new(WorkItem {
            work_func,
            was_pending: AtomicBool::new(false),
            is_running: AtomicBool::new(false),
        })
    }

    /// Returns whether the item is queued and has not started running yet.
    pub fn is_pending(&self) -> bool {
        self.was_pending.load(Ordering::Acquire)
    }

    /// Returns whether the work function is being executed.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Returns whether the item is queued or running.
    pub fn is_busy(&self) -> bool {
        self.is_running() || self.is_pending()
    }

    /// Arms the item. Returns `false` if it was already armed.
    pub fn try_pending(&self) -> bool {
        self.was_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Drops the armed state of an item that was removed from a queue
    /// without being run.
    #[cfg(feature = "std")]
    pub(crate) fn cancel_pending(&self) {
        self.was_pending.store(false, Ordering::Release);
    }

    /// Runs the work function on the calling context.
    ///
    /// The item is disarmed before the function starts, so the function may
    /// re-submit it, and `is_running` covers the whole call. The item stops
    /// running even if the function panics.
    pub(crate) fn run(&self) {
        self.is_running.store(true, Ordering::Release);
        let _guard = RunningGuard(&self.is_running);
        self.was_pending.store(false, Ordering::Release);
        (self.work_func)();
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl core::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkItem")
            .field("was_pending", &self.is_pending())
            .field("is_running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// A queue that executes submitted work items asynchronously.
///
/// At most one instance of a given item runs at a time.
pub trait WorkQueue: Send + Sync {
    /// Submits a work item. Returns `false` if the item is already pending.
    fn enqueue(&self, work_item: Arc<WorkItem>) -> bool;

    /// Waits until the item is neither pending nor running.
    ///
    /// Must not be called from the work function of `work_item` itself.
    fn flush(&self, work_item: &WorkItem);
}
