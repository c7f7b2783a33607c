// SPDX-License-Identifier: MPL-2.0

use alloc::collections::VecDeque;

use spin::Mutex;

use super::{WorkItem, WorkQueue};
use crate::prelude::*;

/// A work queue whose items run only when the owner polls it.
///
/// The queue suits hosts that pump deferred work from their own main loop, and
/// tests that need to control exactly when deferred work happens.
#[derive(Debug, Default)]
pub struct PolledQueue {
    pending_work_items: Mutex<VecDeque<Arc<WorkItem>>>,
}

impl PolledQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runs queued items until the queue is empty.
    ///
    /// Items re-submitted while running are run by the same call.
    /// Returns the number of items run.
    pub fn poll(&self) -> usize {
        let mut nr_run = 0;
        while let Some(work_item) = self.dequeue() {
            work_item.run();
            nr_run += 1;
        }
        nr_run
    }

    /// Runs at most one queued item. Returns whether an item ran.
    pub fn poll_one(&self) -> bool {
        match self.dequeue() {
            Some(work_item) => {
                work_item.run();
                true
            }
            None => false,
        }
    }

    /// Returns the number of queued items.
    pub fn len(&self) -> usize {
        self.pending_work_items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_work_items.lock().is_empty()
    }

    fn dequeue(&self) -> Option<Arc<WorkItem>> {
        self.pending_work_items.lock().pop_front()
    }

    fn remove(&self, work_item: &WorkItem) -> Option<Arc<WorkItem>> {
        let mut queue = self.pending_work_items.lock();
        let pos = queue
            .iter()
            .position(|queued| core::ptr::eq(Arc::as_ptr(queued), work_item))?;
        queue.remove(pos)
    }
}

impl WorkQueue for PolledQueue {
    fn enqueue(&self, work_item: Arc<WorkItem>) -> bool {
        if !work_item.try_pending() {
            return false;
        }
        self.pending_work_items.lock().push_back(work_item);
        true
    }

    /// Runs the item on the caller while it is queued, then waits for any run
    /// taken over by a concurrent poller.
    fn flush(&self, work_item: &WorkItem) {
        loop {
            if let Some(queued) = self.remove(work_item) {
                queued.run();
                continue;
            }
            // A poller may have dequeued the item without running it yet.
            if !work_item.is_busy() {
                return;
            }
            core::hint::spin_loop();
        }
    }
}
