// SPDX-License-Identifier: MPL-2.0

use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    string::String,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

use super::{WorkItem, WorkQueue};
use crate::prelude::*;

/// A work queue served by a dedicated host thread.
///
/// Items run one at a time in submission order. Dropping the last handle to
/// the queue stops the thread; items still queued at that point are
/// discarded.
pub struct WorkerThread {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

struct Shared {
    inner: Mutex<WorkerInner>,
    /// Signaled when an item is queued or the worker should exit.
    wake: Condvar,
    /// Signaled every time an item finishes running.
    idle: Condvar,
}

struct WorkerInner {
    pending_work_items: VecDeque<Arc<WorkItem>>,
    should_exit: bool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, WorkerInner> {
        // The lock is never held while a work function runs, so a poisoned
        // lock still protects a consistent queue.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WorkerThread {
    /// Spawns a worker thread with the given name.
    pub fn spawn(name: &str) -> Result<Arc<Self>> {
        let shared = Arc::new(Shared {
            inner: Mutex::new(WorkerInner {
                pending_work_items: VecDeque::new(),
                should_exit: false,
            }),
            wake: Condvar::new(),
            idle: Condvar::new(),
        });

        let handle = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(String::from(name))
                .spawn(move || worker_loop(&shared))
                .map_err(|_| Error::with_msg(NoMemory, "failed to spawn the worker thread"))?
        };
        debug!("irq-sim: worker thread {:?} started", name);

        Ok(Arc::new(Self {
            shared,
            handle: Some(handle),
        }))
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let work_item = {
            let mut inner = shared.lock();
            loop {
                if inner.should_exit {
                    return;
                }
                if let Some(work_item) = inner.pending_work_items.pop_front() {
                    break work_item;
                }
                inner = shared
                    .wake
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(|| work_item.run())).is_err() {
            warn!("irq-sim: a work function panicked on the worker thread");
        }

        // Taking the lock orders the notification after any flusher's check.
        drop(shared.lock());
        shared.idle.notify_all();
    }
}

impl WorkQueue for WorkerThread {
    fn enqueue(&self, work_item: Arc<WorkItem>) -> bool {
        if !work_item.try_pending() {
            return false;
        }
        self.shared.lock().pending_work_items.push_back(work_item);
        self.shared.wake.notify_one();
        true
    }

    fn flush(&self, work_item: &WorkItem) {
        if self
            .handle
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id())
        {
            warn!("irq-sim: flushing a work item from its own worker thread");
            return;
        }

        let mut inner = self.shared.lock();
        while work_item.is_busy() {
            inner = self
                .shared
                .idle
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        {
            let mut inner = self.shared.lock();
            inner.should_exit = true;
            for work_item in inner.pending_work_items.drain(..) {
                work_item.cancel_pending();
            }
        }
        self.shared.wake.notify_all();
        self.shared.idle.notify_all();

        let Some(handle) = self.handle.take() else {
            return;
        };
        // The last handle may be dropped by a work function on the worker itself.
        if handle.thread().id() != thread::current().id() && handle.join().is_err() {
            warn!("irq-sim: the worker thread terminated abnormally");
        }
    }
}

impl core::fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerThread")
            .field("name", &self.handle.as_ref().and_then(|h| h.thread().name()))
            .finish_non_exhaustive()
    }
}
