//! Deferred Job Queue
//!
//! Deferred computeds batch their downstream notification into a job queue
//! instead of propagating synchronously. The host decides when the batch
//! boundary falls by calling [`flush`], typically once per event-loop turn
//! or render frame.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

thread_local! {
    static QUEUE: RefCell<VecDeque<Box<dyn FnOnce()>>> = const { RefCell::new(VecDeque::new()) };
    static FLUSHING: Cell<bool> = const { Cell::new(false) };
}

/// Enqueue a job for the next [`flush`].
pub(crate) fn queue(job: Box<dyn FnOnce()>) {
    QUEUE.with_borrow_mut(|q| q.push_back(job));
}

/// Whether any jobs are waiting.
pub fn has_pending() -> bool {
    QUEUE.with_borrow(|q| !q.is_empty())
}

/// Drain the job queue, including jobs enqueued while draining.
/// Re-entrant calls from inside a job are no-ops.
pub fn flush() {
    if FLUSHING.replace(true) {
        return;
    }
    struct Done;
    impl Drop for Done {
        fn drop(&mut self) {
            FLUSHING.set(false);
        }
    }
    let _done = Done;
    loop {
        let job = QUEUE.with_borrow_mut(|q| q.pop_front());
        match job {
            Some(job) => job(),
            None => break,
        }
    }
}
