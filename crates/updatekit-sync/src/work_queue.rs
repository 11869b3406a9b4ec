//! Deferred work execution.
//!
//! Long-running update steps (bundle verification, applying targets) are
//! pushed onto a [`WorkQueue`] so the request handler that scheduled them can
//! return immediately. Implementations never run work inline: callers commonly
//! hold locks while enqueuing.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{self, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, warn};
use updatekit_errors::{Result, UpdateError};

/// A unit of deferred work.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// A FIFO queue that executes work items later, on some other context.
pub trait WorkQueue: Send + Sync {
    /// Enqueue `work`.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` when the queue is full, `Unavailable` once the
    /// queue has been stopped.
    fn push_work(&self, work: Work) -> Result<()>;
}

/// Runs work items in order on a single dedicated thread.
pub struct ThreadWorkQueue {
    name: String,
    sender: Mutex<Option<Sender<Work>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl ThreadWorkQueue {
    /// Default number of pending work items.
    pub const DEFAULT_CAPACITY: usize = 8;

    /// Spawn the worker thread.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero capacity, or the OS error if the thread
    /// cannot be spawned.
    pub fn new(name: impl Into<String>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(UpdateError::invalid_argument(
                "work queue capacity must be non-zero",
            ));
        }
        let name = name.into();
        let (sender, receiver) = channel::bounded::<Work>(capacity);
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!(queue = %thread_name, "work queue started");
                for work in receiver.iter() {
                    if catch_unwind(AssertUnwindSafe(work)).is_err() {
                        error!(queue = %thread_name, "work item panicked");
                    }
                }
                debug!(queue = %thread_name, "work queue drained");
            })?;
        let worker_id = handle.thread().id();

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            worker_id,
        })
    }

    /// Queue name, also used as the worker thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop accepting work, run what is already queued and join the worker.
    ///
    /// Called from the worker thread itself, this only closes the queue.
    pub fn stop(&self) {
        drop(self.sender.lock().take());
        if thread::current().id() == self.worker_id {
            warn!(queue = %self.name, "work queue stopped from its own worker; not joining");
            return;
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!(queue = %self.name, "work queue thread panicked");
        }
    }
}

impl WorkQueue for ThreadWorkQueue {
    fn push_work(&self, work: Work) -> Result<()> {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(UpdateError::unavailable(format!(
                "work queue '{}' is stopped",
                self.name
            )));
        };
        match sender.try_send(work) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(UpdateError::resource_exhausted(format!(
                "work queue '{}' is full",
                self.name
            ))),
            Err(TrySendError::Disconnected(_)) => Err(UpdateError::unavailable(format!(
                "work queue '{}' worker exited",
                self.name
            ))),
        }
    }
}

impl Drop for ThreadWorkQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ThreadWorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadWorkQueue")
            .field("name", &self.name)
            .field("running", &self.sender.lock().is_some())
            .finish()
    }
}

/// Holds work until the owner explicitly drains it.
///
/// Lets tests and single-threaded hosts decide exactly when queued work runs.
#[derive(Default)]
pub struct ManualWorkQueue {
    pending: Mutex<VecDeque<Work>>,
    capacity: Option<usize>,
}

impl ManualWorkQueue {
    /// Unbounded queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue that rejects work beyond `capacity` pending items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            capacity: Some(capacity),
        }
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Run the oldest queued item. Returns `false` when nothing was queued.
    pub fn run_one(&self) -> bool {
        // Pop before running so work may enqueue more work.
        let next = self.pending.lock().pop_front();
        match next {
            Some(work) => {
                work();
                true
            }
            None => false,
        }
    }

    /// Run queued items, including ones enqueued while running, until empty.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }
}

impl WorkQueue for ManualWorkQueue {
    fn push_work(&self, work: Work) -> Result<()> {
        let mut pending = self.pending.lock();
        if self.capacity.is_some_and(|cap| pending.len() >= cap) {
            return Err(UpdateError::resource_exhausted("manual work queue is full"));
        }
        pending.push_back(work);
        Ok(())
    }
}

impl std::fmt::Debug for ManualWorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualWorkQueue")
            .field("pending", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_manual_queue_defers_work() -> Result<()> {
        let queue = ManualWorkQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        queue.push_work(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }))?;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_manual_queue_capacity() -> Result<()> {
        let queue = ManualWorkQueue::with_capacity(1);
        queue.push_work(Box::new(|| {}))?;
        let err = queue.push_work(Box::new(|| {})).err();
        assert!(err.is_some_and(|e| e.is_retryable()));
        Ok(())
    }

    #[test]
    fn test_thread_queue_rejects_zero_capacity() {
        assert!(ThreadWorkQueue::new("zero", 0).is_err());
    }
}
