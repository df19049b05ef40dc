//! Bounded worker pool.
//!
//! Blocking adapter calls (connect, list, page reads, batch writes) run on a
//! fixed-size rayon pool instead of one thread per action. Each submission
//! returns a [`TaskHandle`] that yields the task's result; completion is also
//! announced on the [`EventBus`] as [`Event::TaskFinished`].

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::constants::WORKER_THREAD_PREFIX;
use crate::errors::{VixError, VixResult};
use crate::events::{Event, EventBus};

// ============================================================================
// TaskHandle
// ============================================================================

/// Receiving end of a submitted task.
///
/// A task that panics, or whose pool is dropped before it runs, resolves to
/// [`VixError::TaskFailed`].
pub struct TaskHandle<T> {
    name: String,
    receiver: Receiver<VixResult<T>>,
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("name", &self.name).finish()
    }
}

impl<T> TaskHandle<T> {
    /// A handle that is already resolved.
    pub fn ready(name: impl Into<String>, value: VixResult<T>) -> Self {
        let (sender, receiver) = mpsc::channel();
        // Receiver is alive; the send cannot fail.
        let _ = sender.send(value);
        Self {
            name: name.into(),
            receiver,
        }
    }

    /// Task name, as given to [`WorkerPool::submit`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the task finishes.
    pub fn wait(self) -> VixResult<T> {
        match self.receiver.recv() {
            Ok(result) => result,
            Err(_) => Err(VixError::task_failed(
                &self.name,
                "worker dropped the task before completion",
            )),
        }
    }

    /// Block for at most `timeout`. Returns `None` if the task is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<VixResult<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(VixError::task_failed(
                &self.name,
                "worker dropped the task before completion",
            ))),
        }
    }

    /// Poll without blocking. The result is handed out once.
    pub fn try_wait(&self) -> Option<VixResult<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(VixError::task_failed(
                &self.name,
                "worker dropped the task before completion",
            ))),
        }
    }
}

// ============================================================================
// WorkerPool
// ============================================================================

/// Fixed-size thread pool for blocking backend work.
#[derive(Clone)]
pub struct WorkerPool {
    pool: Arc<rayon::ThreadPool>,
    threads: usize,
    events: Option<EventBus>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .finish()
    }
}

impl WorkerPool {
    /// Build a pool with `threads` workers.
    pub fn new(threads: usize) -> VixResult<Self> {
        if threads == 0 {
            return Err(VixError::InvalidArgument(
                "worker pool needs at least one thread".to_string(),
            ));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("{}-{}", WORKER_THREAD_PREFIX, i))
            .panic_handler(|_| error!("Worker thread panicked outside a task"))
            .build()
            .map_err(|e| VixError::internal(format!("Failed to build worker pool: {}", e)))?;

        debug!("Worker pool started with {} threads", threads);
        Ok(Self {
            pool: Arc::new(pool),
            threads,
            events: None,
        })
    }

    /// Announce task completion on `events`.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `task` on a worker.
    pub fn submit<T, F>(&self, name: impl Into<String>, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> VixResult<T> + Send + 'static,
    {
        let name = name.into();
        let (sender, receiver) = mpsc::channel();
        let events = self.events.clone();
        let task_name = name.clone();

        self.pool.spawn(move || {
            let (result, panicked) = match catch_unwind(AssertUnwindSafe(task)) {
                Ok(result) => (result, false),
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    error!("Task `{}` panicked: {}", task_name, reason);
                    (Err(VixError::task_failed(&task_name, reason)), true)
                }
            };
            debug!("Task `{}` finished", task_name);
            // The caller may have dropped the handle.
            let _ = sender.send(result);
            if let Some(events) = events {
                events.publish(Event::TaskFinished {
                    task: task_name,
                    panicked,
                });
            }
        });

        TaskHandle { name, receiver }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
