//! Per-owner FIFO task runner.
//!
//! A [`SerialQueue`] runs at most one task at a time. A task receives a [`Done`]
//! token and the next task starts only after that token is completed, so work
//! against a raw handle never overlaps even though each task finishes
//! asynchronously.
//!
//! A task that drops its [`Done`] without completing it stalls the queue for good.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// A unit of work. It must eventually call [`Done::complete`].
pub type Task = Box<dyn FnOnce(Done) + Send + 'static>;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Task>,
    /// A task has started and its `Done` has not fired yet.
    running: bool,
    /// Some thread is inside `drain` running a task body.
    draining: bool,
}

/// FIFO task runner with at most one task in flight.
#[derive(Clone, Default)]
pub struct SerialQueue {
    state: Arc<Mutex<QueueState>>,
}

impl SerialQueue {
    /// Create an idle queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task. It runs now if the queue is idle, otherwise after every
    /// earlier task has completed.
    ///
    /// Safe to call from inside a running task: the new task is deferred until
    /// the current one completes.
    pub fn push<F>(&self, task: F)
    where
        F: FnOnce(Done) + Send + 'static,
    {
        self.state.lock().pending.push_back(Box::new(task));
        drain(&self.state, false);
    }

    /// Insert a task ahead of every pending task.
    ///
    /// The running task, if any, still finishes first.
    pub fn push_front<F>(&self, task: F)
    where
        F: FnOnce(Done) + Send + 'static,
    {
        self.state.lock().pending.push_front(Box::new(task));
        drain(&self.state, false);
    }

    /// Number of tasks waiting to start.
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Check if no task is waiting to start.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if nothing is running and nothing is waiting.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        !state.running && state.pending.is_empty()
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SerialQueue")
            .field("pending", &state.pending.len())
            .field("running", &state.running)
            .finish()
    }
}

/// Completion signal handed to each task.
#[must_use = "a task that never completes its Done stalls the queue"]
pub struct Done {
    state: Arc<Mutex<QueueState>>,
    deferred: bool,
}

impl Done {
    /// Mark the task finished and start the next one, if any.
    ///
    /// When called from inside the task body the next task starts after the
    /// body returns, so synchronous completions do not grow the stack.
    pub fn complete(self) {
        {
            let mut state = self.state.lock();
            state.running = false;
            if state.draining {
                return;
            }
        }
        drain(&self.state, true);
    }

    /// Whether this task had to wait for a predecessor instead of starting at push time.
    pub fn deferred(&self) -> bool {
        self.deferred
    }
}

impl std::fmt::Debug for Done {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Done")
            .field("deferred", &self.deferred)
            .finish()
    }
}

/// Run pending tasks until one is left in flight or the queue is empty.
fn drain(shared: &Arc<Mutex<QueueState>>, mut deferred: bool) {
    loop {
        let task = {
            let mut state = shared.lock();
            if state.running || state.draining {
                return;
            }
            match state.pending.pop_front() {
                Some(task) => {
                    state.running = true;
                    state.draining = true;
                    task
                }
                None => return,
            }
        };

        task(Done {
            state: Arc::clone(shared),
            deferred,
        });

        let mut state = shared.lock();
        state.draining = false;
        if state.running {
            return;
        }
        deferred = true;
    }
}
