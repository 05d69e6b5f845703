//! Delayed execution of tasks on an on-demand worker thread.

use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, LazyLock, Mutex, mpsc};
use std::time::{Duration, Instant};

use tracing::error;

use crate::support::panic_message;

struct TimerTask {
    due: Instant,
    seq: u64,
    func: Box<dyn FnOnce() + Send>,
}

// The heap is a max-heap, so the task with the earliest deadline must
// compare greatest. Sequence numbers keep same-deadline tasks in submission
// order.
impl Ord for TimerTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimerTask {}

struct TimerState {
    tasks: BinaryHeap<TimerTask>,
    worker_running: bool,
    next_seq: u64,
}

struct TimerInner {
    state: Mutex<TimerState>,
    due: Condvar,
}

/// Handle to the result of a delayed task.
pub struct DelayedTask<R> {
    receiver: mpsc::Receiver<R>,
}

impl<R> DelayedTask<R> {
    /// Blocks until the task has run and returns its result. Returns `None`
    /// when the task panicked.
    pub fn wait(self) -> Option<R> {
        self.receiver.recv().ok()
    }

    /// Like [`wait`](Self::wait) with an upper bound on the blocking time.
    pub fn wait_timeout(self, timeout: Duration) -> Option<R> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

/// Timer executing submitted tasks after a delay.
///
/// The worker thread is created lazily when a task is submitted and exits
/// when the queue empties, so an idle timer holds no thread. Tasks that are
/// due run in submission order; a long-running task delays everything queued
/// behind it.
pub struct Timer {
    inner: Arc<TimerInner>,
}

static SHARED: LazyLock<Timer> = LazyLock::new(Timer::new);

impl Timer {
    /// The process-wide shared timer, suitable for short-running tasks where
    /// congestion of the single worker is not a concern.
    pub fn shared() -> &'static Timer {
        &SHARED
    }

    pub fn new() -> Timer {
        Timer {
            inner: Arc::new(TimerInner {
                state: Mutex::new(TimerState {
                    tasks: BinaryHeap::new(),
                    worker_running: false,
                    next_seq: 0,
                }),
                due: Condvar::new(),
            }),
        }
    }

    /// Schedules `task` to run once at least `delay` has passed.
    pub fn submit_delayed<R, F>(&self, delay: Duration, task: F) -> DelayedTask<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let func = Box::new(move || match catch_unwind(AssertUnwindSafe(task)) {
            Ok(result) => {
                let _ = sender.send(result);
            }
            Err(panic) => {
                error!("a timer task panicked: {}", panic_message(panic.as_ref()));
            }
        });
        {
            let mut state = self.inner.state.lock().unwrap();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.tasks.push(TimerTask {
                due: Instant::now() + delay,
                seq,
                func,
            });
            if !state.worker_running {
                state.worker_running = true;
                let inner = Arc::clone(&self.inner);
                std::thread::Builder::new()
                    .name("pv-timer".into())
                    .spawn(move || run_worker(&inner))
                    .expect("failed to spawn timer thread");
            }
        }
        self.inner.due.notify_one();
        DelayedTask { receiver }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Timer::new()
    }
}

fn run_worker(inner: &TimerInner) {
    loop {
        let task = {
            let mut state = inner.state.lock().unwrap();
            loop {
                let Some(due) = state.tasks.peek().map(|t| t.due) else {
                    state.worker_running = false;
                    return;
                };
                let now = Instant::now();
                if due <= now {
                    break state.tasks.pop().unwrap();
                }
                let (guard, _) = inner
                    .due
                    .wait_timeout(state, due.duration_since(now))
                    .unwrap();
                state = guard;
            }
        };
        (task.func)();
    }
}
