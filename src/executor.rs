//! Fixed-size thread pool for blocking I/O tasks.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::error;

use crate::support::panic_message;

type Task = Box<dyn FnOnce() + Send>;

/// Error returned when a task cannot be accepted: the pool has no threads or
/// is shutting down.
#[derive(Debug)]
pub struct RejectedTask;

struct PoolState {
    shutdown_requested: bool,
    tasks: VecDeque<Task>,
}

struct PoolInner {
    state: Mutex<PoolState>,
    available: Condvar,
}

/// Fixed-size pool running submitted closures on worker threads.
///
/// A pool of size zero accepts no tasks; callers that want synchronous
/// execution run the closure themselves instead of submitting it. Shutting
/// down processes every task that was already queued before the workers
/// terminate.
pub struct ThreadPoolExecutor {
    inner: Arc<PoolInner>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    pool_size: usize,
}

impl ThreadPoolExecutor {
    /// Creates a pool with the given number of worker threads.
    pub fn new(pool_size: usize) -> ThreadPoolExecutor {
        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState {
                shutdown_requested: false,
                tasks: VecDeque::new(),
            }),
            available: Condvar::new(),
        });
        let threads = (0..pool_size)
            .map(|i| {
                let inner = Arc::clone(&inner);
                std::thread::Builder::new()
                    .name(format!("pv-io-{i}"))
                    .spawn(move || run_worker(&inner))
                    .expect("failed to spawn pool thread")
            })
            .collect();
        ThreadPoolExecutor {
            inner,
            threads: Mutex::new(threads),
            pool_size,
        }
    }

    /// Queues a task for execution by one of the workers.
    pub fn submit<F: FnOnce() + Send + 'static>(&self, task: F) -> Result<(), RejectedTask> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.shutdown_requested || self.pool_size == 0 {
                return Err(RejectedTask);
            }
            state.tasks.push_back(Box::new(task));
        }
        self.inner.available.notify_one();
        Ok(())
    }

    /// Stops accepting tasks, processes everything already queued, and joins
    /// the workers. Blocks until the queue has drained.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.shutdown_requested {
                return;
            }
            state.shutdown_requested = true;
        }
        self.inner.available.notify_all();
        // Help the workers drain the queue.
        loop {
            let task = {
                let mut state = self.inner.state.lock().unwrap();
                match state.tasks.pop_front() {
                    Some(task) => task,
                    None => break,
                }
            };
            run_task(task);
        }
        for thread in self.threads.lock().unwrap().drain(..) {
            let _ = thread.join();
        }
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(inner: &PoolInner) {
    loop {
        let task = {
            let mut state = inner.state.lock().unwrap();
            loop {
                if let Some(task) = state.tasks.pop_front() {
                    break task;
                }
                if state.shutdown_requested {
                    return;
                }
                state = inner.available.wait(state).unwrap();
            }
        };
        run_task(task);
    }
}

fn run_task(task: Task) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
        error!(
            "a pool task panicked: {}; the worker keeps running",
            panic_message(panic.as_ref())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn tasks_run_on_worker_threads() {
        let pool = ThreadPoolExecutor::new(2);
        let (tx, rx) = mpsc::channel();
        for i in 0..4 {
            let tx = tx.clone();
            pool.submit(move || tx.send(i).unwrap()).unwrap();
        }
        let mut seen: Vec<i32> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn shutdown_drains_queued_tasks() {
        let pool = ThreadPoolExecutor::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                std::thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
        assert!(pool.submit(|| {}).is_err());
    }

    #[test]
    fn empty_pool_rejects_tasks() {
        let pool = ThreadPoolExecutor::new(0);
        assert!(pool.submit(|| {}).is_err());
    }

    #[test]
    fn a_panicking_task_does_not_kill_the_worker() {
        let pool = ThreadPoolExecutor::new(1);
        pool.submit(|| panic!("boom")).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit(move || tx.send(()).unwrap()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
}
