use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use log::debug;
use parking_lot::{Condvar, Mutex};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct CompletionBarrier {
    pending: Mutex<usize>,
    all_done: Condvar,
}

/// Fixed-size worker pool with a full completion barrier.
///
/// Sized once at construction (hardware concurrency) and reused for the
/// process lifetime. Tasks fan out over a channel; [`WorkerPool::wait`]
/// blocks the coordinating thread until every dispatched task has finished.
/// There is no per-task join and no cancellation.
pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    barrier: Arc<CompletionBarrier>,
    thread_count: usize,
}

impl WorkerPool {
    pub fn new(thread_count: usize) -> Self {
        let thread_count = thread_count.max(1);
        let (sender, receiver) = unbounded::<Task>();
        let barrier = Arc::new(CompletionBarrier {
            pending: Mutex::new(0),
            all_done: Condvar::new(),
        });

        let workers = (0..thread_count)
            .map(|index| {
                let receiver = receiver.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::Builder::new()
                    .name(format!("embervk-worker-{index}"))
                    .spawn(move || {
                        while let Ok(task) = receiver.recv() {
                            task();
                            let mut pending = barrier.pending.lock();
                            *pending -= 1;
                            if *pending == 0 {
                                barrier.all_done.notify_all();
                            }
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        debug!("Worker pool started with {thread_count} threads");

        Self {
            sender: Some(sender),
            workers,
            barrier,
            thread_count,
        }
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Dispatch a task to the pool.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Count before send so wait() can never observe a dispatched-but-
        // uncounted task
        *self.barrier.pending.lock() += 1;

        if let Some(sender) = &self.sender {
            sender
                .send(Box::new(task))
                .expect("worker pool channel closed");
        }
    }

    /// Block until every dispatched task has completed.
    pub fn wait(&self) {
        let mut pending = self.barrier.pending.lock();
        while *pending > 0 {
            self.barrier.all_done.wait(&mut pending);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets workers drain and exit their recv loops
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn wait_is_a_full_barrier() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..64 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                std::thread::sleep(std::time::Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn wait_with_no_tasks_returns_immediately() {
        let pool = WorkerPool::new(2);
        pool.wait();
    }

    #[test]
    fn pool_is_reusable_across_rounds() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        for round in 1..=3 {
            for _ in 0..8 {
                let counter = Arc::clone(&counter);
                pool.execute(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
            pool.wait();
            assert_eq!(counter.load(Ordering::SeqCst), round * 8);
        }
    }

    #[test]
    fn zero_thread_request_still_makes_progress() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.thread_count(), 1);

        let counter = Arc::new(AtomicUsize::new(0));
        let clone = Arc::clone(&counter);
        pool.execute(move || {
            clone.fetch_add(1, Ordering::SeqCst);
        });
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
