use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex},
    thread::{self, JoinHandle},
};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct State {
    queue: VecDeque<Job>,
    active: usize,
    stop: bool,
}

struct Shared {
    state: Mutex<State>,
    has_work: Condvar,
    all_idle: Condvar,
}

/// Fixed-size FIFO worker pool. Tasks run exactly once; a panicking task is
/// captured into its handle without killing the worker. `wait` must not be
/// called from a task running on the same pool.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

pub struct TaskHandle<T> {
    slot: Arc<TaskSlot<T>>,
}

struct TaskSlot<T> {
    result: Mutex<Option<thread::Result<T>>>,
    done: Condvar,
}

impl<T> TaskHandle<T> {
    /// Block until the task ran, returning its result or captured panic.
    pub fn wait(self) -> thread::Result<T> {
        let mut result = self.slot.result.lock().unwrap();
        loop {
            match result.take() {
                Some(out) => return out,
                None => result = self.slot.done.wait(result).unwrap(),
            }
        }
    }
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State { queue: VecDeque::new(), active: 0, stop: false }),
            has_work: Condvar::new(),
            all_idle: Condvar::new(),
        });

        let workers = (0..threads.max(1))
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || worker_loop(&shared))
            })
            .collect();

        Self { shared, workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn submit<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let slot = Arc::new(TaskSlot { result: Mutex::new(None), done: Condvar::new() });
        let out = slot.clone();
        let job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(task));
            *out.result.lock().unwrap() = Some(result);
            out.done.notify_all();
        });

        let mut state = self.shared.state.lock().unwrap();
        state.active += 1;
        state.queue.push_back(job);
        drop(state);
        self.shared.has_work.notify_one();

        TaskHandle { slot }
    }

    /// Block until the queue and every in-flight task have drained.
    pub fn wait(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while state.active != 0 {
            state = self.shared.all_idle.wait(state).unwrap();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    break job;
                }
                if state.stop {
                    return;
                }
                state = shared.has_work.wait(state).unwrap();
            }
        };

        job();

        let mut state = shared.state.lock().unwrap();
        state.active -= 1;
        if state.active == 0 {
            shared.all_idle.notify_all();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.state.lock().unwrap().stop = true;
        self.shared.has_work.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_submit_returns_result() {
        let pool = WorkerPool::new(2);
        let handle = pool.submit(|| 21 * 2);
        assert_eq!(handle.wait().unwrap(), 42);
    }

    #[test]
    fn test_wait_drains_all() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = counter.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_panic_captured() {
        let pool = WorkerPool::new(1);
        let bad = pool.submit(|| panic!("boom"));
        assert!(bad.wait().is_err());

        let good = pool.submit(|| 7);
        assert_eq!(good.wait().unwrap(), 7);
    }

    #[test]
    fn test_single_thread_fifo() {
        let pool = WorkerPool::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..32 {
            let order = order.clone();
            pool.submit(move || order.lock().unwrap().push(i));
        }
        pool.wait();
        assert_eq!(*order.lock().unwrap(), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_drop_drains_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(2);
            for _ in 0..50 {
                let counter = counter.clone();
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                });
            }
        }
        assert_eq!(counter.load(Ordering::Relaxed), 50);
    }
}
