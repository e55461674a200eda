//! Bounded circular task queue and its worker pool.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// Errors surfaced by the task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The ring is at capacity; the caller's contract is to retry.
    #[error("task queue is full")]
    Full,

    /// Termination already began; new tasks are rejected.
    #[error("task queue is terminating")]
    Terminated,

    /// Zero capacity or zero workers.
    #[error("invalid task queue argument")]
    InvalidArgument,

    /// The queue mutex was poisoned by a panicking holder.
    #[error("task queue lock failure")]
    LockFailure,

    /// A worker thread could not be spawned or joined.
    #[error("task queue worker failure")]
    ThreadFailure,
}

struct Ring<T> {
    items: Vec<Option<T>>,
    head: usize,
    tail: usize,
    items_count: usize,
    terminating: bool,
}

impl<T> Ring<T> {
    fn push(&mut self, arg: T) -> Result<(), QueueError> {
        if self.items_count == self.items.len() {
            return Err(QueueError::Full);
        }

        debug_assert!(self.items[self.tail].is_none());
        self.items[self.tail] = Some(arg);
        self.tail = (self.tail + 1) % self.items.len();
        self.items_count += 1;
        Ok(())
    }

    fn pop(&mut self) -> T {
        debug_assert!(self.items_count > 0);

        let arg = self.items[self.head]
            .take()
            .expect("occupied ring slot at head");
        self.head = (self.head + 1) % self.items.len();
        self.items_count -= 1;
        arg
    }
}

/// Bounded FIFO of task arguments with a routine fixed at construction.
pub struct TaskQueue<T> {
    ring: Mutex<Ring<T>>,
    available: Condvar,
    routine: Box<dyn Fn(T) + Send + Sync>,
}

impl<T> TaskQueue<T> {
    /// Create a queue with the given capacity and task routine.
    pub fn new<F>(capacity: usize, routine: F) -> Result<Self, QueueError>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        if capacity == 0 {
            return Err(QueueError::InvalidArgument);
        }

        let mut items = Vec::with_capacity(capacity);
        items.resize_with(capacity, || None);

        Ok(Self {
            ring: Mutex::new(Ring {
                items,
                head: 0,
                tail: 0,
                items_count: 0,
                terminating: false,
            }),
            available: Condvar::new(),
            routine: Box::new(routine),
        })
    }

    /// Enqueue a task argument.
    ///
    /// Returns [`QueueError::Full`] at capacity (retry later) and
    /// [`QueueError::Terminated`] once termination began.
    pub fn push(&self, arg: T) -> Result<(), QueueError> {
        let mut ring = self.ring.lock().map_err(|_| QueueError::LockFailure)?;

        if ring.terminating {
            return Err(QueueError::Terminated);
        }
        ring.push(arg)?;

        // Wake one waiter to grab the task.
        self.available.notify_one();
        Ok(())
    }

    /// Number of tasks currently queued.
    pub fn pending_count(&self) -> usize {
        self.ring
            .lock()
            .map(|ring| ring.items_count)
            .unwrap_or(0)
    }

    /// Worker body: pop and run tasks until drained-and-terminating.
    ///
    /// The predicate `items_count == 0 && !terminating` is re-checked after
    /// every wake, so spurious wakeups park again and workers observing
    /// termination with a non-empty ring drain it before exiting.
    fn worker_loop(&self) {
        loop {
            let mut ring = match self.ring.lock() {
                Ok(ring) => ring,
                Err(_) => {
                    log::error!("task queue mutex poisoned; worker exiting");
                    return;
                }
            };

            while ring.items_count == 0 && !ring.terminating {
                ring = match self.available.wait(ring) {
                    Ok(ring) => ring,
                    Err(_) => {
                        log::error!("task queue mutex poisoned; worker exiting");
                        return;
                    }
                };
            }

            if ring.items_count == 0 {
                // Drained and terminating.
                return;
            }

            let arg = ring.pop();
            drop(ring);
            (self.routine)(arg);
        }
    }

    fn begin_termination(&self) -> Result<(), QueueError> {
        let mut ring = self.ring.lock().map_err(|_| QueueError::LockFailure)?;
        ring.terminating = true;
        drop(ring);

        self.available.notify_all();
        Ok(())
    }
}

/// Worker threads consuming a shared [`TaskQueue`].
pub struct TaskPool<T: Send + 'static> {
    queue: Arc<TaskQueue<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> TaskPool<T> {
    /// Spawn `workers_count` consumers for `queue`.
    pub fn spawn(queue: Arc<TaskQueue<T>>, workers_count: usize) -> Result<Self, QueueError> {
        if workers_count == 0 {
            return Err(QueueError::InvalidArgument);
        }

        let mut workers = Vec::with_capacity(workers_count);
        for index in 0..workers_count {
            let queue = Arc::clone(&queue);
            let handle = thread::Builder::new()
                .name(format!("pool-worker-{index}"))
                .spawn(move || queue.worker_loop())
                .map_err(|_| QueueError::ThreadFailure)?;
            workers.push(handle);
        }

        Ok(Self { queue, workers })
    }

    /// The shared queue, for pushing tasks.
    #[must_use]
    pub fn queue(&self) -> &Arc<TaskQueue<T>> {
        &self.queue
    }

    /// Raise the termination flag, wake every worker, and join them all.
    ///
    /// Remaining tasks are drained before the workers exit.
    pub fn terminate(self) -> Result<(), QueueError> {
        self.queue.begin_termination()?;

        let mut result = Ok(());
        for handle in self.workers {
            if handle.join().is_err() {
                result = Err(QueueError::ThreadFailure);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_zero_capacity_rejected() {
        let result = TaskQueue::<u32>::new(0, |_| {});
        assert_eq!(result.err(), Some(QueueError::InvalidArgument));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let queue = Arc::new(TaskQueue::<u32>::new(4, |_| {}).unwrap());
        let result = TaskPool::spawn(queue, 0);
        assert!(matches!(result, Err(QueueError::InvalidArgument)));
    }

    #[test]
    fn test_push_then_pop_delivers_identical_argument() {
        let delivered = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);

        let queue = Arc::new(
            TaskQueue::new(4, move |arg: u64| sink.lock().unwrap().push(arg)).unwrap(),
        );
        let pool = TaskPool::spawn(Arc::clone(&queue), 1).unwrap();

        queue.push(0xDEAD_BEEF).unwrap();
        pool.terminate().unwrap();

        assert_eq!(*delivered.lock().unwrap(), vec![0xDEAD_BEEF]);
    }

    #[test]
    fn test_full_queue_rejects_without_corruption() {
        let queue = Arc::new(TaskQueue::new(2, |_arg: u32| {}).unwrap());

        queue.push(1).unwrap();
        queue.push(2).unwrap();
        assert_eq!(queue.push(3), Err(QueueError::Full));
        assert_eq!(queue.pending_count(), 2);

        // The two accepted tasks are still intact and drainable.
        let pool = TaskPool::spawn(Arc::clone(&queue), 1).unwrap();
        pool.terminate().unwrap();
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn test_push_after_termination_rejected() {
        let queue = Arc::new(TaskQueue::new(4, |_arg: u32| {}).unwrap());
        let pool = TaskPool::spawn(Arc::clone(&queue), 1).unwrap();
        pool.terminate().unwrap();

        assert_eq!(queue.push(7), Err(QueueError::Terminated));
    }

    #[test]
    fn test_single_worker_preserves_fifo_order() {
        let order = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&order);

        let queue = Arc::new(
            TaskQueue::new(64, move |arg: usize| sink.lock().unwrap().push(arg)).unwrap(),
        );
        let pool = TaskPool::spawn(Arc::clone(&queue), 1).unwrap();

        for index in 0..64 {
            queue.push(index).unwrap();
        }
        pool.terminate().unwrap();

        let order = order.lock().unwrap();
        assert_eq!(*order, (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn test_drain_ten_thousand_tasks_through_four_workers() {
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&executed);

        let queue = Arc::new(
            TaskQueue::new(16, move |_arg: usize| {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap(),
        );
        let pool = TaskPool::spawn(Arc::clone(&queue), 4).unwrap();

        for index in 0..10_000 {
            // Producer contract: retry while the ring is full.
            loop {
                match queue.push(index) {
                    Ok(()) => break,
                    Err(QueueError::Full) => std::hint::spin_loop(),
                    Err(other) => panic!("unexpected push failure: {other}"),
                }
            }
        }
        pool.terminate().unwrap();

        assert_eq!(executed.load(Ordering::Relaxed), 10_000);
    }
}
