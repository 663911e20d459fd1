//! Execution contexts for progress and completion callbacks

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::warn;

/// A unit of work delivered to the caller's context
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Serial execution context chosen by the caller.
///
/// Tasks dispatched from one thread run in dispatch order, one at a time,
/// never on the dispatching thread.
pub trait CallbackQueue: Send + Sync {
    fn dispatch(&self, task: Task);
}

/// Runs callbacks on a single task of a tokio runtime
pub struct TokioQueue {
    tx: mpsc::UnboundedSender<Task>,
}

impl TokioQueue {
    /// Spawn the drain task on `handle`
    pub fn new(handle: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        handle.spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
        });
        Self { tx }
    }

    /// Spawn on the runtime the caller is running in
    pub fn current() -> Self {
        Self::new(&Handle::current())
    }
}

impl CallbackQueue for TokioQueue {
    fn dispatch(&self, task: Task) {
        if self.tx.send(task).is_err() {
            warn!("Callback queue runtime has shut down, dropping callback");
        }
    }
}

/// Queue pumped by the caller from its own thread, like a UI run loop
#[derive(Default)]
pub struct ManualQueue {
    tasks: Mutex<VecDeque<Task>>,
    available: Condvar,
}

impl ManualQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every queued task on the calling thread. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.pop() {
            task();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for a task, then run everything queued
    pub fn wait_and_run(&self, timeout: Duration) -> usize {
        {
            let mut tasks = self.tasks.lock();
            if tasks.is_empty() {
                let _ = self.available.wait_for(&mut tasks, timeout);
            }
        }
        self.run_pending()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    fn pop(&self) -> Option<Task> {
        self.tasks.lock().pop_front()
    }
}

impl CallbackQueue for ManualQueue {
    fn dispatch(&self, task: Task) {
        self.tasks.lock().push_back(task);
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_manual_queue_runs_in_order_on_pump() {
        let queue = ManualQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = Arc::clone(&seen);
            queue.dispatch(Box::new(move || seen.lock().push(i)));
        }
        assert_eq!(queue.len(), 3);
        assert!(seen.lock().is_empty());

        assert_eq!(queue.run_pending(), 3);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_manual_queue_wait_wakes_on_dispatch() {
        let queue = Arc::new(ManualQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.dispatch(Box::new(|| {})))
        };
        let mut ran = 0;
        while ran == 0 {
            ran = queue.wait_and_run(Duration::from_millis(50));
        }
        producer.join().unwrap();
        assert_eq!(ran, 1);
    }

    #[tokio::test]
    async fn test_tokio_queue_preserves_order() {
        let queue = TokioQueue::current();
        let (tx, mut rx) = mpsc::unbounded_channel();
        for i in 0..5 {
            let tx = tx.clone();
            queue.dispatch(Box::new(move || {
                let _ = tx.send(i);
            }));
        }
        for expected in 0..5 {
            assert_eq!(rx.recv().await, Some(expected));
        }
    }
}
