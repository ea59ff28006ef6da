//! Dedicated worker threads
//!
//! Each worker is one named thread draining a bounded crossbeam queue in
//! strict FIFO order. Work queued to one worker is never reordered; there
//! is no ordering between workers.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, warn};

use crate::Result;

enum Envelope<W> {
    Work(W),
    Stop,
}

/// Producer handle for a worker queue
pub(crate) struct WorkQueue<W> {
    name: &'static str,
    tx: Sender<Envelope<W>>,
}

impl<W> Clone for WorkQueue<W> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<W> WorkQueue<W> {
    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    /// Queue work without blocking
    ///
    /// Safe from interrupt context. Returns false if the queue is full or
    /// the worker has stopped.
    pub(crate) fn queue(&self, work: W) -> bool {
        match self.tx.try_send(Envelope::Work(work)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("{}: queue full", self.name);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Outcome of a bounded wait on the worker queue
pub(crate) enum Recv<W> {
    Work(W),
    Timeout,
    Stopped,
}

/// Consumer end, owned by the worker thread
pub(crate) struct WorkerRx<W> {
    rx: Receiver<Envelope<W>>,
}

impl<W> WorkerRx<W> {
    /// Next work item; `None` once the worker is told to stop
    pub(crate) fn recv(&self) -> Option<W> {
        match self.rx.recv() {
            Ok(Envelope::Work(work)) => Some(work),
            Ok(Envelope::Stop) | Err(_) => None,
        }
    }

    pub(crate) fn recv_timeout(&self, timeout: Duration) -> Recv<W> {
        match self.rx.recv_timeout(timeout) {
            Ok(Envelope::Work(work)) => Recv::Work(work),
            Ok(Envelope::Stop) | Err(RecvTimeoutError::Disconnected) => Recv::Stopped,
            Err(RecvTimeoutError::Timeout) => Recv::Timeout,
        }
    }
}

/// Create the queue for a worker before the worker itself exists
pub(crate) fn work_queue<W>(name: &'static str, depth: usize) -> (WorkQueue<W>, WorkerRx<W>) {
    let (tx, rx) = channel::bounded(depth);
    (WorkQueue { name, tx }, WorkerRx { rx })
}

/// A running worker thread
pub(crate) struct Worker {
    name: &'static str,
    stop: Option<Box<dyn FnOnce() + Send>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start a thread running `body` over the queue's consumer end
    pub(crate) fn spawn<W, F>(queue: &WorkQueue<W>, rx: WorkerRx<W>, body: F) -> Result<Self>
    where
        W: Send + 'static,
        F: FnOnce(WorkerRx<W>) + Send + 'static,
    {
        let name = queue.name;
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(rx))?;

        let tx = queue.tx.clone();
        debug!("{}: started", name);
        Ok(Self {
            name,
            stop: Some(Box::new(move || {
                // Blocks if the queue is full; the worker drains it
                let _ = tx.send(Envelope::Stop);
            })),
            handle: Some(handle),
        })
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the worker to finish its queue and exit, then join it
    pub(crate) fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("{}: worker panicked", self.name);
            } else {
                debug!("{}: stopped", self.name);
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_work_runs_in_order() {
        let (queue, rx) = work_queue::<u32>("test-order", 16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut worker = {
            let seen = seen.clone();
            Worker::spawn(&queue, rx, move |rx| {
                while let Some(n) = rx.recv() {
                    seen.lock().unwrap().push(n);
                }
            })
            .unwrap()
        };

        for n in 0..10 {
            assert!(queue.queue(n));
        }
        worker.stop();
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_queue_full_does_not_block() {
        let (queue, _rx) = work_queue::<u32>("test-full", 2);
        assert!(queue.queue(1));
        assert!(queue.queue(2));
        assert!(!queue.queue(3));
    }

    #[test]
    fn test_queue_after_stop_fails() {
        let (queue, rx) = work_queue::<u32>("test-stopped", 4);
        let mut worker = Worker::spawn(&queue, rx, |rx| while rx.recv().is_some() {}).unwrap();
        assert_eq!(worker.name(), "test-stopped");
        worker.stop();
        assert!(!queue.queue(1));
    }

    #[test]
    fn test_recv_timeout() {
        let (queue, rx) = work_queue::<u32>("test-timeout", 4);
        let timeouts = Arc::new(AtomicUsize::new(0));
        let mut worker = {
            let timeouts = timeouts.clone();
            Worker::spawn(&queue, rx, move |rx| loop {
                match rx.recv_timeout(Duration::from_millis(5)) {
                    Recv::Work(_) => {}
                    Recv::Timeout => {
                        timeouts.fetch_add(1, Ordering::SeqCst);
                    }
                    Recv::Stopped => return,
                }
            })
            .unwrap()
        };

        thread::sleep(Duration::from_millis(50));
        worker.stop();
        assert!(timeouts.load(Ordering::SeqCst) > 0);
    }
}
