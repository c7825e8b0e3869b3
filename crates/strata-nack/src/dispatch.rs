//! Bounded worker pool for loss-report handling.
//!
//! Reports are queued on a bounded crossbeam channel and drained by a fixed
//! set of named threads. Submitting never blocks: a full queue hands the job
//! back to the caller.

use crossbeam_channel::{bounded, Sender, TrySendError};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

use crate::error::Result;

pub(crate) struct Dispatcher<T: Send + 'static> {
    tx: Option<Sender<T>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl<T: Send + 'static> Dispatcher<T> {
    pub(crate) fn spawn<F>(
        name: &str,
        workers: usize,
        queue_capacity: usize,
        handler: F,
    ) -> Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let (tx, rx) = bounded::<T>(queue_capacity);
        let handler = Arc::new(handler);
        let mut handles = Vec::with_capacity(workers);

        for i in 0..workers {
            let rx = rx.clone();
            let handler = Arc::clone(&handler);
            let handle = thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || {
                    // Ends once every sender is gone and the queue is drained.
                    for job in rx.iter() {
                        handler(job);
                    }
                })?;
            handles.push(handle);
        }

        debug!(name, workers, queue_capacity, "dispatcher started");
        Ok(Dispatcher {
            tx: Some(tx),
            workers: handles,
        })
    }

    /// Queue `job` without blocking.
    pub(crate) fn submit(&self, job: T) -> std::result::Result<(), TrySendError<T>> {
        match &self.tx {
            Some(tx) => tx.try_send(job),
            None => Err(TrySendError::Disconnected(job)),
        }
    }

    /// Jobs waiting for a worker.
    pub(crate) fn queued(&self) -> usize {
        self.tx.as_ref().map_or(0, Sender::len)
    }

    /// Stop accepting jobs, finish the queued ones and join the workers.
    pub(crate) fn shutdown(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("report worker panicked");
            }
        }
    }
}

impl<T: Send + 'static> Drop for Dispatcher<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex};

    #[test]
    fn runs_every_job_before_shutdown() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_w = Arc::clone(&seen);
        let mut d = Dispatcher::spawn("test", 3, 64, move |n: usize| {
            seen_w.fetch_add(n, Ordering::SeqCst);
        })
        .unwrap();

        for _ in 0..50 {
            d.submit(2).unwrap();
        }
        d.shutdown();
        assert_eq!(seen.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn full_queue_returns_job() {
        let gate = Arc::new(Barrier::new(2));
        let gate_w = Arc::clone(&gate);
        let started = Arc::new(Mutex::new(false));
        let started_w = Arc::clone(&started);
        let d = Dispatcher::spawn("test", 1, 1, move |_: u32| {
            *started_w.lock().unwrap() = true;
            gate_w.wait();
        })
        .unwrap();

        // Occupy the worker, then fill the single queue slot.
        d.submit(0).unwrap();
        while !*started.lock().unwrap() {
            thread::yield_now();
        }
        d.submit(1).unwrap();
        assert!(matches!(d.submit(2), Err(TrySendError::Full(2))));
        assert_eq!(d.queued(), 1);

        gate.wait();
        gate.wait();
    }

    #[test]
    fn submit_after_shutdown_is_disconnected() {
        let mut d = Dispatcher::spawn("test", 1, 4, |_: u8| {}).unwrap();
        d.shutdown();
        assert!(matches!(d.submit(1), Err(TrySendError::Disconnected(1))));
    }
}
