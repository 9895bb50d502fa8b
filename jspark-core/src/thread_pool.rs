// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A tiny fixed-size worker pool shared by the outbox connect pool and the local-`ask`
//! delivery pool, which exists to prevent a re-entrant deadlock.
//! Every spawned thread is named via [`std::thread::Builder::name`] so panics and
//! `tracing` spans are attributable back to the pool that owns them.

use std::sync::{
    mpsc::{self, Sender},
    Arc, Mutex,
};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A bounded pool of daemon-like worker threads draining a shared job queue. `shutdown` and
/// `execute` both take `&self` -- the pool is meant to live behind an `Arc` shared by every
/// outbox and the dispatcher's deliver path, so a caller holding just one of those clones can
/// still drain and join it without needing exclusive ownership.
pub struct ThreadPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl ThreadPool {
    /// Spawns `size` threads named `"{name}-{n}"`, all reading from one shared job queue.
    pub fn new(name: &str, size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size)
            .map(|index| {
                let receiver = Arc::clone(&receiver);
                std::thread::Builder::new()
                    .name(format!("{name}-{index}"))
                    .spawn(move || loop {
                        let job = {
                            let queue = receiver.lock().unwrap_or_else(|p| p.into_inner());
                            queue.recv()
                        };
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    })
                    .expect("failed to spawn thread-pool worker")
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Submits `job` to the pool. Silently dropped if the pool has already been shut down.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        let sender = self.sender.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(sender) = sender.as_ref() {
            let _ = sender.send(Box::new(job));
        }
    }

    /// Closes the job queue and joins every worker thread. Idempotent: a second call finds
    /// an already-empty worker list and an already-closed sender, and simply returns.
    pub fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(|p| p.into_inner()).take();
        let mut workers = self.workers.lock().unwrap_or_else(|p| p.into_inner());
        for worker in workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn runs_every_submitted_job() {
        let pool = ThreadPool::new("test-pool", 3);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        drop(pool); // joins all workers, draining the queue first.
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }
}
