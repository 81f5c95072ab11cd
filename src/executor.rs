//! The `work` and `exit` executor pools.
//!
//! `work` runs operator recompute and observer dispatch for `BACK`
//! configured [`crate::input::In`] sources; `exit` runs deactivation
//! cascades so a `remove`/`decr` call doesn't pay for its own teardown.
//! `FRONT` dispatch bypasses both pools and runs synchronously on the
//! caller -- see [`crate::input::DispatchMode`].
//!
//! Submission never blocks: it is a `send` on an unbounded
//! `crossbeam_channel`. A pool only rejects work after `shutdown` has run,
//! at which point `spawn` returns [`ReactiveError::ShutdownInProgress`]
//! instead of panicking or blocking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};

use crate::error::{ReactiveError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of worker threads pulling from an unbounded queue.
pub struct Pool {
    label: &'static str,
    sender: parking_lot::Mutex<Option<Sender<Job>>>,
    shut_down: AtomicBool,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Pool {
    /// Spawn `threads` workers, each parked on the pool's job channel.
    pub fn new(label: &'static str, threads: usize) -> Self {
        let (sender, receiver) = unbounded::<Job>();
        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads.max(1) {
            let receiver = receiver.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("reactive-paths-{}-{}", label, index))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
                    .expect("failed to spawn executor thread"),
            );
        }
        log::info!("executor pool `{}` started with {} threads", label, threads);
        Pool {
            label,
            sender: parking_lot::Mutex::new(Some(sender)),
            shut_down: AtomicBool::new(false),
            handles: parking_lot::Mutex::new(handles),
        }
    }

    /// Schedule `job` to run on this pool. Never blocks.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            log::warn!("rejected work on `{}`: shutdown in progress", self.label);
            return Err(ReactiveError::ShutdownInProgress);
        }
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) if sender.send(Box::new(job)).is_ok() => Ok(()),
            _ => Err(ReactiveError::ShutdownInProgress),
        }
    }

    /// Stop accepting new work and join all worker threads.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        // Dropping the sender disconnects the channel; every worker's
        // `recv` then returns `Err` once the queue drains, and its loop
        // exits.
        self.sender.lock().take();
        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        log::info!("executor pool `{}` shutting down", self.label);
    }
}
