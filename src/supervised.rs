//! A background task paired with a watchdog that raises the task's stop flag once
//! its deadline passes.

use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct SupervisedTask<T> {
    name: String,
    task: JoinHandle<T>,
    watchdog: JoinHandle<()>,
    stop: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
}

impl<T: Send + 'static> SupervisedTask<T> {
    /// Starts `work` on its own thread. The closure must poll the flag it receives
    /// at every blocking point.
    pub fn spawn<F>(name: &str, timeout: Duration, work: F) -> Result<Self>
    where
        F: FnOnce(&AtomicBool) -> T + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));

        let task = {
            let stop = Arc::clone(&stop);
            let done = Arc::clone(&done);
            std::thread::Builder::new()
                .name(name.to_string())
                .spawn(move || {
                    let value = work(&stop);
                    done.store(true, Ordering::SeqCst);
                    value
                })?
        };

        let watchdog = {
            let stop = Arc::clone(&stop);
            let done = Arc::clone(&done);
            let label = name.to_string();
            std::thread::Builder::new()
                .name(format!("{name}-watchdog"))
                .spawn(move || {
                    let deadline = Instant::now() + timeout;
                    loop {
                        if done.load(Ordering::SeqCst) || stop.load(Ordering::SeqCst) {
                            return;
                        }
                        if Instant::now() >= deadline {
                            warn!(task = %label, ?timeout, "watchdog expired, stopping task");
                            stop.store(true, Ordering::SeqCst);
                            return;
                        }
                        std::thread::sleep(POLL_INTERVAL);
                    }
                })?
        };

        debug!(task = name, ?timeout, "supervised task started");
        Ok(Self {
            name: name.to_string(),
            task,
            watchdog,
            stop,
            done,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Blocks until the task returns.
    pub fn join(self) -> Result<T> {
        let value = self
            .task
            .join()
            .map_err(|_| Error::Cancelled(format!("task {} panicked", self.name)));
        // The task is over either way; release the watchdog.
        self.done.store(true, Ordering::SeqCst);
        if self.watchdog.join().is_err() {
            warn!(task = %self.name, "watchdog thread panicked");
        }
        value
    }
}
