//! Result recorder: one FIFO queue and worker thread per destination.
//!
//! Delivery outcomes only reach the caller through the item's callback; a failing
//! sink never stops its worker.

pub mod sinks;

pub use sinks::{classify_response, HttpSink, LocalFileSink};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const ENQUEUE_WAIT: Duration = Duration::from_millis(500);
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("recording server returned invalid content: {status}")]
    InvalidContent { status: u16, body: String },
    #[error("recording server returned status code: {status}")]
    Status { status: u16, body: String },
    #[error("{0} queue full")]
    QueueFull(Database),
    #[error("no completion within {0:?}")]
    Timeout(Duration),
    #[error("{database} delivery failed: {message}")]
    Delivery { database: Database, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Database {
    Local,
    Online,
}

impl Database {
    pub const ALL: [Database; 2] = [Database::Local, Database::Online];

    pub fn bit(&self) -> u8 {
        match self {
            Database::Local => 1 << 0,
            Database::Online => 1 << 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Database::Local => "LOCAL",
            Database::Online => "ONLINE",
        }
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destinations(u8);

impl Destinations {
    pub const LOCAL: Destinations = Destinations(1 << 0);
    pub const ONLINE: Destinations = Destinations(1 << 1);
    pub const BOTH: Destinations = Destinations(0b11);

    pub fn contains(&self, database: Database) -> bool {
        self.0 & database.bit() != 0
    }

    pub fn count(&self) -> usize {
        Database::ALL.iter().filter(|db| self.contains(**db)).count()
    }
}

impl std::ops::BitOr for Destinations {
    type Output = Destinations;

    fn bitor(self, rhs: Self) -> Self::Output {
        Destinations(self.0 | rhs.0)
    }
}

pub type Record = Arc<Value>;
pub type RecordCallback = Arc<dyn Fn(Database, &Record, Option<&RecorderError>) + Send + Sync>;

pub struct RecordQueueItem {
    pub record: Record,
    pub callback: Option<RecordCallback>,
}

/// A place records are written to.
pub trait Sink: Send {
    fn write(&mut self, record: &Value) -> Result<(), RecorderError>;
}

pub struct Recorder {
    local: Sender<RecordQueueItem>,
    online: Sender<RecordQueueItem>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl Recorder {
    /// Spawns both workers. They exit once `stop` is raised and their queue is drained.
    pub fn start(
        local: Box<dyn Sink>,
        online: Box<dyn Sink>,
        capacity: usize,
        stop: Arc<AtomicBool>,
    ) -> crate::Result<Self> {
        let (local_tx, local_rx) = bounded(capacity.max(1));
        let (online_tx, online_rx) = bounded(capacity.max(1));
        let workers = vec![
            spawn_worker(Database::Local, local, local_rx, Arc::clone(&stop))?,
            spawn_worker(Database::Online, online, online_rx, Arc::clone(&stop))?,
        ];
        Ok(Self {
            local: local_tx,
            online: online_tx,
            stop,
            workers,
        })
    }

    fn queue(&self, database: Database) -> &Sender<RecordQueueItem> {
        match database {
            Database::Local => &self.local,
            Database::Online => &self.online,
        }
    }

    /// Enqueues `record` for every destination in the mask, waiting briefly on a full
    /// queue.
    pub fn record(
        &self,
        record: Record,
        callback: Option<RecordCallback>,
        destinations: Destinations,
    ) -> Result<(), RecorderError> {
        for database in Database::ALL {
            if !destinations.contains(database) {
                continue;
            }
            let item = RecordQueueItem {
                record: Arc::clone(&record),
                callback: callback.clone(),
            };
            match self.queue(database).send_timeout(item, ENQUEUE_WAIT) {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) | Err(SendTimeoutError::Disconnected(_)) => {
                    warn!(database = %database, "record dropped, queue unavailable");
                    return Err(RecorderError::QueueFull(database));
                }
            }
        }
        Ok(())
    }

    /// Enqueues and blocks until every destination reported back or `timeout` passes.
    /// The first delivery failure is returned.
    pub fn record_and_wait(
        &self,
        record: Record,
        destinations: Destinations,
        timeout: Duration,
    ) -> Result<(), RecorderError> {
        let (done_tx, done_rx) = bounded::<(Database, Option<String>)>(Database::ALL.len());
        let callback: RecordCallback = Arc::new(move |database, _record, err| {
            let _ = done_tx.send((database, err.map(|e| e.to_string())));
        });
        self.record(record, Some(callback), destinations)?;

        let deadline = std::time::Instant::now() + timeout;
        let mut failure = None;
        for _ in 0..destinations.count() {
            let left = deadline.saturating_duration_since(std::time::Instant::now());
            match done_rx.recv_timeout(left) {
                Ok((database, Some(message))) => {
                    failure.get_or_insert(RecorderError::Delivery { database, message });
                }
                Ok((_, None)) => {}
                Err(_) => return Err(RecorderError::Timeout(timeout)),
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Raises the stop flag and waits for both workers to drain.
    pub fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        for worker in self.workers {
            if worker.join().is_err() {
                error!("recorder worker panicked");
            }
        }
    }
}

fn spawn_worker(
    database: Database,
    mut sink: Box<dyn Sink>,
    queue: Receiver<RecordQueueItem>,
    stop: Arc<AtomicBool>,
) -> crate::Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name(format!("recorder-{}", database.as_str().to_lowercase()))
        .spawn(move || loop {
            match queue.recv_timeout(POLL_INTERVAL) {
                Ok(item) => {
                    debug!(database = %database, "{} record : {}", database, item.record);
                    let outcome = sink.write(&item.record);
                    if let Err(err) = &outcome {
                        error!(database = %database, error = %err, "record failed");
                    }
                    if let Some(callback) = item.callback {
                        callback(database, &item.record, outcome.as_ref().err());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        })?;
    Ok(handle)
}
