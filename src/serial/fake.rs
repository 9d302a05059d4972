use super::SerialLink;
use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const IDLE_POLL: Duration = Duration::from_millis(5);

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

pub struct FakeSerialEntry {
    response: Result<Vec<u8>>,
    delay: Option<Duration>,
}

impl FakeSerialEntry {
    pub fn immediate(response: Result<Vec<u8>>) -> Self {
        Self {
            response,
            delay: None,
        }
    }

    pub fn with_delay(response: Result<Vec<u8>>, delay: Duration) -> Self {
        Self {
            response,
            delay: Some(delay),
        }
    }

    pub fn text(text: &str) -> Self {
        Self::immediate(Ok(text.as_bytes().to_vec()))
    }
}

impl From<Result<Vec<u8>>> for FakeSerialEntry {
    fn from(response: Result<Vec<u8>>) -> Self {
        Self::immediate(response)
    }
}

#[derive(Default)]
struct FakeState {
    script: VecDeque<FakeSerialEntry>,
    pending: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    responder: Option<Responder>,
    failing_writes: u32,
    clears: u32,
}

/// Scripted serial device for tests.
///
/// Script entries are bytes that arrive later; bytes produced by the responder on a
/// write are already received and are dropped by `clear_input`. Clones share state,
/// so a test can keep one handle while a client owns the other.
#[derive(Clone, Default)]
pub struct FakeSerialPort {
    state: Arc<Mutex<FakeState>>,
    name: String,
}

impl FakeSerialPort {
    pub fn new(script: Vec<Result<Vec<u8>>>) -> Self {
        Self::with_script(script.into_iter().map(FakeSerialEntry::from).collect())
    }

    pub fn with_script(script: Vec<FakeSerialEntry>) -> Self {
        let port = Self {
            state: Arc::default(),
            name: "fake".to_string(),
        };
        port.lock().script = script.into();
        port
    }

    /// Answers every write with the bytes returned by `responder`.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let port = Self::with_script(Vec::new());
        port.lock().responder = Some(Box::new(responder));
        port
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn push(&self, entry: FakeSerialEntry) {
        self.lock().script.push_back(entry);
    }

    pub fn push_text(&self, text: &str) {
        self.push(FakeSerialEntry::text(text));
    }

    /// Makes the next `count` writes fail with a timeout.
    pub fn fail_writes(&self, count: u32) {
        self.lock().failing_writes = count;
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    pub fn written_text(&self) -> Vec<String> {
        self.lock()
            .writes
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    pub fn clear_count(&self) -> u32 {
        self.lock().clears
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SerialLink for FakeSerialPort {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.lock();
        state.writes.push(bytes.to_vec());
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(Error::Timeout(format!("{} write", self.name)));
        }
        if let Some(responder) = state.responder.as_mut() {
            let reply = responder(bytes);
            state.pending.extend(reply);
        }
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let delay = {
            let mut state = self.lock();
            if !state.pending.is_empty() {
                let n = buf.len().min(state.pending.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = state.pending.pop_front().unwrap_or_default();
                }
                return Ok(n);
            }
            match state.script.front_mut() {
                None => None,
                Some(entry) => match entry.delay {
                    Some(delay) if delay > timeout => {
                        entry.delay = Some(delay - timeout);
                        Some((timeout, false))
                    }
                    Some(delay) => {
                        entry.delay = None;
                        Some((delay, true))
                    }
                    None => Some((Duration::ZERO, true)),
                },
            }
        };

        match delay {
            None => {
                std::thread::sleep(timeout.min(IDLE_POLL));
                Ok(0)
            }
            Some((wait, ready)) => {
                if !wait.is_zero() {
                    std::thread::sleep(wait);
                }
                if !ready {
                    return Ok(0);
                }
                let mut state = self.lock();
                let Some(entry) = state.script.pop_front() else {
                    return Ok(0);
                };
                let bytes = entry.response?;
                state.pending.extend(bytes);
                let n = buf.len().min(state.pending.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = state.pending.pop_front().unwrap_or_default();
                }
                Ok(n)
            }
        }
    }

    fn clear_input(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.pending.clear();
        state.clears += 1;
        Ok(())
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
