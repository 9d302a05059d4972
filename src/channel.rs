//! Request/response over a line-oriented serial console.
//!
//! One attempt writes the command, then collects lines until a terminal pattern
//! matches or the timeout runs out. A line matching a failure marker makes the
//! attempt fail and it is retried, even if a terminal pattern matched too. Output
//! without any match is returned as is. Transport errors consume an attempt.

use crate::serial::{read_lines, LineRead, SerialLink, Transcript};
use crate::{Error, Result};
use regex::Regex;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Compiles a protocol pattern, reporting the offending text on failure.
pub fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|err| Error::InvalidArgs(format!("pattern '{pattern}': {err}")))
}

/// Runs `op` up to `attempts` times while it fails with an error `should_retry`
/// accepts. Exhaustion yields [`Error::CommandFailed`].
pub fn retry_attempts<T, F, P>(attempts: u32, label: &str, should_retry: P, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
    P: Fn(&Error) -> bool,
{
    let attempts = attempts.max(1);
    let mut last_response = Vec::new();
    for attempt in 1..=attempts {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(Error::CommandFailed {
                last_response: lines,
                ..
            }) => {
                warn!(command = label, attempt, "failure reported by device");
                last_response = lines;
            }
            Err(err) if should_retry(&err) => {
                warn!(command = label, attempt, error = %err, "attempt failed");
            }
            Err(err) => return Err(err),
        }
    }
    Err(Error::CommandFailed {
        command: label.to_string(),
        attempts,
        last_response,
    })
}

/// Static description of a line protocol.
#[derive(Debug, Clone)]
pub struct LineProtocol {
    /// Appended to every command on the wire.
    pub line_ending: &'static str,
    pub failure_markers: Vec<Regex>,
    pub transcript: Transcript,
}

/// One command to send.
#[derive(Debug, Clone)]
pub struct Request<'a> {
    pub command: &'a str,
    pub timeout: Option<Duration>,
    pub terminal: &'a [Regex],
    pub attempts: Option<u32>,
    /// Keeps the command and its response out of the log.
    pub quiet: bool,
    /// Ends the read early once raised.
    pub stop: Option<&'a AtomicBool>,
}

impl<'a> Request<'a> {
    pub fn new(command: &'a str, terminal: &'a [Regex]) -> Self {
        Self {
            command,
            timeout: None,
            terminal,
            attempts: None,
            quiet: false,
            stop: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn stop_on(mut self, stop: &'a AtomicBool) -> Self {
        self.stop = Some(stop);
        self
    }
}

/// Lines received for a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub lines: Vec<String>,
    pub terminated: bool,
}

impl Response {
    pub fn contains_match(&self, pattern: &Regex) -> bool {
        self.lines.iter().any(|line| pattern.is_match(line))
    }

    /// Lines glued back together without separators, so fields wrapped by the
    /// console still match.
    pub fn concatenated(&self) -> String {
        self.lines.concat()
    }
}

pub struct CommandChannel<L> {
    link: L,
    protocol: LineProtocol,
    default_timeout: Duration,
    default_attempts: u32,
}

impl<L: SerialLink> CommandChannel<L> {
    pub fn new(link: L, protocol: LineProtocol, default_timeout: Duration, default_attempts: u32) -> Self {
        Self {
            link,
            protocol,
            default_timeout,
            default_attempts: default_attempts.max(1),
        }
    }

    pub fn send(&mut self, request: &Request<'_>) -> Result<Response> {
        let attempts = request.attempts.unwrap_or(self.default_attempts);
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let label = if request.quiet {
            "<redacted>"
        } else {
            request.command
        };
        retry_attempts(
            attempts,
            label,
            |err| err.is_retryable(),
            |_| self.attempt(request, timeout),
        )
    }

    fn attempt(&mut self, request: &Request<'_>, timeout: Duration) -> Result<Response> {
        let transcript = if request.quiet {
            Transcript::Quiet
        } else {
            self.protocol.transcript
        };
        if !request.quiet {
            if let Transcript::Logged(target) = transcript {
                log_tx(target, request.command);
            }
        }
        let wire = format!("{}{}", request.command, self.protocol.line_ending);
        self.link.clear_input()?;
        self.link.write_bytes(wire.as_bytes())?;

        let deadline = Instant::now() + timeout;
        let read = read_lines(&mut self.link, deadline, request.terminal, transcript, request.stop)?;
        self.classify(read, request)
    }

    fn classify(&self, read: LineRead, request: &Request<'_>) -> Result<Response> {
        let failed = read.lines.iter().any(|line| {
            self.protocol
                .failure_markers
                .iter()
                .any(|marker| marker.is_match(line))
        });
        if failed {
            return Err(Error::CommandFailed {
                command: if request.quiet {
                    "<redacted>".to_string()
                } else {
                    request.command.to_string()
                },
                attempts: 1,
                last_response: read.lines,
            });
        }
        if !read.is_terminated() {
            debug!(
                lines = read.lines.len(),
                "no terminal pattern before timeout"
            );
        }
        Ok(Response {
            terminated: read.is_terminated(),
            lines: read.lines,
        })
    }

    /// Writes raw text without waiting for anything.
    pub fn write_raw(&mut self, text: &str) -> Result<()> {
        self.link.write_bytes(text.as_bytes())
    }

    /// Reads lines without sending a command.
    pub fn read_until(
        &mut self,
        timeout: Duration,
        terminal: &[Regex],
        stop: Option<&AtomicBool>,
    ) -> Result<LineRead> {
        let deadline = Instant::now() + timeout;
        read_lines(
            &mut self.link,
            deadline,
            terminal,
            self.protocol.transcript,
            stop,
        )
    }

    pub fn clear_input(&mut self) -> Result<()> {
        self.link.clear_input()
    }

    pub fn link_name(&self) -> String {
        self.link.name()
    }
}

fn log_tx(target: &'static str, command: &str) {
    if target == crate::SBC_TARGET {
        debug!(target: crate::SBC_TARGET, "TX: {command}");
    } else {
        debug!("TX: {command}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::fake::FakeSerialPort;
    use std::sync::{Arc, Mutex};

    fn protocol() -> LineProtocol {
        LineProtocol {
            line_ending: "\n",
            failure_markers: vec![Regex::new(r"^\s*z\s*$").unwrap()],
            transcript: Transcript::Quiet,
        }
    }

    fn channel(port: FakeSerialPort) -> CommandChannel<FakeSerialPort> {
        CommandChannel::new(port, protocol(), Duration::from_millis(80), 3)
    }

    #[test]
    fn terminal_match_returns_lines() {
        let port = FakeSerialPort::with_responder(|_| b"echo\r\ny\r\n".to_vec());
        let terminal = [Regex::new(r"^\s*y\s*$").unwrap()];
        let response = channel(port.clone()).send(&Request::new("a", &terminal)).unwrap();
        assert!(response.terminated);
        assert_eq!(response.lines, vec!["echo", "y"]);
        assert_eq!(port.written_text(), vec!["a\n"]);
    }

    #[test]
    fn failure_marker_is_retried_until_exhausted() {
        let port = FakeSerialPort::with_responder(|_| b"y\nz\n".to_vec());
        let terminal = [Regex::new("never").unwrap()];
        let err = channel(port.clone())
            .send(&Request::new("g", &terminal))
            .unwrap_err();
        match err {
            Error::CommandFailed {
                command,
                attempts,
                last_response,
            } => {
                assert_eq!(command, "g");
                assert_eq!(attempts, 3);
                assert_eq!(last_response, vec!["y", "z"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(port.writes().len(), 3);
    }

    #[test]
    fn failure_marker_wins_over_terminal_match() {
        let answers = Arc::new(Mutex::new(vec![b"ok\n".to_vec(), b"z\nok\n".to_vec()]));
        let port = FakeSerialPort::with_responder(move |_| answers.lock().unwrap().pop().unwrap_or_default());
        let terminal = [Regex::new("^ok$").unwrap()];
        // The first answer is "z" then "ok": the read stops at "ok" but "z" was seen.
        let response = channel(port.clone()).send(&Request::new("c", &terminal)).unwrap();
        assert_eq!(response.lines, vec!["ok"]);
        assert_eq!(port.writes().len(), 2);
    }

    #[test]
    fn unmatched_output_is_returned_without_retry() {
        let port = FakeSerialPort::with_responder(|_| b"noise\n".to_vec());
        let terminal = [Regex::new("^ok$").unwrap()];
        let response = channel(port.clone()).send(&Request::new("x", &terminal)).unwrap();
        assert!(!response.terminated);
        assert_eq!(response.lines, vec!["noise"]);
        assert_eq!(port.writes().len(), 1);
    }

    #[test]
    fn transport_errors_consume_attempts() {
        let port = FakeSerialPort::default();
        port.fail_writes(10);
        let terminal = [Regex::new("^ok$").unwrap()];
        let err = channel(port.clone())
            .send(&Request::new("x", &terminal).attempts(4))
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { attempts: 4, .. }));
        assert_eq!(port.writes().len(), 4);
    }

    #[test]
    fn quiet_commands_are_redacted_in_errors() {
        let port = FakeSerialPort::default();
        port.fail_writes(10);
        let err = channel(port)
            .send(&Request::new("hunter2", &[]).attempts(1).quiet())
            .unwrap_err();
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn non_retryable_errors_propagate() {
        let calls = std::cell::Cell::new(0);
        let result: Result<()> = retry_attempts(5, "op", |e| e.is_retryable(), |_| {
            calls.set(calls.get() + 1);
            Err(Error::Parse("bad".into()))
        });
        assert!(matches!(result, Err(Error::Parse(_))));
        assert_eq!(calls.get(), 1);
    }
}
