use super::SerialLink;
use crate::Result;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const READ_SLICE: Duration = Duration::from_millis(50);

/// How received lines are echoed to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transcript {
    /// Logged at debug level under the given target.
    Logged(&'static str),
    Quiet,
}

/// Lines collected by [`read_lines`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineRead {
    pub lines: Vec<String>,
    /// Index of the terminal pattern that ended the read.
    pub matched: Option<usize>,
}

impl LineRead {
    pub fn is_terminated(&self) -> bool {
        self.matched.is_some()
    }
}

/// Collects trimmed, non-empty lines until one matches a terminal pattern or
/// `deadline` passes.
///
/// Patterns are searched anywhere in a line; anchor them when needed. A partial line
/// without its newline is also tested so prompts such as `login:` end the read.
/// Whatever partial line remains at the deadline is returned as the last line.
pub fn read_lines<L: SerialLink + ?Sized>(
    link: &mut L,
    deadline: Instant,
    terminal: &[Regex],
    transcript: Transcript,
    stop: Option<&AtomicBool>,
) -> Result<LineRead> {
    let mut pending: Vec<u8> = Vec::new();
    let mut out = LineRead::default();
    let mut chunk = [0u8; 256];

    loop {
        if stop.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let n = link.read_chunk(&mut chunk, (deadline - now).min(READ_SLICE))?;
        if n == 0 {
            continue;
        }
        pending.extend_from_slice(&chunk[..n]);

        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=pos).collect();
            let Some(line) = decode_line(&raw) else {
                continue;
            };
            if line.is_empty() {
                continue;
            }
            echo(transcript, &line);
            let matched = match_index(terminal, &line);
            out.lines.push(line);
            if matched.is_some() {
                out.matched = matched;
                return Ok(out);
            }
        }

        if !pending.is_empty() {
            if let Some(line) = decode_line(&pending) {
                if let Some(index) = match_index(terminal, &line) {
                    echo(transcript, &line);
                    out.lines.push(line);
                    out.matched = Some(index);
                    return Ok(out);
                }
            }
        }
    }

    if let Some(line) = decode_line(&pending) {
        if !line.is_empty() {
            echo(transcript, &line);
            out.lines.push(line);
        }
    }
    Ok(out)
}

fn decode_line(raw: &[u8]) -> Option<String> {
    match std::str::from_utf8(raw) {
        Ok(text) => Some(text.trim().to_string()),
        Err(err) => {
            warn!(error = %err, "dropping undecodable line");
            None
        }
    }
}

fn match_index(patterns: &[Regex], line: &str) -> Option<usize> {
    patterns.iter().position(|pattern| pattern.is_match(line))
}

fn echo(transcript: Transcript, line: &str) {
    if let Transcript::Logged(target) = transcript {
        // Targets must be constant.
        if target == crate::SBC_TARGET {
            debug!(target: crate::SBC_TARGET, "RX: {line}");
        } else {
            debug!("RX: {line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::fake::{FakeSerialEntry, FakeSerialPort};

    fn soon(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[test]
    fn stops_at_first_terminal_line() {
        let mut fake = FakeSerialPort::with_script(vec![
            FakeSerialEntry::text("boot\r\n\r\nready\r\nafter\r\n"),
        ]);
        let terminal = [Regex::new("^ready$").unwrap()];
        let read = read_lines(&mut fake, soon(200), &terminal, Transcript::Quiet, None).unwrap();
        assert_eq!(read.lines, vec!["boot", "ready"]);
        assert_eq!(read.matched, Some(0));
    }

    #[test]
    fn prompt_without_newline_terminates() {
        let mut fake = FakeSerialPort::with_script(vec![FakeSerialEntry::text("CM4 login: ")]);
        let terminal = [Regex::new("pego@CM4").unwrap(), Regex::new("CM4 login:").unwrap()];
        let read = read_lines(&mut fake, soon(200), &terminal, Transcript::Quiet, None).unwrap();
        assert_eq!(read.lines, vec!["CM4 login:"]);
        assert_eq!(read.matched, Some(1));
    }

    #[test]
    fn deadline_returns_partial_output() {
        let mut fake = FakeSerialPort::with_script(vec![FakeSerialEntry::text("one\ntw")]);
        let terminal = [Regex::new("never").unwrap()];
        let started = Instant::now();
        let read = read_lines(&mut fake, soon(60), &terminal, Transcript::Quiet, None).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert_eq!(read.lines, vec!["one", "tw"]);
        assert!(!read.is_terminated());
    }

    #[test]
    fn invalid_utf8_lines_are_skipped() {
        let mut fake = FakeSerialPort::new(vec![Ok(vec![0xC3, 0x28, b'\n', b'o', b'k', b'\n'])]);
        let terminal = [Regex::new("^ok$").unwrap()];
        let read = read_lines(&mut fake, soon(200), &terminal, Transcript::Quiet, None).unwrap();
        assert_eq!(read.lines, vec!["ok"]);
    }

    #[test]
    fn stop_flag_ends_read_early() {
        let mut fake = FakeSerialPort::default();
        let stop = AtomicBool::new(true);
        let started = Instant::now();
        let read = read_lines(&mut fake, soon(2_000), &[], Transcript::Quiet, Some(&stop)).unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(read.lines.is_empty());
    }
}
