//! DPM802 panel meter driven over its RS232 output.

use crate::serial::SerialLink;
use crate::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

pub const FRAME_LEN: usize = 11;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2500);
const FLUSH_SETTLE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Function {
    Voltage,
    CurrentMicroAmp,
    CurrentMilliAmp,
    CurrentAmp,
    Adp0,
    Adp1,
    Adp2,
    Adp3,
}

impl Function {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0b011_1011 => Function::Voltage,
            0b011_1101 => Function::CurrentMicroAmp,
            0b011_1001 => Function::CurrentMilliAmp,
            0b011_1111 => Function::CurrentAmp,
            0b011_1110 => Function::Adp0,
            0b011_1100 => Function::Adp1,
            0b011_1000 => Function::Adp2,
            0b011_1010 => Function::Adp3,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Function::Voltage => "VOLTAGE",
            Function::CurrentMicroAmp => "CURRENT_UA",
            Function::CurrentMilliAmp => "CURRENT_MA",
            Function::CurrentAmp => "CURRENT_A",
            Function::Adp0 => "ADP0",
            Function::Adp1 => "ADP1",
            Function::Adp2 => "ADP2",
            Function::Adp3 => "ADP3",
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measure {
    pub function: Function,
    pub value: f64,
}

fn digit(byte: u8) -> Option<u32> {
    match byte {
        0x30..=0x39 => Some(u32::from(byte - 0x30)),
        _ => None,
    }
}

fn scale(range: u8, function: Function) -> Option<f64> {
    use Function::*;
    match (range, function) {
        (0x30, Voltage) => Some(0.0001),
        (0x30, CurrentMicroAmp) => Some(0.1),
        (0x30, CurrentMilliAmp) => Some(0.01),
        (0x30, CurrentAmp) => Some(0.01),
        (0x31, Voltage) => Some(0.001),
        (0x31, CurrentMicroAmp) => Some(1.0),
        (0x31, CurrentMilliAmp) => Some(0.1),
        (0x32, Voltage) => Some(0.01),
        (0x33, Voltage) => Some(0.1),
        (0x34, Voltage) => Some(1.0),
        _ => None,
    }
}

/// Decodes one 11-byte frame, trailing `\r\n` included.
pub fn decode_measure(frame: &[u8]) -> Result<Measure> {
    if frame.len() != FRAME_LEN || !frame.ends_with(b"\r\n") {
        return Err(Error::Framing(format!("DPM802 frame {frame:02X?}")));
    }
    let range = frame[0];
    let function = Function::from_byte(frame[5])
        .ok_or_else(|| Error::Parse(format!("DPM802 function 0x{:02X}", frame[5])))?;

    let mut magnitude: u32 = 0;
    for byte in &frame[1..5] {
        let value =
            digit(*byte).ok_or_else(|| Error::Parse(format!("DPM802 digit 0x{byte:02X}")))?;
        magnitude = magnitude * 10 + value;
    }
    let mut value = f64::from(magnitude);
    if frame[6] & (1 << 2) != 0 {
        value = -value;
    }

    let factor = scale(range, function).ok_or_else(|| {
        Error::Parse(format!("DPM802 has no scale for range 0x{range:02X} {function}"))
    })?;
    value *= factor;

    let measure = match function {
        Function::CurrentMicroAmp => Measure {
            function: Function::CurrentMilliAmp,
            value: value * 0.001,
        },
        Function::CurrentAmp => Measure {
            function: Function::CurrentMilliAmp,
            value: value * 1000.0,
        },
        _ => Measure { function, value },
    };
    Ok(measure)
}

pub struct Voltmeter<L> {
    link: L,
}

impl<L: SerialLink> Voltmeter<L> {
    pub fn new(link: L) -> Self {
        Self { link }
    }

    pub fn port_name(&self) -> String {
        self.link.name()
    }

    /// Waits for the next complete frame. Anything that is not 11 bytes long up to a
    /// `\r\n` is discarded.
    pub fn read_measure(&mut self, timeout: Duration) -> Result<Measure> {
        self.link.clear_input()?;
        std::thread::sleep(FLUSH_SETTLE);

        let deadline = Instant::now() + timeout;
        let mut pending: Vec<u8> = Vec::with_capacity(FRAME_LEN * 2);
        let mut chunk = [0u8; 32];
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout("DPM802 measure".into()));
            }
            let n = self.link.read_chunk(&mut chunk, deadline - now)?;
            pending.extend_from_slice(&chunk[..n]);
            while let Some(pos) = pending.windows(2).position(|w| w == b"\r\n") {
                let frame: Vec<u8> = pending.drain(..pos + 2).collect();
                if frame.len() == FRAME_LEN {
                    let measure = decode_measure(&frame)?;
                    debug!("DPM802 : {} --> {}", measure.function, measure.value);
                    return Ok(measure);
                }
            }
        }
    }

    /// Reads for `window`, drops the first sample when there are several, averages the
    /// rest.
    pub fn sample_average(&mut self, window: Duration, cancel: Option<&AtomicBool>) -> Result<f64> {
        let deadline = Instant::now() + window;
        let mut samples = Vec::new();
        while Instant::now() < deadline {
            if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                break;
            }
            samples.push(self.read_measure(DEFAULT_READ_TIMEOUT)?.value);
            debug!("voltage measured : {samples:?}");
        }
        average_settled(&samples).ok_or_else(|| Error::Timeout("no voltmeter sample".into()))
    }
}

/// Mean of the samples after the first one, or the only sample.
pub fn average_settled(samples: &[f64]) -> Option<f64> {
    match samples {
        [] => None,
        [only] => Some(*only),
        [_, rest @ ..] => Some(rest.iter().sum::<f64>() / rest.len() as f64),
    }
}

/// Builds the frame the meter sends for a value, used by simulated benches.
pub fn encode_measure(range: u8, digits: &str, function_byte: u8, negative: bool) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_LEN);
    frame.push(range);
    frame.extend(digits.bytes().take(4));
    frame.push(function_byte);
    frame.push(if negative { 1 << 2 } else { 0 });
    frame.extend([0x30, 0x30]);
    frame.extend(b"\r\n");
    frame
}
