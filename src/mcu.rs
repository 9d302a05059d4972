//! Test firmware console of the MCU under test.
//!
//! Each diagnostic is one character; the firmware answers with a line such as `y`
//! (pass), the echoed command, or `z` (fail).

use crate::channel::{compile, CommandChannel, LineProtocol, Request};
use crate::serial::{SerialLink, Transcript};
use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_ATTEMPTS: u32 = 5;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-command read windows, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct McuTimeouts {
    pub shutter_ms: u64,
    pub dac_ms: u64,
    pub radar_square_wave_ms: u64,
    pub radar_no_motion_ms: u64,
    pub radar_motion_ms: u64,
    pub radar_noise_ms: u64,
    pub external_gpio_ms: u64,
    pub heat_sensor_ms: u64,
    pub tof_sensor_ms: u64,
    pub wdg_stm_ms: u64,
    pub wdg_som_ms: u64,
    pub som_gpio_ms: u64,
}

impl Default for McuTimeouts {
    fn default() -> Self {
        Self {
            shutter_ms: 4_000,
            dac_ms: 3_000,
            radar_square_wave_ms: 4_000,
            radar_no_motion_ms: 4_000,
            radar_motion_ms: 15_000,
            radar_noise_ms: 8_000,
            external_gpio_ms: 3_000,
            heat_sensor_ms: 4_000,
            tof_sensor_ms: 8_000,
            wdg_stm_ms: 4_000,
            wdg_som_ms: 7_000,
            som_gpio_ms: 7_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sensor {
    One,
    Two,
    Three,
    Four,
}

impl Sensor {
    pub const ALL: [Sensor; 4] = [Sensor::One, Sensor::Two, Sensor::Three, Sensor::Four];

    pub fn number(&self) -> u8 {
        match self {
            Sensor::One => 1,
            Sensor::Two => 2,
            Sensor::Three => 3,
            Sensor::Four => 4,
        }
    }
}

/// The six external IO lines driven by the MCU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalLine {
    L1,
    L2,
    L3,
    L4,
    L5,
    L6,
}

impl ExternalLine {
    pub const ALL: [ExternalLine; 6] = [
        ExternalLine::L1,
        ExternalLine::L2,
        ExternalLine::L3,
        ExternalLine::L4,
        ExternalLine::L5,
        ExternalLine::L6,
    ];
}

/// SBC header pins wired to the MCU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SomPin {
    Gpio18,
    Gpio23,
    Gpio24,
    Gpio25,
}

impl SomPin {
    pub const ALL: [SomPin; 4] = [SomPin::Gpio18, SomPin::Gpio23, SomPin::Gpio24, SomPin::Gpio25];

    pub fn number(&self) -> u8 {
        match self {
            SomPin::Gpio18 => 18,
            SomPin::Gpio23 => 23,
            SomPin::Gpio24 => 24,
            SomPin::Gpio25 => 25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum McuCommand {
    ShutterOn,
    ShutterOff,
    Dac1,
    Dac2,
    RadarSquareWave,
    RadarNoMotion,
    RadarMotion,
    RadarNoise,
    ExternalGpio { line: ExternalLine, on: bool },
    Heat(Sensor),
    Tof(Sensor),
    WdgStm,
    WdgSomOn,
    WdgSomOff,
    SomGpio { pin: SomPin, on: bool },
}

impl McuCommand {
    /// Character written to the console.
    pub fn code(&self) -> char {
        match self {
            McuCommand::ShutterOn => 'B',
            McuCommand::ShutterOff => 'C',
            McuCommand::Dac1 => 'a',
            McuCommand::Dac2 => 'b',
            McuCommand::RadarSquareWave => 'm',
            McuCommand::RadarNoMotion => 'k',
            McuCommand::RadarMotion => 'l',
            McuCommand::RadarNoise => 'n',
            McuCommand::ExternalGpio { line, on } => match (line, on) {
                (ExternalLine::L1, true) => 'D',
                (ExternalLine::L1, false) => 'E',
                (ExternalLine::L2, true) => 'F',
                (ExternalLine::L2, false) => 'G',
                (ExternalLine::L3, true) => 'H',
                (ExternalLine::L3, false) => 'I',
                (ExternalLine::L4, true) => 'J',
                (ExternalLine::L4, false) => 'K',
                (ExternalLine::L5, true) => 'L',
                (ExternalLine::L5, false) => 'M',
                (ExternalLine::L6, true) => 'N',
                (ExternalLine::L6, false) => 'O',
            },
            McuCommand::Heat(sensor) => match sensor {
                Sensor::One => 'g',
                Sensor::Two => 'h',
                Sensor::Three => 'i',
                Sensor::Four => 'j',
            },
            McuCommand::Tof(sensor) => match sensor {
                Sensor::One => 'c',
                Sensor::Two => 'd',
                Sensor::Three => 'e',
                Sensor::Four => 'f',
            },
            McuCommand::WdgStm => 'P',
            McuCommand::WdgSomOn => 'w',
            McuCommand::WdgSomOff => 'A',
            McuCommand::SomGpio { pin, on } => match (pin, on) {
                (SomPin::Gpio18, true) => 'o',
                (SomPin::Gpio18, false) => 'p',
                (SomPin::Gpio23, true) => 'q',
                (SomPin::Gpio23, false) => 'r',
                (SomPin::Gpio24, true) => 's',
                (SomPin::Gpio24, false) => 't',
                (SomPin::Gpio25, true) => 'u',
                (SomPin::Gpio25, false) => 'v',
            },
        }
    }

    /// Line the firmware prints on success.
    pub fn expected(&self) -> char {
        match self {
            McuCommand::Dac1
            | McuCommand::Dac2
            | McuCommand::RadarSquareWave
            | McuCommand::RadarNoMotion
            | McuCommand::RadarMotion
            | McuCommand::RadarNoise
            | McuCommand::Heat(_)
            | McuCommand::Tof(_)
            | McuCommand::WdgStm => 'y',
            McuCommand::ShutterOn
            | McuCommand::ShutterOff
            | McuCommand::ExternalGpio { .. }
            | McuCommand::WdgSomOn
            | McuCommand::WdgSomOff
            | McuCommand::SomGpio { .. } => self.code(),
        }
    }

    pub fn timeout(&self, timeouts: &McuTimeouts) -> Duration {
        let ms = match self {
            McuCommand::ShutterOn | McuCommand::ShutterOff => timeouts.shutter_ms,
            McuCommand::Dac1 | McuCommand::Dac2 => timeouts.dac_ms,
            McuCommand::RadarSquareWave => timeouts.radar_square_wave_ms,
            McuCommand::RadarNoMotion => timeouts.radar_no_motion_ms,
            McuCommand::RadarMotion => timeouts.radar_motion_ms,
            McuCommand::RadarNoise => timeouts.radar_noise_ms,
            McuCommand::ExternalGpio { .. } => timeouts.external_gpio_ms,
            McuCommand::Heat(_) => timeouts.heat_sensor_ms,
            McuCommand::Tof(_) => timeouts.tof_sensor_ms,
            McuCommand::WdgStm => timeouts.wdg_stm_ms,
            McuCommand::WdgSomOn | McuCommand::WdgSomOff => timeouts.wdg_som_ms,
            McuCommand::SomGpio { .. } => timeouts.som_gpio_ms,
        };
        Duration::from_millis(ms)
    }
}

/// Outcome of one console command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult<T> {
    pub raw: Vec<String>,
    pub data: T,
    pub success: bool,
}

impl CommandResult<bool> {
    fn failed(raw: Vec<String>) -> Self {
        Self {
            raw,
            data: false,
            success: false,
        }
    }
}

pub fn mcu_protocol() -> Result<LineProtocol> {
    Ok(LineProtocol {
        line_ending: "",
        failure_markers: vec![
            compile(r"^\s*z\s*$")?,
            compile(r"^\s*\+\w+\s*:\s*(BADARG|FAIL)\s*$")?,
        ],
        transcript: Transcript::Logged("mcu"),
    })
}

pub struct McuClient<L> {
    channel: CommandChannel<L>,
    timeouts: McuTimeouts,
}

impl<L: SerialLink> McuClient<L> {
    pub fn new(
        link: L,
        attempts: u32,
        default_timeout: Duration,
        timeouts: McuTimeouts,
    ) -> Result<Self> {
        Ok(Self {
            channel: CommandChannel::new(link, mcu_protocol()?, default_timeout, attempts),
            timeouts,
        })
    }

    pub fn port_name(&self) -> String {
        self.channel.link_name()
    }

    pub fn run(&mut self, command: McuCommand) -> Result<CommandResult<bool>> {
        let timeout = command.timeout(&self.timeouts);
        self.simple_check(
            &command.code().to_string(),
            &command.expected().to_string(),
            Some(timeout),
        )
    }

    /// Sends `base` and passes when a line is exactly `check`. A device-reported
    /// failure that survives every retry is a failed result, not an error.
    pub fn simple_check(
        &mut self,
        base: &str,
        check: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult<bool>> {
        let pattern = exact_line(check)?;
        let terminal = [pattern.clone()];
        let mut request = Request::new(base, &terminal);
        request.timeout = timeout;
        let response = match self.channel.send(&request) {
            Ok(response) => response,
            Err(Error::CommandFailed {
                attempts,
                last_response,
                ..
            }) => {
                warn!(command = base, attempts, "MCU reported failure");
                return Ok(CommandResult::failed(last_response));
            }
            Err(err) => return Err(err),
        };
        let success = response.contains_match(&pattern);
        Ok(CommandResult {
            raw: response.lines,
            data: success,
            success,
        })
    }

    /// Sends `base+check` and parses `+check:<n>` from a response that ends in `OK`.
    pub fn simple_int(
        &mut self,
        base: &str,
        check: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult<Option<i64>>> {
        let command = format!("{base}+{check}");
        let terminal = [exact_line("OK")?];
        let mut request = Request::new(&command, &terminal);
        request.timeout = timeout;
        let response = self.channel.send(&request)?;
        if !response.lines.iter().any(|line| line == "OK") {
            return Ok(CommandResult {
                raw: response.lines,
                data: None,
                success: false,
            });
        }
        let value_re = compile(&format!(
            r"^\s*\+{}\s*:\s*<\s*(-?\d+)\s*>\s*$",
            regex::escape(check)
        ))?;
        let data = response
            .lines
            .iter()
            .find_map(|line| value_re.captures(line))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<i64>().ok());
        Ok(CommandResult {
            success: data.is_some(),
            raw: response.lines,
            data,
        })
    }

    /// Drives all external lines to `on`, one command per line.
    pub fn set_external_gpios(&mut self, on: bool) -> Result<Vec<CommandResult<bool>>> {
        let mut results = Vec::with_capacity(ExternalLine::ALL.len());
        for line in ExternalLine::ALL {
            results.push(self.run(McuCommand::ExternalGpio { line, on })?);
        }
        info!(on, passed = results.iter().filter(|r| r.success).count(), "external GPIOs set");
        Ok(results)
    }
}

fn exact_line(text: &str) -> Result<Regex> {
    compile(&format!(r"^\s*{}\s*$", regex::escape(text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::fake::FakeSerialPort;
    use std::sync::{Arc, Mutex};

    fn client(port: FakeSerialPort, attempts: u32) -> McuClient<FakeSerialPort> {
        let timeouts = McuTimeouts {
            heat_sensor_ms: 60,
            tof_sensor_ms: 60,
            ..McuTimeouts::default()
        };
        McuClient::new(port, attempts, Duration::from_millis(60), timeouts).unwrap()
    }

    #[test]
    fn command_table() {
        assert_eq!(McuCommand::RadarSquareWave.code(), 'm');
        assert_eq!(McuCommand::RadarSquareWave.expected(), 'y');
        assert_eq!(McuCommand::ShutterOn.expected(), 'B');
        let gpio = McuCommand::SomGpio {
            pin: SomPin::Gpio24,
            on: false,
        };
        assert_eq!((gpio.code(), gpio.expected()), ('t', 't'));
        assert_eq!(
            McuCommand::RadarMotion.timeout(&McuTimeouts::default()),
            Duration::from_secs(15)
        );
    }

    #[test]
    fn heat_sensor_passes_on_y() {
        let port = FakeSerialPort::with_responder(|_| b"y\r\n".to_vec());
        let result = client(port.clone(), 5).run(McuCommand::Heat(Sensor::One)).unwrap();
        assert!(result.success);
        assert_eq!(result.raw, vec!["y"]);
        assert_eq!(port.written_text(), vec!["g"]);
    }

    #[test]
    fn persistent_z_is_a_failed_result_after_retries() {
        let port = FakeSerialPort::with_responder(|_| b"z\r\n".to_vec());
        let result = client(port.clone(), 5).run(McuCommand::Tof(Sensor::Two)).unwrap();
        assert!(!result.success);
        assert_eq!(result.raw, vec!["z"]);
        assert_eq!(port.writes().len(), 5);
    }

    #[test]
    fn z_then_y_passes_on_second_attempt() {
        let replies = Arc::new(Mutex::new(vec![b"y\r\n".to_vec(), b"z\r\n".to_vec()]));
        let port = FakeSerialPort::with_responder(move |_| replies.lock().unwrap().pop().unwrap_or_default());
        let result = client(port.clone(), 5).run(McuCommand::Heat(Sensor::Three)).unwrap();
        assert!(result.success);
        assert_eq!(port.writes().len(), 2);
    }

    #[test]
    fn silence_is_a_failed_result_without_retry() {
        let port = FakeSerialPort::default();
        let result = client(port.clone(), 5).run(McuCommand::Heat(Sensor::Four)).unwrap();
        assert!(!result.success);
        assert!(result.raw.is_empty());
        assert_eq!(port.writes().len(), 1);
    }

    #[test]
    fn simple_int_parses_value() {
        let port = FakeSerialPort::with_responder(|_| b"+TEMP:<-12>\r\nOK\r\n".to_vec());
        let result = client(port.clone(), 1)
            .simple_int("AT", "TEMP", None)
            .unwrap();
        assert_eq!(result.data, Some(-12));
        assert_eq!(port.written_text(), vec!["AT+TEMP"]);
    }

    #[test]
    fn simple_int_requires_ok() {
        let port = FakeSerialPort::with_responder(|_| b"+TEMP:<5>\r\n".to_vec());
        let result = client(port, 1).simple_int("AT", "TEMP", None).unwrap();
        assert_eq!(result.data, None);
        assert!(!result.success);
    }

    #[test]
    fn external_gpios_send_six_commands() {
        let port = FakeSerialPort::with_responder(|bytes| {
            let mut reply = bytes.to_vec();
            reply.extend(b"\r\n");
            reply
        });
        let results = client(port.clone(), 1).set_external_gpios(false).unwrap();
        assert!(results.iter().all(|r| r.success));
        assert_eq!(port.written_text(), vec!["E", "G", "I", "K", "M", "O"]);
    }
}
