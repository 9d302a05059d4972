//! Client for the station IO board.

pub mod frame;

use crate::channel::retry_attempts;
use crate::serial::SerialLink;
use crate::{Error, Result};
use frame::FrameDecoder;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
const SEND_SETTLE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    Return = 0,
    Version = 1,
    Id = 2,
    Echo = 3,
    Reset = 4,
    Gpio = 5,
    DpmAmmeter1 = 6,
    DpmAmmeter2 = 7,
    DpmVoltmeter = 8,
    Current = 9,
}

impl CommandCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandCode::Return => "RETURN",
            CommandCode::Version => "VERSION",
            CommandCode::Id => "ID",
            CommandCode::Echo => "ECHO",
            CommandCode::Reset => "RESET",
            CommandCode::Gpio => "GPIO",
            CommandCode::DpmAmmeter1 => "DPM_AMMETER1",
            CommandCode::DpmAmmeter2 => "DPM_AMMETER2",
            CommandCode::DpmVoltmeter => "DPM_VOLTMETER",
            CommandCode::Current => "CURRENT",
        }
    }
}

impl TryFrom<u8> for CommandCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => CommandCode::Return,
            1 => CommandCode::Version,
            2 => CommandCode::Id,
            3 => CommandCode::Echo,
            4 => CommandCode::Reset,
            5 => CommandCode::Gpio,
            6 => CommandCode::DpmAmmeter1,
            7 => CommandCode::DpmAmmeter2,
            8 => CommandCode::DpmVoltmeter,
            9 => CommandCode::Current,
            other => return Err(Error::Framing(format!("unknown command code {other}"))),
        })
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status byte carried by a `RETURN` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetCode {
    Ok,
    None,
    Generic,
    Checksum,
    CommandUnknown,
    CommandNotImplemented,
    Busy,
    InvalidArgument,
}

impl RetCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0xFF => RetCode::Ok,
            0 => RetCode::None,
            1 => RetCode::Generic,
            2 => RetCode::Checksum,
            3 => RetCode::CommandUnknown,
            4 => RetCode::CommandNotImplemented,
            5 => RetCode::Busy,
            6 => RetCode::InvalidArgument,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RetCode::Ok => "OK",
            RetCode::None => "NONE",
            RetCode::Generic => "GENERIC",
            RetCode::Checksum => "CHKSM",
            RetCode::CommandUnknown => "CMD_UNKNOWN",
            RetCode::CommandNotImplemented => "CMD_NOT_IMPLEMENTED",
            RetCode::Busy => "BUSY",
            RetCode::InvalidArgument => "INVALID_ARGUMENT",
        }
    }
}

macro_rules! gpio_lines {
    ($($variant:ident = $value:literal => $label:literal,)+) => {
        /// Lines addressable through the `GPIO` command, numbered in board order.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Gpio {
            $($variant = $value,)+
        }

        impl Gpio {
            pub const ALL: &'static [Gpio] = &[$(Gpio::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Gpio::$variant => $label,)+
                }
            }

            pub fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $($value => Some(Gpio::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

gpio_lines! {
    Sel8Dmm1 = 0 => "GPIO_SEL8_DMM1",
    Sel7Dmm1 = 1 => "GPIO_SEL7_DMM1",
    Sel6Dmm1 = 2 => "GPIO_SEL6_DMM1",
    Sel5Dmm1 = 3 => "GPIO_SEL5_DMM1",
    Sel4Dmm1 = 4 => "GPIO_SEL4_DMM1",
    Sel3Dmm1 = 5 => "GPIO_SEL3_DMM1",
    Sel2Dmm1 = 6 => "GPIO_SEL2_DMM1",
    Sel1Dmm1 = 7 => "GPIO_SEL1_DMM1",
    Sel9Dmm1 = 8 => "GPIO_SEL9_DMM1",
    MaxMinDmm1 = 9 => "GPIO_MAX_MIN_DMM1",
    TrigRsDmm1 = 10 => "GPIO_TRIG_RS_DMM1",
    Sel8Dmm2 = 11 => "GPIO_SEL8_DMM2",
    Sel7Dmm2 = 12 => "GPIO_SEL7_DMM2",
    Sel6Dmm2 = 13 => "GPIO_SEL6_DMM2",
    Sel5Dmm2 = 14 => "GPIO_SEL5_DMM2",
    Sel4Dmm2 = 15 => "GPIO_SEL4_DMM2",
    Sel3Dmm2 = 16 => "GPIO_SEL3_DMM2",
    Sel2Dmm2 = 17 => "GPIO_SEL2_DMM2",
    Sel1Dmm2 = 18 => "GPIO_SEL1_DMM2",
    Sel9Dmm2 = 19 => "GPIO_SEL9_DMM2",
    MaxMinDmm2 = 20 => "GPIO_MAX_MIN_DMM2",
    TrigRsDmm2 = 21 => "GPIO_TRIG_RS_DMM2",
    MaxMinDmm3 = 22 => "GPIO_MAX_MIN_DMM3",
    TrigRsDmm3 = 23 => "GPIO_TRIG_RS_DMM3",
    Gp0 = 24 => "GP0",
    Gp1 = 25 => "GP1",
    Gp2 = 26 => "GP2",
    Gp3 = 27 => "GP3",
    Gp4 = 28 => "GP4",
    Gp5 = 29 => "GP5",
    En5vRj45Io = 30 => "EN_5V_RJ45IO",
    Gp7 = 31 => "GP7",
    Tp35 = 32 => "GPIO_TP35",
    Tp36 = 33 => "GPIO_TP36",
    Tp38 = 34 => "GPIO_TP38",
    Tp39 = 35 => "GPIO_TP39",
    Tp40 = 36 => "GPIO_TP40",
    Tp41 = 37 => "GPIO_TP41",
    Tp43 = 38 => "GPIO_TP43",
    Tp44 = 39 => "GPIO_TP44",
    EnProgStm = 40 => "EN_PROG_STM",
    EnUartStm32 = 41 => "EN_UART_STM32",
    A2Swa = 42 => "A2_SWA",
    HwRangeDmmAmp = 43 => "HW_Range_DMM_AMP",
    SelectPairVoltMeas = 44 => "SELECT_PAIR_VOLT_MEAS",
    SelectTargetVoltMeas = 45 => "SELECT_TARGET_VOLT_MEAS",
    EnShuntAmmeter = 46 => "EN_SHUNT_AMMETER",
    SwJig2 = 47 => "SW_JIG_2",
    EnUartCm4 = 48 => "EN_UART_CM4",
    EnBootCm4 = 49 => "EN_BOOT_CM4",
    EnPowerPoe = 50 => "EN_POWER_POE",
    Led = 51 => "LED",
    SelectPairAmpMeas = 52 => "SELECT_PAIR_AMP_MEAS",
    CmdEl = 53 => "CMD_EL",
    A0Swa = 54 => "A0_SWA",
    A1Swa = 55 => "A1_SWA",
    EnSwa = 56 => "EN_SWA",
}

impl fmt::Display for Gpio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Jig state after [`IoBoard::reset_jig`].
pub const JIG_RESET_LINES: [(Gpio, bool); 8] = [
    (Gpio::EnPowerPoe, false),
    (Gpio::EnProgStm, false),
    (Gpio::EnUartCm4, false),
    (Gpio::EnUartStm32, false),
    (Gpio::EnSwa, false),
    (Gpio::EnShuntAmmeter, true),
    (Gpio::CmdEl, false),
    (Gpio::EnBootCm4, false),
];

/// SW_JIG_2 level while the jig lid is up.
pub const JIG_OPEN: bool = true;

/// Switches the power of the device under test.
pub trait PowerControl: Send {
    fn set_power(&mut self, on: bool) -> Result<()>;
}

pub struct IoBoard<L> {
    link: L,
    timeout: Duration,
    attempts: u32,
}

impl<L: SerialLink> IoBoard<L> {
    pub fn new(link: L, timeout: Duration, attempts: u32) -> Self {
        Self {
            link,
            timeout,
            attempts: attempts.max(1),
        }
    }

    pub fn port_name(&self) -> String {
        self.link.name()
    }

    /// One request frame, one response frame. Only timeouts are retried.
    pub fn transact(&mut self, code: CommandCode, payload: &[u8]) -> Result<(CommandCode, Vec<u8>)> {
        let timeout = self.timeout;
        let attempts = self.attempts;
        retry_attempts(
            attempts,
            code.as_str(),
            |err| matches!(err, Error::Timeout(_)),
            |_| self.round_trip(code, payload, timeout),
        )
    }

    fn round_trip(
        &mut self,
        code: CommandCode,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(CommandCode, Vec<u8>)> {
        // Jig polling runs every 50 ms and would drown the log.
        let silenced = code == CommandCode::Gpio && payload.first() == Some(&(Gpio::SwJig2 as u8));
        if !silenced {
            debug!("TX {code} : {payload:?}");
        }
        self.link.clear_input()?;
        self.link.write_bytes(&frame::encode(code as u8, payload))?;
        std::thread::sleep(SEND_SETTLE);

        let (reply, data) = self.receive(Instant::now() + timeout)?;
        if reply != CommandCode::Gpio {
            debug!("RX {reply} : {data:?}");
        }
        Ok((reply, data))
    }

    fn receive(&mut self, deadline: Instant) -> Result<(CommandCode, Vec<u8>)> {
        let mut decoder = FrameDecoder::new();
        let mut chunk = [0u8; 64];
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout("IO board response".into()));
            }
            let n = self.link.read_chunk(&mut chunk, deadline - now)?;
            for byte in &chunk[..n] {
                if let Some(frame) = decoder.push(*byte) {
                    let frame = frame?;
                    let code = CommandCode::try_from(frame.code)?;
                    return Ok((code, frame.payload));
                }
            }
        }
    }

    pub fn read_id(&mut self) -> Result<String> {
        let (code, data) = self.transact(CommandCode::Id, &[])?;
        expect_code(CommandCode::Id, code, &data)?;
        Ok(data.iter().map(|b| format!("{b:02X}")).collect())
    }

    pub fn read_version(&mut self) -> Result<String> {
        let (code, data) = self.transact(CommandCode::Version, &[])?;
        expect_code(CommandCode::Version, code, &data)?;
        Ok(data.iter().map(|b| char::from(*b)).collect())
    }

    pub fn echo(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let (code, data) = self.transact(CommandCode::Echo, payload)?;
        expect_code(CommandCode::Echo, code, &data)?;
        Ok(data)
    }

    pub fn reset(&mut self) -> Result<()> {
        let (code, data) = self.transact(CommandCode::Reset, &[])?;
        check_return_ok(code, &data)
    }

    /// Toggles the RS232 output of the panel voltmeter.
    pub fn toggle_voltmeter_rs232(&mut self) -> Result<()> {
        let (code, data) = self.transact(CommandCode::DpmVoltmeter, &[])?;
        check_return_ok(code, &data)
    }

    pub fn read_gpio(&mut self, gpio: Gpio) -> Result<bool> {
        let (code, data) = self.transact(CommandCode::Gpio, &[gpio as u8])?;
        if code == CommandCode::Gpio && data.len() == 1 {
            return Ok(data[0] != 0);
        }
        Err(invalid_response(code, &data))
    }

    pub fn write_gpio(&mut self, gpio: Gpio, value: bool) -> Result<()> {
        let (code, data) = self.transact(CommandCode::Gpio, &[gpio as u8, u8::from(value)])?;
        check_return_ok(code, &data)
    }

    pub fn write_gpios(&mut self, values: &[(Gpio, bool)]) -> Result<()> {
        for (gpio, value) in values {
            self.write_gpio(*gpio, *value)?;
        }
        Ok(())
    }

    /// Drives every jig line to its idle level.
    pub fn reset_jig(&mut self) -> Result<()> {
        self.write_gpios(&JIG_RESET_LINES)
    }

    /// Polls SW_JIG_2 until it reads `level`. Returns `false` if `cancel` was raised
    /// first. The switch reads high while the jig is open.
    pub fn wait_jig(&mut self, level: bool, cancel: &AtomicBool, interval: Duration) -> Result<bool> {
        while !cancel.load(Ordering::SeqCst) {
            if self.read_gpio(Gpio::SwJig2)? == level {
                return Ok(true);
            }
            std::thread::sleep(interval);
        }
        Ok(false)
    }
}

impl<L: SerialLink> PowerControl for IoBoard<L> {
    fn set_power(&mut self, on: bool) -> Result<()> {
        self.write_gpio(Gpio::EnPowerPoe, on)
    }
}

fn expect_code(expected: CommandCode, code: CommandCode, data: &[u8]) -> Result<()> {
    if code == expected {
        Ok(())
    } else {
        Err(invalid_response(code, data))
    }
}

pub fn check_return_ok(code: CommandCode, data: &[u8]) -> Result<()> {
    if code == CommandCode::Return && data.len() == 1 && data[0] == 0xFF {
        return Ok(());
    }
    Err(invalid_response(code, data))
}

fn invalid_response(code: CommandCode, data: &[u8]) -> Error {
    let status = match (code, data) {
        (CommandCode::Return, [byte]) => RetCode::from_byte(*byte)
            .map(|ret| ret.as_str().to_string())
            .unwrap_or_else(|| format!("0x{byte:02X}")),
        _ => format!("{data:?}"),
    };
    Error::UnexpectedResponse(format!("IO board {code}: {status}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::fake::{FakeSerialEntry, FakeSerialPort};

    fn board(port: FakeSerialPort) -> IoBoard<FakeSerialPort> {
        IoBoard::new(port, Duration::from_millis(50), 1)
    }

    fn ok_frame() -> Vec<u8> {
        frame::encode(CommandCode::Return as u8, &[0xFF])
    }

    #[test]
    fn write_gpio_sends_line_and_level() {
        let port = FakeSerialPort::with_responder(|_| ok_frame());
        let mut io = board(port.clone());
        io.write_gpio(Gpio::EnPowerPoe, true).unwrap();
        assert_eq!(
            port.writes(),
            vec![frame::encode(CommandCode::Gpio as u8, &[50, 1])]
        );
        assert_eq!(port.clear_count(), 1);
    }

    #[test]
    fn error_status_is_reported_by_name() {
        let port = FakeSerialPort::with_responder(|_| frame::encode(0, &[5]));
        let err = board(port).write_gpio(Gpio::Led, true).unwrap_err();
        assert!(err.to_string().contains("BUSY"), "{err}");
    }

    #[test]
    fn read_id_is_upper_hex() {
        let port = FakeSerialPort::with_responder(|_| {
            frame::encode(CommandCode::Id as u8, &[0x0A, 0xFF, 0x33])
        });
        assert_eq!(board(port).read_id().unwrap(), "0AFF33");
    }

    #[test]
    fn read_version_is_ascii() {
        let port = FakeSerialPort::with_responder(|_| {
            frame::encode(CommandCode::Version as u8, b"1.4.0")
        });
        assert_eq!(board(port).read_version().unwrap(), "1.4.0");
    }

    #[test]
    fn read_gpio_nonzero_is_high() {
        let port = FakeSerialPort::with_responder(|_| frame::encode(CommandCode::Gpio as u8, &[2]));
        assert!(board(port).read_gpio(Gpio::SwJig2).unwrap());
    }

    #[test]
    fn timeouts_are_retried() {
        let port = FakeSerialPort::default();
        let mut io = IoBoard::new(port.clone(), Duration::from_millis(20), 3);
        let err = io.reset().unwrap_err();
        assert!(matches!(err, Error::CommandFailed { attempts: 3, .. }));
        assert_eq!(port.writes().len(), 3);
    }

    #[test]
    fn checksum_errors_are_not_retried() {
        let port = FakeSerialPort::with_responder(|_| vec![frame::START, 0, 0xFF, 0x01, frame::END]);
        let mut io = IoBoard::new(port.clone(), Duration::from_millis(50), 3);
        assert!(matches!(io.reset(), Err(Error::ChecksumMismatch)));
        assert_eq!(port.writes().len(), 1);
    }

    #[test]
    fn unknown_code_is_a_framing_error() {
        let port = FakeSerialPort::with_responder(|_| frame::encode(42, &[]));
        assert!(matches!(board(port).reset(), Err(Error::Framing(_))));
    }

    #[test]
    fn response_split_across_reads() {
        let bytes = ok_frame();
        let (head, tail) = bytes.split_at(2);
        let port = FakeSerialPort::with_script(vec![
            FakeSerialEntry::immediate(Ok(head.to_vec())),
            FakeSerialEntry::with_delay(Ok(tail.to_vec()), Duration::from_millis(5)),
        ]);
        board(port).reset().unwrap();
    }

    #[test]
    fn wait_jig_stops_on_cancel() {
        let port = FakeSerialPort::with_responder(|_| frame::encode(CommandCode::Gpio as u8, &[0]));
        let cancel = AtomicBool::new(true);
        assert!(!board(port).wait_jig(true, &cancel, Duration::from_millis(1)).unwrap());
    }

    #[test]
    fn gpio_numbering_matches_board() {
        assert_eq!(Gpio::ALL.len(), 57);
        for (index, gpio) in Gpio::ALL.iter().enumerate() {
            assert_eq!(*gpio as usize, index);
            assert_eq!(Gpio::from_u8(index as u8), Some(*gpio));
        }
    }
}
