pub mod fake;
pub mod lines;
pub mod sync;

pub use lines::{read_lines, LineRead, Transcript};
pub use sync::{discover, list_ports, PortListing, SerialPort};

use crate::Result;
use std::time::Duration;

/// Byte-level access to one serial device.
///
/// Implementations must never block longer than the timeout handed to
/// [`SerialLink::read_chunk`]; every deadline in the crate is built on that.
pub trait SerialLink: Send {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// Reads whatever is available, waiting at most `timeout`. `Ok(0)` means nothing
    /// arrived in time.
    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Drops bytes already received but not yet read.
    fn clear_input(&mut self) -> Result<()>;

    fn name(&self) -> String;
}

impl<L: SerialLink + ?Sized> SerialLink for Box<L> {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write_bytes(bytes)
    }

    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read_chunk(buf, timeout)
    }

    fn clear_input(&mut self) -> Result<()> {
        (**self).clear_input()
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Framing parameters of a serial device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialOptions {
    pub baud: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl SerialOptions {
    /// 115200-8N1, used by the IO board, the MCU and the SBC console.
    pub const fn fast_8n1() -> Self {
        Self {
            baud: 115_200,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }

    /// 2400-7O1, the DPM802 RS232 output.
    pub const fn dpm802() -> Self {
        Self {
            baud: 2400,
            data_bits: 7,
            parity: Parity::Odd,
            stop_bits: 1,
        }
    }
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self::fast_8n1()
    }
}

/// USB vendor/product pair used to locate an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl UsbId {
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }
}

impl std::fmt::Display for UsbId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vid, self.pid)
    }
}

/// Parses `vvvv:pppp` in hex.
impl std::str::FromStr for UsbId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || crate::Error::InvalidArgs(format!("USB id '{s}' is not vvvv:pppp"));
        let (vid, pid) = s.trim().split_once(':').ok_or_else(invalid)?;
        let vid = u16::from_str_radix(vid, 16).map_err(|_| invalid())?;
        let pid = u16::from_str_radix(pid, 16).map_err(|_| invalid())?;
        Ok(Self::new(vid, pid))
    }
}

pub const IO_BOARD_USB_IDS: [UsbId; 3] = [
    UsbId::new(0x0483, 0x374B),
    UsbId::new(0x1366, 0x0105),
    UsbId::new(0x0403, 0x6001),
];

pub const FTDI_USB_IDS: [UsbId; 1] = [UsbId::new(0x0403, 0x6001)];
