use super::{Parity, SerialLink, SerialOptions, UsbId};
use crate::{Error, Result};
use serialport::{ClearBuffer, DataBits, SerialPortType, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::debug;

const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Blocking serial device backed by the `serialport` crate.
pub struct SerialPort {
    inner: Box<dyn serialport::SerialPort>,
    device: String,
}

impl SerialPort {
    pub fn connect(device: &str, options: SerialOptions) -> Result<Self> {
        let data_bits = match options.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => {
                return Err(Error::InvalidArgs(format!(
                    "unsupported data bits {other} for {device}"
                )))
            }
        };
        let stop_bits = match options.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            other => {
                return Err(Error::InvalidArgs(format!(
                    "unsupported stop bits {other} for {device}"
                )))
            }
        };
        let parity = match options.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };
        let inner = serialport::new(device, options.baud)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()?;
        debug!(device, baud = options.baud, "serial port opened");
        Ok(Self {
            inner,
            device: device.to_string(),
        })
    }
}

impl SerialLink for SerialPort {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.inner.flush()?;
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.inner.set_timeout(timeout.max(MIN_READ_TIMEOUT))?;
        match self.inner.read(buf) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == ErrorKind::TimedOut => Ok(0),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn clear_input(&mut self) -> Result<()> {
        self.inner.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn name(&self) -> String {
        self.device.clone()
    }
}

/// Lists ports whose USB adapter matches one of `ids`, trying the ids in order and
/// returning the matches for the first id that has any.
pub fn discover(ids: &[UsbId]) -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    for id in ids {
        let matches: Vec<String> = ports
            .iter()
            .filter(|port| match &port.port_type {
                SerialPortType::UsbPort(usb) => usb.vid == id.vid && usb.pid == id.pid,
                _ => false,
            })
            .map(|port| port.port_name.clone())
            .collect();
        if !matches.is_empty() {
            return Ok(matches);
        }
    }
    Ok(Vec::new())
}

/// A serial port present on the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortListing {
    pub name: String,
    pub usb: Option<UsbId>,
    pub product: Option<String>,
}

impl std::fmt::Display for PortListing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.usb {
            Some(id) => write!(f, "{} {id}", self.name)?,
            None => write!(f, "{} -", self.name)?,
        }
        if let Some(product) = &self.product {
            write!(f, " {product}")?;
        }
        Ok(())
    }
}

pub fn list_ports() -> Result<Vec<PortListing>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|port| match port.port_type {
            SerialPortType::UsbPort(usb) => PortListing {
                name: port.port_name,
                usb: Some(UsbId::new(usb.vid, usb.pid)),
                product: usb.product,
            },
            _ => PortListing {
                name: port.port_name,
                usb: None,
                product: None,
            },
        })
        .collect())
}
