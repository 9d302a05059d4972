use crate::boot::BootSupervisor;
use crate::config::{parse_usb_ids, Config, LocalRecording, RecorderConfig};
use crate::flasher::{Programmer, StLinkFlasher};
use crate::ioboard::IoBoard;
use crate::mcu::McuClient;
use crate::product::{LabelPrinter, Link, Rig, SkipPrinting};
use crate::recorder::sinks::{HttpSink, LocalFileSink};
use crate::recorder::{Recorder, RecorderError};
use crate::sbc::SbcClient;
use crate::sequencer::Hooks;
use crate::serial::{discover, SerialOptions, SerialPort, UsbId};
use crate::voltmeter::Voltmeter;
use crate::{Error, Result};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Ports already handed to a device; discovery never returns one twice.
#[derive(Debug, Default)]
pub(crate) struct PortClaims {
    claimed: Vec<String>,
}

impl PortClaims {
    /// The explicit `port`, else the first discovered port not yet claimed.
    pub fn resolve(&mut self, device: &str, port: Option<&str>, ids: &[UsbId], found: &[String]) -> Result<String> {
        let chosen = match port {
            Some(port) => port.to_string(),
            None => found
                .iter()
                .find(|candidate| !self.claimed.contains(candidate))
                .cloned()
                .ok_or_else(|| {
                    let ids: Vec<String> = ids.iter().map(UsbId::to_string).collect();
                    Error::NotFound(format!("{device} port (usb ids {})", ids.join(", ")))
                })?,
        };
        info!(device, port = %chosen, "port selected");
        self.claimed.push(chosen.clone());
        Ok(chosen)
    }
}

fn open(
    claims: &mut PortClaims,
    device: &str,
    port: Option<&str>,
    usb_ids: &[String],
    options: SerialOptions,
) -> Result<Link> {
    let ids = parse_usb_ids(usb_ids)?;
    let found = if port.is_some() { Vec::new() } else { discover(&ids)? };
    let name = claims.resolve(device, port, &ids, &found)?;
    Ok(Box::new(SerialPort::connect(&name, options)?))
}

/// Every serial link of the station, opened.
pub struct Links {
    pub io_board: Link,
    pub mcu: Link,
    pub sbc: Link,
    pub voltmeter: Link,
}

impl Links {
    pub fn open(config: &Config) -> Result<Self> {
        let mut claims = PortClaims::default();
        let io_board = open(
            &mut claims,
            "io board",
            config.io_board.port.as_deref(),
            &config.io_board.usb_ids,
            SerialOptions::fast_8n1(),
        )?;
        let mcu = open(
            &mut claims,
            "MCU",
            config.mcu.port.as_deref(),
            &config.mcu.usb_ids,
            SerialOptions::fast_8n1(),
        )?;
        let sbc = open(
            &mut claims,
            "SBC",
            config.sbc.port.as_deref(),
            &config.sbc.usb_ids,
            SerialOptions::fast_8n1(),
        )?;
        let voltmeter = open(
            &mut claims,
            "voltmeter",
            config.voltmeter.port.as_deref(),
            &config.voltmeter.usb_ids,
            SerialOptions::dpm802(),
        )?;
        Ok(Self {
            io_board,
            mcu,
            sbc,
            voltmeter,
        })
    }
}

fn recorder_error(err: RecorderError) -> Error {
    Error::Config(format!("recorder: {err}"))
}

/// Starts the recorder workers, or returns `None` when recording is disabled.
pub fn start_recorder(config: &RecorderConfig, stop: Arc<AtomicBool>) -> Result<Option<Arc<Recorder>>> {
    if config.disabled {
        warn!("tests recorder disabled");
        return Ok(None);
    }
    let local = match &config.local {
        LocalRecording::Disabled => LocalFileSink::new(None, config.pretty),
        LocalRecording::Automatic { folder } => {
            LocalFileSink::automatic(folder, config.pretty).map_err(recorder_error)?
        }
        LocalRecording::File { path } => LocalFileSink::new(Some(path.clone()), config.pretty),
    };
    if let Some(path) = local.path() {
        info!(path = %path.display(), "local records");
    }
    let online = HttpSink::new(
        config.server_url.clone(),
        config.token.clone(),
        Duration::from_millis(config.request_timeout_ms),
    )
    .map_err(recorder_error)?;
    let recorder = Recorder::start(Box::new(local), Box::new(online), config.queue_capacity, stop)?;
    Ok(Some(Arc::new(recorder)))
}

/// Pieces of the bench that do not come from serial links.
pub struct Peripherals {
    pub programmer: Box<dyn Programmer>,
    pub printer: Box<dyn LabelPrinter>,
    pub recorder: Option<Arc<Recorder>>,
    pub hooks: Arc<dyn Hooks>,
}

impl Peripherals {
    pub fn from_config(config: &Config, recorder: Option<Arc<Recorder>>, hooks: Arc<dyn Hooks>) -> Self {
        Self {
            programmer: Box::new(StLinkFlasher::new(config.flasher.clone())),
            printer: Box::new(SkipPrinting),
            recorder,
            hooks,
        }
    }
}

/// Wires clients over the links according to `config`.
pub fn assemble(config: &Config, links: Links, peripherals: Peripherals) -> Result<Rig> {
    let io = IoBoard::new(
        links.io_board,
        Duration::from_millis(config.io_board.timeout_ms),
        config.io_board.attempts,
    );
    let mcu = McuClient::new(
        links.mcu,
        config.mcu.attempts,
        Duration::from_millis(config.mcu.timeout_ms),
        config.mcu.timeouts.clone(),
    )?;
    let sbc = Arc::new(Mutex::new(SbcClient::new(
        links.sbc,
        config.sbc.attempts,
        Duration::from_millis(config.sbc.timeout_ms),
        config.sbc.timeouts.clone(),
    )));
    if config.sbc.boot.password.is_empty() {
        warn!("SBC password is empty; set it in [sbc.boot] or {}", crate::config::PASSWORD_ENV);
    }
    let boot = BootSupervisor::new(Arc::clone(&sbc), config.sbc.boot.clone());

    Ok(Rig {
        io,
        mcu,
        sbc,
        boot,
        voltmeter: Voltmeter::new(links.voltmeter),
        programmer: peripherals.programmer,
        recorder: peripherals.recorder,
        hooks: peripherals.hooks,
        printer: peripherals.printer,
        settings: config.sequence.product.clone(),
        limits: config.power_supply.clone(),
        recorder_wait: Duration::from_millis(config.recorder.wait_ms),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::FTDI_USB_IDS;

    #[test]
    fn explicit_port_wins() {
        let mut claims = PortClaims::default();
        let found = vec!["/dev/ttyUSB0".to_string()];
        let port = claims
            .resolve("MCU", Some("/dev/ttyS3"), &FTDI_USB_IDS, &found)
            .unwrap();
        assert_eq!(port, "/dev/ttyS3");
    }

    #[test]
    fn discovered_ports_are_not_shared() {
        let mut claims = PortClaims::default();
        let found = vec!["/dev/ttyUSB0".to_string(), "/dev/ttyUSB1".to_string()];
        let mcu = claims.resolve("MCU", None, &FTDI_USB_IDS, &found).unwrap();
        let sbc = claims.resolve("SBC", None, &FTDI_USB_IDS, &found).unwrap();
        assert_eq!((mcu.as_str(), sbc.as_str()), ("/dev/ttyUSB0", "/dev/ttyUSB1"));
        assert!(matches!(
            claims.resolve("voltmeter", None, &FTDI_USB_IDS, &found),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn disabled_recorder_is_none() {
        let config = RecorderConfig {
            disabled: true,
            ..RecorderConfig::default()
        };
        let stop = Arc::new(AtomicBool::new(false));
        assert!(start_recorder(&config, stop).unwrap().is_none());
    }
}
