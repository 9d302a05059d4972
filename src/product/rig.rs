use super::serial_number::SequentialCounter;
use super::{LabelPrinter, PowerSupplyLimits, ProductSettings};
use crate::boot::{BootState, BootSupervisor};
use crate::flasher::Programmer;
use crate::ioboard::{Gpio, IoBoard};
use crate::mcu::McuClient;
use crate::recorder::Recorder;
use crate::sbc::{lock_sbc, SbcClient, SharedSbc};
use crate::sequencer::{Bench, Hooks};
use crate::serial::SerialLink;
use crate::voltmeter::Voltmeter;
use crate::Result;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, MutexGuard};
use std::time::Duration;
use tracing::{error, info};

/// Device links are boxed so real ports and simulated ones mix on one bench.
pub type Link = Box<dyn SerialLink>;

/// Everything the product steps drive.
pub struct Rig {
    pub io: IoBoard<Link>,
    pub mcu: McuClient<Link>,
    pub sbc: SharedSbc<Link>,
    pub boot: BootSupervisor<Link>,
    pub voltmeter: Voltmeter<Link>,
    pub programmer: Box<dyn Programmer>,
    pub recorder: Option<Arc<Recorder>>,
    pub hooks: Arc<dyn Hooks>,
    pub printer: Box<dyn LabelPrinter>,
    pub settings: ProductSettings,
    pub limits: PowerSupplyLimits,
    /// How long SEND_KEYS waits on the recording server.
    pub recorder_wait: Duration,
}

impl Rig {
    pub fn sbc(&self) -> MutexGuard<'_, SbcClient<Link>> {
        lock_sbc(&self.sbc)
    }

    pub fn counter(&self) -> SequentialCounter {
        SequentialCounter::new(&self.settings.sequential_number_path)
    }

    pub fn uart_stm32(&mut self, on: bool) -> Result<()> {
        self.io.write_gpio(Gpio::EnUartStm32, on)
    }

    /// Waits for the background boot, power-cycling and retrying once if it failed.
    pub fn boot_if_needed(&mut self) -> Result<BootState> {
        let state = self.boot.boot_if_needed(&mut self.io)?;
        if state != BootState::Booted {
            error!(state = %state, "SOM not initialized");
        } else {
            info!("CM4 correctly boot");
        }
        Ok(state)
    }

    /// Average voltage over `window`.
    pub fn measure_voltage(&mut self, window: Duration, cancel: &AtomicBool) -> Result<f64> {
        let average = self.voltmeter.sample_average(window, Some(cancel))?;
        info!("Average over {window:?} : {average}");
        Ok(average)
    }
}

impl Bench for Rig {
    fn stop_background(&mut self) {
        if let Err(err) = self.boot.stop() {
            error!(error = %err, "stopping SBC boot task");
        }
    }
}
