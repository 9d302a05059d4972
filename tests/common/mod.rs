#![allow(dead_code)]

use podbench::app::connection::{assemble, Links, Peripherals};
use podbench::config::Config;
use podbench::flasher::Programmer;
use podbench::ioboard::frame::{self, FrameDecoder};
use podbench::ioboard::{CommandCode, Gpio};
use podbench::product::{Rig, SkipPrinting};
use podbench::sequencer::{Hooks, NullHooks};
use podbench::serial::fake::FakeSerialPort;
use podbench::serial::SerialLink;
use podbench::voltmeter::encode_measure;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const VOLTAGE: u8 = 0b011_1011;

/// Jig hardware as seen through the IO board and the voltmeter.
#[derive(Debug)]
pub struct BenchState {
    pub gpios: [bool; 64],
    /// Levels returned by the next SW_JIG_2 reads; the last one holds.
    pub jig: VecDeque<bool>,
    pub rail_5v: f64,
    pub rail_3v3: f64,
    pub rail_radar: f64,
    pub frames: Vec<(u8, Vec<u8>)>,
}

impl Default for BenchState {
    fn default() -> Self {
        Self {
            gpios: [false; 64],
            jig: VecDeque::from([true]),
            rail_5v: 5.0,
            rail_3v3: 3.3,
            rail_radar: 3.3,
            frames: Vec::new(),
        }
    }
}

impl BenchState {
    pub fn level(&self, gpio: Gpio) -> bool {
        self.gpios[gpio as usize]
    }

    /// Voltage on the rail the analog switch currently selects.
    fn selected_rail(&self) -> f64 {
        let select = (
            self.level(Gpio::A0Swa),
            self.level(Gpio::A1Swa),
            self.level(Gpio::A2Swa),
        );
        match select {
            (true, false, false) => self.rail_5v,
            (true, true, false) => self.rail_3v3,
            (false, true, false) => self.rail_radar,
            _ => 0.0,
        }
    }

    fn jig_level(&mut self) -> bool {
        if self.jig.len() > 1 {
            self.jig.pop_front().unwrap_or(true)
        } else {
            self.jig.front().copied().unwrap_or(true)
        }
    }

    fn answer(&mut self, code: u8, payload: &[u8]) -> Vec<u8> {
        self.frames.push((code, payload.to_vec()));
        let ok = frame::encode(CommandCode::Return as u8, &[0xFF]);
        match CommandCode::try_from(code) {
            Ok(CommandCode::Version) => frame::encode(code, b"2.1.0"),
            Ok(CommandCode::Id) => frame::encode(code, &[0x0A, 0x1B]),
            Ok(CommandCode::Echo) => frame::encode(code, payload),
            Ok(CommandCode::Gpio) => match payload {
                [gpio] if *gpio == Gpio::SwJig2 as u8 => {
                    let level = self.jig_level();
                    frame::encode(code, &[u8::from(level)])
                }
                [gpio] => frame::encode(code, &[u8::from(self.gpios[*gpio as usize % 64])]),
                [gpio, value] => {
                    self.gpios[*gpio as usize % 64] = *value != 0;
                    ok
                }
                _ => frame::encode(CommandCode::Return as u8, &[6]),
            },
            Ok(_) => ok,
            Err(_) => frame::encode(CommandCode::Return as u8, &[3]),
        }
    }
}

#[derive(Clone, Default)]
pub struct SharedBench(Arc<Mutex<BenchState>>);

impl SharedBench {
    pub fn lock(&self) -> MutexGuard<'_, BenchState> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// IO board port decoding request frames and answering from the shared state.
    pub fn io_board(&self) -> FakeSerialPort {
        let bench = self.clone();
        let mut decoder = FrameDecoder::new();
        FakeSerialPort::with_responder(move |bytes| {
            let mut reply = Vec::new();
            for byte in bytes {
                if let Some(Ok(raw)) = decoder.push(*byte) {
                    reply.extend(bench.lock().answer(raw.code, &raw.payload));
                }
            }
            reply
        })
        .named("sim-io-board")
    }

    pub fn voltmeter(&self) -> SimulatedMeter {
        SimulatedMeter { bench: self.clone() }
    }
}

/// DPM802 streaming one frame of the selected rail per read.
pub struct SimulatedMeter {
    bench: SharedBench,
}

impl SerialLink for SimulatedMeter {
    fn write_bytes(&mut self, _bytes: &[u8]) -> podbench::Result<()> {
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> podbench::Result<usize> {
        std::thread::sleep(timeout.min(Duration::from_millis(20)));
        let volts = self.bench.lock().selected_rail();
        let digits = format!("{:04}", (volts * 1000.0).round() as u32);
        let frame = encode_measure(0x31, &digits, VOLTAGE, false);
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        Ok(n)
    }

    fn clear_input(&mut self) -> podbench::Result<()> {
        Ok(())
    }

    fn name(&self) -> String {
        "sim-dpm802".to_string()
    }
}

/// Programmer that always succeeds and reports a fixed UID.
pub struct FakeProgrammer {
    pub flashed: Arc<Mutex<Vec<String>>>,
}

impl Programmer for FakeProgrammer {
    fn flash(&mut self, hex_file: &str) -> podbench::Result<bool> {
        if let Ok(mut flashed) = self.flashed.lock() {
            flashed.push(hex_file.to_string());
        }
        Ok(true)
    }

    fn read_memory_protection(&mut self) -> podbench::Result<bool> {
        Ok(true)
    }

    fn read_uid(&mut self) -> podbench::Result<Option<String>> {
        Ok(Some("0123456789ABCDEF0123456789ABCDEF".to_string()))
    }
}

/// Defaults with every wait shortened and recording off.
pub fn quick_config(results: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.io_board.timeout_ms = 200;
    config.recorder.disabled = true;
    config.power_supply.window_ms = 100;
    config.power_supply.window_3v3_ms = 100;
    config.sequence.step_delay_ms = 0;
    config.sequence.jig_poll_ms = 1;
    config.sequence.results_dir = results.to_path_buf();
    config.sequence.product.delays.poe_settle_ms = 0;
    config.sequence.product.delays.prog_settle_ms = 0;
    config.sequence.product.delays.power_cycle_off_ms = 0;
    config.sequence.product.delays.power_cycle_on_ms = 0;
    config
}

pub struct Harness {
    pub bench: SharedBench,
    pub flashed: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            bench: SharedBench::default(),
            flashed: Arc::default(),
        }
    }

    /// Rig over the simulated IO board and voltmeter; MCU and SBC stay silent.
    pub fn rig(&self, config: &Config) -> Rig {
        self.rig_with_sbc(config, FakeSerialPort::default().named("sim-sbc"))
    }

    pub fn rig_with_sbc(&self, config: &Config, sbc: FakeSerialPort) -> Rig {
        let links = Links {
            io_board: Box::new(self.bench.io_board()),
            mcu: Box::new(FakeSerialPort::default().named("sim-mcu")),
            sbc: Box::new(sbc),
            voltmeter: Box::new(self.bench.voltmeter()),
        };
        let hooks: Arc<dyn Hooks> = Arc::new(NullHooks);
        let peripherals = Peripherals {
            programmer: Box::new(FakeProgrammer {
                flashed: Arc::clone(&self.flashed),
            }),
            printer: Box::new(SkipPrinting),
            recorder: None,
            hooks,
        };
        match assemble(config, links, peripherals) {
            Ok(rig) => rig,
            Err(err) => panic!("assemble: {err}"),
        }
    }
}
