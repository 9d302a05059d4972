pub mod connection;
pub mod console;
pub mod logger;

use crate::{
    cli::RunOptions,
    config::{Config, LocalRecording, RecorderConfig, SequenceConfig},
    ioboard::JIG_OPEN,
    product::{self, steps::ONLINE_RECORD_KEY, Rig},
    recorder::{Database, Destinations, Record, RecordCallback, RecorderError},
    sequencer::{log_result, Bench, Hooks, OnlineReport, RunReport, Sequencer, TestContext},
    voltmeter::DEFAULT_READ_TIMEOUT,
    Error, Result,
};
use connection::{assemble, start_recorder, Links, Peripherals};
use console::ConsoleHooks;
use std::collections::HashSet;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const RESET_SETTLE: Duration = Duration::from_millis(500);
const RS232_SETTLE: Duration = Duration::from_millis(500);

/// Config for the station: the file merged with the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub config: Config,
    /// Stop after one pod.
    pub once: bool,
}

impl AppConfig {
    pub fn from_sources(mut config: Config, opts: RunOptions) -> Self {
        if opts.io_board_port.is_some() {
            config.io_board.port = opts.io_board_port;
        }
        if opts.mcu_port.is_some() {
            config.mcu.port = opts.mcu_port;
        }
        if opts.sbc_port.is_some() {
            config.sbc.port = opts.sbc_port;
        }
        if opts.voltmeter_port.is_some() {
            config.voltmeter.port = opts.voltmeter_port;
        }
        for step in opts.skip {
            if !config.sequence.skip.contains(&step) {
                config.sequence.skip.push(step);
            }
        }
        if let Some(level) = opts.log_level {
            config.logging.level = level;
        }
        if opts.log_file.is_some() {
            config.logging.file = opts.log_file;
        }
        Self {
            config,
            once: opts.once,
        }
    }
}

pub struct App {
    config: AppConfig,
    cancel: Arc<AtomicBool>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_options(opts: RunOptions) -> Result<Self> {
        let cfg_file = match &opts.config {
            Some(path) => Config::load(path)?,
            None => Config::load_or_default()?,
        };
        let merged = AppConfig::from_sources(cfg_file, opts);
        Ok(Self::new(merged))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Raising this flag ends the current step and the jig loop.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Entry point for the station. Opens every link, then tests pods until cancelled.
    pub fn run(&self) -> Result<()> {
        let config = &self.config.config;
        let hooks: Arc<dyn Hooks> = Arc::new(ConsoleHooks::new(std::io::stdin().is_terminal(), false));
        let links = Links::open(config)?;
        let rig = assemble(config, links, Peripherals::from_config(config, None, Arc::clone(&hooks)))?;
        let mut session = Session::new(config, rig, hooks, self.cancel_flag())?;
        session.initialize()?;
        let outcome = session.run(self.config.once);
        session.close();
        outcome
    }
}

/// A connected bench cycling through pods.
pub struct Session {
    rig: Rig,
    sequencer: Sequencer<Rig>,
    hooks: Arc<dyn Hooks>,
    cancel: Arc<AtomicBool>,
    skip: HashSet<String>,
    sequence: SequenceConfig,
    recorder_config: RecorderConfig,
    recorder_stop: Arc<AtomicBool>,
}

impl Session {
    pub fn new(config: &Config, rig: Rig, hooks: Arc<dyn Hooks>, cancel: Arc<AtomicBool>) -> Result<Self> {
        let catalog = product::catalog(&config.sequence.variant)?;
        let skip: HashSet<String> = config.sequence.skip.iter().cloned().collect();
        for name in &skip {
            if !catalog.contains(name) {
                warn!(step = %name, variant = %config.sequence.variant, "skipped step is not in the catalog");
            }
        }
        let sequencer = Sequencer::new(catalog, Arc::clone(&hooks), Arc::clone(&cancel))
            .with_step_delay(Duration::from_millis(config.sequence.step_delay_ms));
        Ok(Self {
            rig,
            sequencer,
            hooks,
            cancel,
            skip,
            sequence: config.sequence.clone(),
            recorder_config: config.recorder.clone(),
            recorder_stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn rig(&self) -> &Rig {
        &self.rig
    }

    pub fn rig_mut(&mut self) -> &mut Rig {
        &mut self.rig
    }

    /// Resets the IO board and the jig, wakes the voltmeter, then starts the recorder
    /// unless one is already attached.
    pub fn initialize(&mut self) -> Result<()> {
        let io = &mut self.rig.io;
        info!(port = %io.port_name(), "IO board");
        let version = io.read_version()?;
        let id = io.read_id()?;
        info!(version = %version, id = %id, "IO board identified");
        io.reset()?;
        std::thread::sleep(RESET_SETTLE);
        io.reset_jig()?;

        match self.rig.voltmeter.read_measure(DEFAULT_READ_TIMEOUT) {
            Ok(measure) => debug!(value = measure.value, "voltmeter answering"),
            Err(Error::Timeout(_)) => {
                warn!("voltmeter silent, toggling its RS232 output");
                self.rig.io.toggle_voltmeter_rs232()?;
                std::thread::sleep(RS232_SETTLE);
                let measure = self.rig.voltmeter.read_measure(DEFAULT_READ_TIMEOUT)?;
                debug!(value = measure.value, "voltmeter answering");
            }
            Err(err) => return Err(err),
        }

        if self.rig.recorder.is_none() {
            self.rig.recorder = start_recorder(&self.recorder_config, Arc::clone(&self.recorder_stop))?;
        }
        Ok(())
    }

    /// Waits for a pod, tests it and files the report. `None` when cancelled while
    /// waiting on the jig.
    pub fn run_cycle(&mut self) -> Result<Option<RunReport>> {
        let poll = Duration::from_millis(self.sequence.jig_poll_ms);
        self.rig.io.reset_jig()?;
        if !self.rig.io.wait_jig(JIG_OPEN, &self.cancel, poll)? {
            return Ok(None);
        }
        info!("Ready");
        self.hooks.set_status("Ready");
        info!("Jig opened");
        if !self.rig.io.wait_jig(!JIG_OPEN, &self.cancel, poll)? {
            return Ok(None);
        }
        info!("Jig closed");

        let mut context = TestContext::new();
        let mut online = OnlineReport::default();
        let report = self
            .sequencer
            .run(&mut self.rig, &self.skip, &mut context, &mut online);
        log_result(report.pass);

        let json = report
            .to_json()
            .map_err(|err| Error::Parse(format!("run report: {err}")))?;
        let path = write_report(&self.sequence.results_dir, &report.start_stamp(), &json)?;
        info!(path = %path.display(), "run report written");
        self.file_records(&report, json, &context);
        Ok(Some(report))
    }

    fn file_records(&self, report: &RunReport, json: serde_json::Value, context: &TestContext) {
        let Some(recorder) = &self.rig.recorder else {
            return;
        };
        if self.recorder_config.record_runs_locally && self.recorder_config.local != LocalRecording::Disabled {
            if let Err(err) = recorder.record(Arc::new(json), Some(record_callback()), Destinations::LOCAL) {
                error!(error = %err, "run report not queued");
            }
        }
        // SEND_KEYS already delivered the online record when it ran.
        if report.result("SEND_KEYS").is_some() {
            return;
        }
        let Some(online) = context.get(ONLINE_RECORD_KEY) else {
            return;
        };
        if has_pod_serial(online) {
            if let Err(err) = recorder.record(Arc::new(online.clone()), Some(record_callback()), Destinations::ONLINE) {
                error!(error = %err, "online record not queued");
            }
        }
    }

    /// Cycles until cancelled, or after one pod with `once`.
    pub fn run(&mut self, once: bool) -> Result<()> {
        while !self.cancel.load(Ordering::SeqCst) {
            if self.run_cycle()?.is_none() || once {
                break;
            }
        }
        Ok(())
    }

    /// Stops the boot task and drains the recorder.
    pub fn close(mut self) {
        self.rig.stop_background();
        if let Some(recorder) = self.rig.recorder.take() {
            match Arc::try_unwrap(recorder) {
                Ok(recorder) => recorder.shutdown(),
                Err(_) => {
                    warn!("recorder still shared, signalling its workers to stop");
                    self.recorder_stop.store(true, Ordering::SeqCst);
                }
            }
        }
    }
}

fn has_pod_serial(record: &serde_json::Value) -> bool {
    record
        .get("pods")
        .and_then(|pods| pods.get(0))
        .and_then(|pod| pod.get("PodSerial"))
        .is_some_and(|serial| serial.is_string())
}

fn record_callback() -> RecordCallback {
    Arc::new(|database: Database, record: &Record, err: Option<&RecorderError>| match err {
        Some(err) => error!(database = %database, error = %err, "Couldn't record {record} in {database} database !"),
        None => debug!(database = %database, "record saved"),
    })
}

/// `<dir>/<start stamp>.json`, indented by four spaces.
pub fn write_report(dir: &std::path::Path, stamp: &str, report: &serde_json::Value) -> Result<PathBuf> {
    use serde::Serialize;
    std::fs::create_dir_all(dir)?;
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    report
        .serialize(&mut serializer)
        .map_err(|err| Error::Parse(format!("run report: {err}")))?;
    let path = dir.join(format!("{stamp}.json"));
    std::fs::write(&path, out)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_from_options() {
        let opts = RunOptions {
            io_board_port: Some("/dev/ttyACM1".into()),
            skip: vec!["PRINT_LABEL".into()],
            log_level: Some("debug".into()),
            once: true,
            ..RunOptions::default()
        };
        let merged = AppConfig::from_sources(Config::default(), opts);
        assert_eq!(merged.config.io_board.port.as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(merged.config.sequence.skip, vec!["PRINT_LABEL"]);
        assert_eq!(merged.config.logging.level, "debug");
        assert!(merged.once);
    }

    #[test]
    fn config_prefers_file_values_when_cli_missing() {
        let mut file = Config::default();
        file.mcu.port = Some("/dev/ttyUSB3".into());
        file.sequence.skip = vec!["SEND_KEYS".into()];
        let merged = AppConfig::from_sources(
            file,
            RunOptions {
                skip: vec!["SEND_KEYS".into(), "TAKE_PICTURE".into()],
                ..RunOptions::default()
            },
        );
        assert_eq!(merged.config.mcu.port.as_deref(), Some("/dev/ttyUSB3"));
        assert_eq!(merged.config.sequence.skip, vec!["SEND_KEYS", "TAKE_PICTURE"]);
        assert_eq!(merged.config.logging.level, "info");
        assert!(!merged.once);
    }

    #[test]
    fn report_file_uses_four_space_indent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(dir.path(), "2024-01-02_03:04:05:000006", &json!({"pass": true})).unwrap();
        assert!(path.ends_with("2024-01-02_03:04:05:000006.json"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "{\n    \"pass\": true\n}");
    }

    #[test]
    fn online_record_needs_a_serial() {
        assert!(has_pod_serial(&json!({"pods": [{"PodSerial": "20203100000015"}]})));
        assert!(!has_pod_serial(&json!({"pods": [{"SOM": {}}]})));
        assert!(!has_pod_serial(&json!({})));
    }
}
