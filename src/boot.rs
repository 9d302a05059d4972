//! SBC boot and console login, run in the background while the MCU steps proceed.

use crate::channel::{compile, Request};
use crate::ioboard::PowerControl;
use crate::sbc::{compile_all, lock_sbc, SharedSbc, KERNEL_PANIC, LOGIN_PATTERNS, MARKER_FILE, PROMPT_PATTERNS};
use crate::serial::SerialLink;
use crate::supervised::SupervisedTask;
use crate::{Error, Result, SBC_TARGET};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const READ_SLICE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootState {
    NotStarted = 0,
    Booted = 1,
    Failed = 2,
}

impl BootState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootState::NotStarted => "not started",
            BootState::Booted => "booted",
            BootState::Failed => "failed",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => BootState::Booted,
            2 => BootState::Failed,
            _ => BootState::NotStarted,
        }
    }
}

impl fmt::Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boot state shared with the background task.
#[derive(Debug, Default)]
pub struct BootStatus(AtomicU8);

impl BootStatus {
    pub fn get(&self) -> BootState {
        BootState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: BootState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// Durations in milliseconds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootSettings {
    pub username: String,
    /// Never logged.
    pub password: String,
    pub watchdog_ms: u64,
    pub power_off_ms: u64,
    pub power_on_ms: u64,
    pub login_settle_ms: u64,
}

impl Default for BootSettings {
    fn default() -> Self {
        Self {
            username: "pego".to_string(),
            password: String::new(),
            watchdog_ms: 70_000,
            power_off_ms: 2_000,
            power_on_ms: 3_000,
            login_settle_ms: 1_200,
        }
    }
}

impl fmt::Debug for BootSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootSettings")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("watchdog_ms", &self.watchdog_ms)
            .field("power_off_ms", &self.power_off_ms)
            .field("power_on_ms", &self.power_on_ms)
            .field("login_settle_ms", &self.login_settle_ms)
            .finish()
    }
}

fn stopped(stop: &AtomicBool) -> Result<()> {
    if stop.load(Ordering::SeqCst) {
        return Err(Error::Cancelled("SBC boot stopped".into()));
    }
    Ok(())
}

/// Waits for the login prompt, logs in and checks the home directory holds the
/// identity script.
pub fn login_handshake<L: SerialLink>(
    sbc: &SharedSbc<L>,
    settings: &BootSettings,
    stop: &AtomicBool,
) -> Result<BootState> {
    let settle = Duration::from_millis(settings.login_settle_ms);
    let login = compile_all(&LOGIN_PATTERNS)?;
    let panic = compile(&regex::escape(KERNEL_PANIC))?;
    let mut waiting = login.clone();
    waiting.push(panic.clone());

    info!(target: SBC_TARGET, "waiting for login prompt");
    loop {
        stopped(stop)?;
        let lines = lock_sbc(sbc).read_until(READ_SLICE, &waiting, Some(stop))?;
        if lines.iter().any(|line| panic.is_match(line)) {
            error!(target: SBC_TARGET, "kernel panic during boot");
            return Ok(BootState::Failed);
        }
        if lines.iter().any(|line| login.iter().any(|re| re.is_match(line))) {
            break;
        }
    }

    std::thread::sleep(Duration::from_millis(100));
    stopped(stop)?;
    let password_prompt = [compile("Password:")?];
    let response = lock_sbc(sbc).send(
        &Request::new(&settings.username, &password_prompt)
            .timeout(READ_SLICE)
            .stop_on(stop),
    )?;
    if !response.terminated {
        warn!(target: SBC_TARGET, "no password prompt");
    }
    std::thread::sleep(settle);
    stopped(stop)?;

    let shell = [compile("pego@CM4")?];
    let response = lock_sbc(sbc).send(
        &Request::new(&settings.password, &shell)
            .timeout(Duration::from_secs(2))
            .quiet()
            .stop_on(stop),
    )?;
    if !response.terminated {
        warn!(target: SBC_TARGET, "no shell prompt after login");
    }
    std::thread::sleep(settle);
    stopped(stop)?;

    let listing = lock_sbc(sbc).command(
        "ls -l",
        Some(READ_SLICE),
        &[MARKER_FILE, PROMPT_PATTERNS[0]],
    )?;
    if listing.contains(MARKER_FILE) {
        info!(target: SBC_TARGET, "SBC booted");
        Ok(BootState::Booted)
    } else {
        error!(target: SBC_TARGET, "{MARKER_FILE} not found after login");
        Ok(BootState::Failed)
    }
}

pub struct BootSupervisor<L> {
    sbc: SharedSbc<L>,
    status: Arc<BootStatus>,
    settings: BootSettings,
    task: Option<SupervisedTask<BootState>>,
}

impl<L: SerialLink + 'static> BootSupervisor<L> {
    pub fn new(sbc: SharedSbc<L>, settings: BootSettings) -> Self {
        Self {
            sbc,
            status: Arc::new(BootStatus::default()),
            settings,
            task: None,
        }
    }

    pub fn state(&self) -> BootState {
        self.status.get()
    }

    pub fn status(&self) -> Arc<BootStatus> {
        Arc::clone(&self.status)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Starts a boot attempt unless one is already in flight.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        if let Some(previous) = self.task.take() {
            previous.join()?;
        }
        self.status.set(BootState::NotStarted);
        let sbc = Arc::clone(&self.sbc);
        let status = Arc::clone(&self.status);
        let settings = self.settings.clone();
        let task = SupervisedTask::spawn(
            "sbc-boot",
            Duration::from_millis(self.settings.watchdog_ms),
            move |stop| {
                let state = match login_handshake(&sbc, &settings, stop) {
                    Ok(state) => state,
                    Err(err) => {
                        error!(target: SBC_TARGET, error = %err, "SBC boot aborted");
                        BootState::Failed
                    }
                };
                status.set(state);
                state
            },
        )?;
        self.task = Some(task);
        Ok(())
    }

    /// Blocks on an in-flight attempt and its result.
    pub fn wait(&mut self) -> Result<BootState> {
        if let Some(task) = self.task.take() {
            let state = task.join()?;
            info!(state = %state, "SBC boot finished");
        }
        Ok(self.status.get())
    }

    /// Joins any running attempt; if the SBC still is not booted, power-cycles the
    /// device and boots again.
    pub fn boot_if_needed(&mut self, power: &mut dyn PowerControl) -> Result<BootState> {
        if self.wait()? == BootState::Booted {
            return Ok(BootState::Booted);
        }
        warn!("SBC not booted, power cycling");
        power.set_power(false)?;
        std::thread::sleep(Duration::from_millis(self.settings.power_off_ms));
        power.set_power(true)?;
        std::thread::sleep(Duration::from_millis(self.settings.power_on_ms));
        self.start()?;
        self.wait()
    }

    /// Raises the stop flag of a running attempt and joins it.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.stop();
            task.join()?;
        }
        Ok(())
    }
}
